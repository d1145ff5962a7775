//! # IronIPC Transport
//!
//! Single-shot payload transports between two local processes.
//!
//! This crate provides:
//! - [`SharedMemoryTransport`] - System V segment plus a side-channel handle queue
//! - [`PipeTransport`] - Size-prefixed chunked transfer over a named pipe
//! - [`MessageQueueTransport`] - Size announcement plus chunk messages on a System V queue
//! - [`Transport`] - The capability every mechanism implements
//!
//! Every blocking primitive honours the optional timeout in
//! [`TransportConfig`], and receivers remove the kernel objects they own on
//! both success and failure.

pub mod config;
pub mod deadline;
pub mod error;
pub mod framing;
pub mod msgq;
pub mod pipe;
pub mod shm;
pub mod sysv;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use config::{
    DEFAULT_FIFO_PATH, DEFAULT_QUEUE_KEY, DEFAULT_SHM_QUEUE_KEY, IpcKey, TransportConfig,
};
pub use deadline::Deadline;
pub use error::{CleanupOp, Resource, Severity, TransportError};
pub use msgq::MessageQueueTransport;
pub use pipe::{PipeTransport, ensure_fifo};
pub use shm::{SharedMemoryTransport, ShmReceiverState, ShmSenderState};
pub use transport::{Received, Transport, TransportKind, open_transport};
