//! # IronIPC
//!
//! Measures the end-to-end latency of moving one payload between two
//! processes over System V shared memory, named pipes and System V message
//! queues.
//!
//! ## Binaries
//!
//! - `ipc-sender <shared|pipes|queue> <0|1> <size-mb>` - sends one payload
//! - `ipc-receiver <shared|pipes|queue> <0|1> [size-mb]` - receives it
//! - `ipc-driver --transport <kind>` - runs repeated trials and reports latency
//! - `ipc-combine <receiver> <sender>` - merges result files of both sides
//!
//! With the print flag set, sender and receiver each write one monotonic
//! nanosecond timestamp to stdout; latency is `receiver - sender`.
//!
//! ## Library use
//!
//! ```ignore
//! use ironipc::prelude::*;
//!
//! let config = TransportConfig::default().with_timeout(Some(Duration::from_secs(5)));
//! let mut receiver = open_transport(TransportKind::MessageQueue, &config)?;
//! let received = receiver.receive(&LatencyProbe::silent())?;
//! ```
//!
//! ## Crate Organization
//!
//! - [`core`] - Chunked channels, timestamps, payloads
//! - [`transport`] - The three transports and their configuration
//! - [`bench`] - Trial records, statistics and reports

pub mod cli;
pub mod driver;
pub mod logging;
pub mod prelude;
pub mod runner;

/// Chunked channels, timestamps and payload generation.
pub mod core {
    pub use ironipc_core::*;
}

/// Transports and their configuration.
pub mod transport {
    pub use ironipc_transport::*;
}

/// Trial records, statistics and reports.
pub mod bench {
    pub use ironipc_bench::*;
}

pub use driver::TrialDriver;
pub use ironipc_core::{ChunkSize, ChunkedChannel, LatencyProbe, Timestamp};
pub use ironipc_transport::{
    Transport, TransportConfig, TransportError, TransportKind, open_transport,
};
