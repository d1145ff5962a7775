//! Prelude module for convenient imports.
//!
//! ```ignore
//! use ironipc::prelude::*;
//! ```

// Core types
pub use ironipc_core::error::{Error as CoreError, Result as CoreResult};
pub use ironipc_core::{
    ChunkSink, ChunkSize, ChunkSource, ChunkedChannel, LatencyProbe, ProbePoint, Timestamp,
};

// Transports
pub use ironipc_transport::{
    IpcKey, MessageQueueTransport, PipeTransport, Received, SharedMemoryTransport, Transport,
    TransportConfig, TransportError, TransportKind, ensure_fifo, open_transport,
};

// Measurement
pub use ironipc_bench::{LatencyCollector, LatencyStats, Summary, TrialRecord, TrialStatus};

pub use std::time::Duration;
