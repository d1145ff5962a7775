//! # IronIPC Core
//!
//! Core building blocks shared by every IronIPC transport.
//!
//! This crate provides:
//! - [`chunk`] - Chunk arithmetic and the [`ChunkedChannel`] bulk-transfer path
//! - [`probe`] - Monotonic [`Timestamp`]s captured at transfer boundaries
//! - [`payload`] - Synthetic payload generation for benchmark senders
//! - [`error`] - Core error type

pub mod chunk;
pub mod error;
pub mod payload;
pub mod probe;

pub use chunk::{ChunkSink, ChunkSize, ChunkSource, ChunkedChannel, chunk_count, chunk_plan};
pub use error::{Error, Result};
pub use probe::{LatencyProbe, ProbePoint, Timestamp};
