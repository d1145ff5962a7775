//! Error types for IronIPC core operations.

use thiserror::Error;

/// Core error type for IronIPC operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Chunk size must be strictly positive.
    #[error("invalid chunk size: {size} (must be greater than zero)")]
    InvalidChunkSize {
        /// Rejected chunk size.
        size: usize,
    },

    /// The underlying channel stopped before the whole payload moved.
    #[error("partial transfer: {transferred} of {expected} bytes")]
    PartialTransfer {
        /// Bytes actually transferred.
        transferred: usize,
        /// Bytes the protocol required.
        expected: usize,
    },

    /// IO error from the underlying channel.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Creates a partial transfer error.
    pub fn partial(transferred: usize, expected: usize) -> Self {
        Self::PartialTransfer {
            transferred,
            expected,
        }
    }
}

/// Result type alias for IronIPC core operations.
pub type Result<T> = std::result::Result<T, Error>;
