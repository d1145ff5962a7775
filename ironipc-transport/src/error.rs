//! Error types for transport operations.

use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Kernel or filesystem object a transport operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// System V shared memory segment.
    Segment,
    /// System V message queue carrying payload chunks.
    MessageQueue,
    /// System V message queue carrying the segment handle.
    SideChannel,
    /// Named pipe.
    Fifo,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Segment => f.write_str("shared memory segment"),
            Self::MessageQueue => f.write_str("message queue"),
            Self::SideChannel => f.write_str("side-channel queue"),
            Self::Fifo => f.write_str("named pipe"),
        }
    }
}

/// Release step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOp {
    /// `shmdt`.
    Detach,
    /// `shmctl(IPC_RMID)`.
    Destroy,
    /// `msgctl(IPC_RMID)`.
    Remove,
}

impl fmt::Display for CleanupOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Detach => f.write_str("detach"),
            Self::Destroy => f.write_str("destroy"),
            Self::Remove => f.write_str("remove"),
        }
    }
}

/// How far a failure reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Abort this trial; the sweep can continue.
    Trial,
    /// Environment or programming error; further trials will fail the same way.
    Process,
}

/// Error type for transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A segment, queue or pipe could not be created or opened.
    #[error("failed to create {resource}: {source}")]
    ResourceCreation {
        /// Resource being created.
        resource: Resource,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Attaching a shared memory segment failed.
    #[error("failed to attach segment {id}: {source}")]
    Attach {
        /// Segment id.
        id: i32,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Size prefix or control message malformed or short.
    #[error("framing error: {message}")]
    Framing {
        /// Error message.
        message: String,
    },

    /// Fewer bytes transferred than the protocol required.
    #[error("partial transfer: {transferred} of {expected} bytes")]
    PartialTransfer {
        /// Bytes actually transferred.
        transferred: usize,
        /// Bytes required.
        expected: usize,
    },

    /// Detach, destroy or remove failed.
    #[error("failed to {op} {resource}: {source}")]
    ResourceCleanup {
        /// Resource being released.
        resource: Resource,
        /// Release step.
        op: CleanupOp,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// A blocking step did not complete in time.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// Step that was waiting.
        operation: &'static str,
        /// Configured timeout.
        timeout: Duration,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },
}

impl TransportError {
    /// Creates a resource creation error from the last OS error.
    pub fn creation(resource: Resource) -> Self {
        Self::ResourceCreation {
            resource,
            source: io::Error::last_os_error(),
        }
    }

    /// Creates a cleanup error from the last OS error.
    pub fn cleanup(resource: Resource, op: CleanupOp) -> Self {
        Self::ResourceCleanup {
            resource,
            op,
            source: io::Error::last_os_error(),
        }
    }

    /// Creates a framing error.
    pub fn framing(message: impl Into<String>) -> Self {
        Self::Framing {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(operation: &'static str, timeout: Duration) -> Self {
        Self::Timeout { operation, timeout }
    }

    /// Classifies the error for the trial driver.
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            Self::InvalidConfig { .. } => Severity::Process,
            Self::ResourceCreation { source, .. } | Self::Attach { source, .. }
                if source.kind() == io::ErrorKind::PermissionDenied =>
            {
                Severity::Process
            }
            _ => Severity::Trial,
        }
    }

    /// Wraps this error in an [`io::Error`] so it can cross a
    /// [`ChunkSink`](ironipc_core::ChunkSink) boundary intact.
    #[must_use]
    pub fn into_io(self) -> io::Error {
        let kind = match &self {
            Self::Timeout { .. } => io::ErrorKind::TimedOut,
            Self::Io(e) => e.kind(),
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, self)
    }

    /// Recovers a transport error previously wrapped by [`TransportError::into_io`].
    #[must_use]
    pub fn from_io(err: io::Error) -> Self {
        if err.get_ref().is_some_and(|inner| inner.is::<TransportError>()) {
            if let Some(inner) = err.into_inner() {
                return match inner.downcast::<TransportError>() {
                    Ok(transport) => *transport,
                    Err(other) => Self::Io(io::Error::other(other)),
                };
            }
            return Self::framing("lost wrapped transport error");
        }
        Self::Io(err)
    }
}

impl From<ironipc_core::Error> for TransportError {
    fn from(err: ironipc_core::Error) -> Self {
        match err {
            ironipc_core::Error::InvalidChunkSize { size } => {
                Self::invalid_config(format!("chunk size {size} must be greater than zero"))
            }
            ironipc_core::Error::PartialTransfer {
                transferred,
                expected,
            } => Self::PartialTransfer {
                transferred,
                expected,
            },
            ironipc_core::Error::Io(e) => Self::from_io(e),
        }
    }
}
