//! Transport capability shared by every IPC mechanism.

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::msgq::MessageQueueTransport;
use crate::pipe::PipeTransport;
use crate::shm::SharedMemoryTransport;
use ironipc_core::{LatencyProbe, Timestamp};
use std::fmt;
use std::str::FromStr;

/// Payload reassembled by a receiver, with its reception timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    /// Independent copy of the payload.
    pub payload: Vec<u8>,
    /// Monotonic reading taken when the payload became usable.
    pub timestamp: Timestamp,
}

/// One side of a single-shot payload transfer between two processes.
pub trait Transport {
    /// Mechanism implemented by this transport.
    fn kind(&self) -> TransportKind;

    /// Transmits `payload` to the peer.
    ///
    /// # Returns
    /// The timestamp captured immediately before transmission started.
    ///
    /// # Errors
    /// Returns `TransportError` on any failure; resources acquired so far are
    /// released best-effort before returning.
    fn send(&mut self, payload: &[u8], probe: &LatencyProbe) -> Result<Timestamp, TransportError>;

    /// Waits for and reassembles the peer's payload.
    ///
    /// # Errors
    /// Returns `TransportError` on any failure; kernel objects owned by the
    /// receiver are removed best-effort before returning.
    fn receive(&mut self, probe: &LatencyProbe) -> Result<Received, TransportError>;
}

/// Available IPC mechanisms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// System V shared memory with a side-channel handle queue.
    SharedMemory,
    /// Named pipe.
    Pipe,
    /// System V message queue.
    MessageQueue,
}

impl TransportKind {
    /// All kinds, in command-line order.
    pub const ALL: [TransportKind; 3] = [Self::SharedMemory, Self::Pipe, Self::MessageQueue];

    /// Command-line name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SharedMemory => "shared",
            Self::Pipe => "pipes",
            Self::MessageQueue => "queue",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TransportKind {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| {
                TransportError::invalid_config(format!(
                    "invalid transport {s:?}; valid names are 'shared', 'pipes' and 'queue'"
                ))
            })
    }
}

/// Builds the transport selected by `kind`.
///
/// # Errors
/// Returns [`TransportError::InvalidConfig`] if `config` is invalid.
pub fn open_transport(
    kind: TransportKind,
    config: &TransportConfig,
) -> Result<Box<dyn Transport>, TransportError> {
    config.validate()?;
    Ok(match kind {
        TransportKind::SharedMemory => Box::new(SharedMemoryTransport::from_config(config)),
        TransportKind::Pipe => Box::new(PipeTransport::from_config(config)?),
        TransportKind::MessageQueue => Box::new(MessageQueueTransport::from_config(config)?),
    })
}

/// Combines a step's result with the cleanup that must follow it.
///
/// The step's error wins; a cleanup failure after a failed step is logged.
pub(crate) fn with_cleanup<T>(
    result: Result<T, TransportError>,
    cleanup: Result<(), TransportError>,
) -> Result<T, TransportError> {
    match (result, cleanup) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(cleanup)) => Err(cleanup),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(cleanup)) => {
            tracing::warn!(error = %cleanup, "cleanup after failed transfer also failed");
            Err(err)
        }
    }
}
