//! Per-trial results.

use ironipc_core::Timestamp;
use ironipc_transport::TransportKind;
use std::fmt;

/// Outcome of one trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialStatus {
    /// Both sides succeeded and reported a timestamp.
    Ok,
    /// A side exited non-zero or printed something unparsable.
    Failed,
    /// A side did not finish in time and was killed.
    TimedOut,
}

impl fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "ok",
            Self::Failed => "failed",
            Self::TimedOut => "timeout",
        })
    }
}

/// Result of one sender/receiver pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialRecord {
    /// Zero-based trial index.
    pub trial: usize,
    /// Transport exercised.
    pub transport: TransportKind,
    /// Payload length in bytes.
    pub payload_bytes: u64,
    /// Sender's before-send timestamp.
    pub sender: Option<Timestamp>,
    /// Receiver's after-receive timestamp.
    pub receiver: Option<Timestamp>,
    /// Outcome.
    pub status: TrialStatus,
}

impl TrialRecord {
    /// A successful trial.
    #[must_use]
    pub fn completed(
        trial: usize,
        transport: TransportKind,
        payload_bytes: u64,
        sender: Timestamp,
        receiver: Timestamp,
    ) -> Self {
        Self {
            trial,
            transport,
            payload_bytes,
            sender: Some(sender),
            receiver: Some(receiver),
            status: TrialStatus::Ok,
        }
    }

    /// A trial that did not produce both timestamps.
    #[must_use]
    pub fn failed(
        trial: usize,
        transport: TransportKind,
        payload_bytes: u64,
        status: TrialStatus,
    ) -> Self {
        Self {
            trial,
            transport,
            payload_bytes,
            sender: None,
            receiver: None,
            status,
        }
    }

    /// Receiver minus sender timestamp; may be negative.
    #[must_use]
    pub fn latency_ns(&self) -> Option<i128> {
        match (self.status, self.sender, self.receiver) {
            (TrialStatus::Ok, Some(sent), Some(received)) => Some(received.nanos_since(sent)),
            _ => None,
        }
    }

    /// Returns true if the trial succeeded.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == TrialStatus::Ok
    }
}
