//! Transfer rate helpers.

use std::time::Duration;

/// Bytes moved over a duration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferRate {
    /// Bytes transferred.
    pub bytes: u64,
    /// Time taken.
    pub duration: Duration,
}

impl TransferRate {
    /// Creates a transfer rate.
    #[must_use]
    pub fn new(bytes: u64, duration: Duration) -> Self {
        Self { bytes, duration }
    }

    /// Returns bytes per second, or `None` for a zero duration.
    #[must_use]
    pub fn bytes_per_second(&self) -> Option<f64> {
        let secs = self.duration.as_secs_f64();
        (secs > 0.0).then(|| self.bytes as f64 / secs)
    }

    /// Returns mebibytes per second.
    #[must_use]
    pub fn mib_per_second(&self) -> Option<f64> {
        self.bytes_per_second().map(|b| b / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_rate() {
        let rate = TransferRate::new(2 * 1024 * 1024, Duration::from_millis(500));
        assert!((rate.mib_per_second().unwrap() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_duration() {
        let rate = TransferRate::new(10, Duration::ZERO);
        assert!(rate.bytes_per_second().is_none());
    }
}
