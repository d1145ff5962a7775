//! Deadlines for blocking IPC primitives.

use crate::error::TransportError;
use std::time::{Duration, Instant};

/// Point in time after which a blocking step gives up.
///
/// An unbounded deadline never expires; the step blocks as long as the
/// kernel primitive does.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    timeout: Option<Duration>,
}

impl Deadline {
    /// Deadline `timeout` from now, or unbounded for `None`.
    #[must_use]
    pub fn after(timeout: Option<Duration>) -> Self {
        Self {
            start: Instant::now(),
            timeout,
        }
    }

    /// Deadline that never expires.
    #[must_use]
    pub fn never() -> Self {
        Self::after(None)
    }

    /// Returns true if this deadline can expire.
    #[must_use]
    pub fn is_bounded(&self) -> bool {
        self.timeout.is_some()
    }

    /// Time left, `None` if unbounded.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.timeout
            .map(|timeout| timeout.saturating_sub(self.start.elapsed()))
    }

    /// Returns true once a bounded deadline has passed.
    #[must_use]
    pub fn expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }

    /// Remaining time as a `poll(2)` timeout: `-1` when unbounded.
    #[must_use]
    pub fn poll_timeout_ms(&self) -> libc::c_int {
        match self.remaining() {
            None => -1,
            // Round up so a sub-millisecond remainder still waits.
            Some(left) => left
                .as_micros()
                .div_ceil(1000)
                .min(libc::c_int::MAX as u128) as libc::c_int,
        }
    }

    /// Timeout error for `operation`.
    #[must_use]
    pub fn timeout_error(&self, operation: &'static str) -> TransportError {
        TransportError::timeout(operation, self.timeout.unwrap_or_default())
    }
}

/// Spin-then-yield backoff for non-blocking retry loops.
///
/// Never sleeps: a retry loop sits inside the measured interval, and a
/// timer-granularity sleep would show up as latency.
#[derive(Debug, Default)]
pub(crate) struct Backoff {
    step: u32,
}

impl Backoff {
    const SPIN_LIMIT: u32 = 6;

    /// Spins with growing bursts, then yields the CPU on every call.
    pub(crate) fn snooze(&mut self) {
        if self.step < Self::SPIN_LIMIT {
            for _ in 0..(1u32 << self.step) {
                std::hint::spin_loop();
            }
            self.step += 1;
        } else {
            std::thread::yield_now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_deadline() {
        let deadline = Deadline::never();
        assert!(!deadline.is_bounded());
        assert!(!deadline.expired());
        assert_eq!(deadline.remaining(), None);
        assert_eq!(deadline.poll_timeout_ms(), -1);
    }

    #[test]
    fn test_bounded_deadline_expires() {
        let deadline = Deadline::after(Some(Duration::from_millis(5)));
        assert!(deadline.is_bounded());
        std::thread::sleep(Duration::from_millis(10));
        assert!(deadline.expired());
        assert_eq!(deadline.poll_timeout_ms(), 0);
    }

    #[test]
    fn test_poll_timeout_rounds_up() {
        let deadline = Deadline::after(Some(Duration::from_secs(2)));
        let ms = deadline.poll_timeout_ms();
        assert!(ms > 1900 && ms <= 2000);
    }

    #[test]
    fn test_timeout_error_carries_duration() {
        let deadline = Deadline::after(Some(Duration::from_millis(30)));
        assert!(matches!(
            deadline.timeout_error("msgrcv"),
            TransportError::Timeout { operation: "msgrcv", timeout }
                if timeout == Duration::from_millis(30)
        ));
    }

    #[test]
    fn test_backoff_respects_deadline() {
        let deadline = Deadline::after(Some(Duration::from_millis(2)));
        let mut backoff = Backoff::default();
        let start = Instant::now();
        while !deadline.expired() {
            backoff.snooze();
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_backoff_never_sleeps() {
        // A millisecond sleep per call would take ten seconds here.
        let mut backoff = Backoff::default();
        let start = Instant::now();
        for _ in 0..10_000 {
            backoff.snooze();
        }
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
