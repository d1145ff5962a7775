//! Monotonic latency probes.
//!
//! Sender and receiver each capture one [`Timestamp`] at a fixed boundary of
//! the transfer. Latency is `receiver - sender` and is computed by whoever
//! collects both readings; the probe only captures and emits.

use crate::error::Result;
use nix::time::{ClockId, clock_gettime};
use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::time::Duration;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// `CLOCK_MONOTONIC` reading in nanoseconds since an arbitrary epoch.
///
/// Comparable across processes on the same host, never meaningful as wall
/// clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Reads the monotonic clock.
    ///
    /// # Errors
    /// Returns IO error if `clock_gettime` fails.
    pub fn now() -> Result<Self> {
        let ts = clock_gettime(ClockId::CLOCK_MONOTONIC).map_err(std::io::Error::from)?;
        Ok(Self((ts.tv_sec() as u64) * NANOS_PER_SEC + ts.tv_nsec() as u64))
    }

    /// Creates a timestamp from raw nanoseconds.
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Returns the raw nanosecond value.
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Signed nanoseconds from `earlier` to `self`.
    ///
    /// Negative when `self` was captured first.
    #[must_use]
    pub fn nanos_since(self, earlier: Timestamp) -> i128 {
        i128::from(self.0) - i128::from(earlier.0)
    }

    /// Duration from `earlier` to `self`, zero if `earlier` is later.
    #[must_use]
    pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Timestamp {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Transfer boundary at which a timestamp is captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbePoint {
    /// Immediately before the first transmission step (sender).
    BeforeSend,
    /// Immediately after the last byte became usable (receiver).
    AfterReceive,
}

impl fmt::Display for ProbePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BeforeSend => f.write_str("before-send"),
            Self::AfterReceive => f.write_str("after-receive"),
        }
    }
}

/// Captures timestamps and optionally emits them as text.
///
/// Emission is an explicit setting so large sweeps can skip per-trial output.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatencyProbe {
    emit: bool,
}

impl LatencyProbe {
    /// Creates a probe; `emit` controls whether [`LatencyProbe::emit`] writes.
    #[must_use]
    pub const fn new(emit: bool) -> Self {
        Self { emit }
    }

    /// Probe that never writes output.
    #[must_use]
    pub const fn silent() -> Self {
        Self { emit: false }
    }

    /// Returns true if this probe writes its readings.
    #[must_use]
    pub const fn emits(&self) -> bool {
        self.emit
    }

    /// Captures the monotonic clock at `point`.
    ///
    /// # Errors
    /// Returns IO error if the clock cannot be read.
    #[inline]
    pub fn capture(&self, _point: ProbePoint) -> Result<Timestamp> {
        Timestamp::now()
    }

    /// Writes `timestamp` as an unsigned decimal with no trailing newline.
    ///
    /// Does nothing when the probe is silent.
    ///
    /// # Errors
    /// Returns IO error if writing or flushing fails.
    pub fn emit<W: Write>(&self, timestamp: Timestamp, out: &mut W) -> std::io::Result<()> {
        if !self.emit {
            return Ok(());
        }
        write!(out, "{}", timestamp.as_nanos())?;
        out.flush()
    }
}
