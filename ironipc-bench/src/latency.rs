//! Latency statistics.

use hdrhistogram::{CreationError, Histogram};
use std::time::Duration;

/// Significant figures kept by the histogram.
const SIGNIFICANT_FIGURES: u8 = 3;

/// Latency statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyStats {
    /// Minimum latency.
    pub min: Duration,
    /// Maximum latency.
    pub max: Duration,
    /// Mean latency.
    pub mean: Duration,
    /// Median latency (p50).
    pub median: Duration,
    /// 99th percentile latency.
    pub p99: Duration,
    /// 99.9th percentile latency.
    pub p999: Duration,
    /// Sample count.
    pub count: u64,
}

/// Collects latency samples in an HDR histogram.
///
/// A trial's latency is the difference of two timestamps taken in
/// different processes and can come out negative; such samples are counted
/// but kept out of the histogram.
#[derive(Debug, Clone)]
pub struct LatencyCollector {
    histogram: Histogram<u64>,
    negative: u64,
}

impl LatencyCollector {
    /// Creates a new, auto-resizing latency collector.
    ///
    /// # Errors
    /// Returns the histogram's [`CreationError`] if it cannot be allocated.
    pub fn new() -> Result<Self, CreationError> {
        Ok(Self {
            histogram: Histogram::new(SIGNIFICANT_FIGURES)?,
            negative: 0,
        })
    }

    /// Records a latency sample.
    pub fn record(&mut self, latency: Duration) {
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        self.histogram.saturating_record(nanos);
    }

    /// Records a signed nanosecond difference.
    pub fn record_nanos(&mut self, nanos: i128) {
        match u64::try_from(nanos) {
            Ok(nanos) => self.histogram.saturating_record(nanos),
            Err(_) if nanos < 0 => self.negative += 1,
            Err(_) => self.histogram.saturating_record(u64::MAX),
        }
    }

    /// Computes statistics from the recorded non-negative samples.
    #[must_use]
    pub fn stats(&self) -> Option<LatencyStats> {
        if self.histogram.is_empty() {
            return None;
        }

        Some(LatencyStats {
            min: Duration::from_nanos(self.histogram.min()),
            max: Duration::from_nanos(self.histogram.max()),
            mean: Duration::from_nanos(self.histogram.mean().round() as u64),
            median: Duration::from_nanos(self.histogram.value_at_quantile(0.5)),
            p99: Duration::from_nanos(self.histogram.value_at_quantile(0.99)),
            p999: Duration::from_nanos(self.histogram.value_at_quantile(0.999)),
            count: self.histogram.len(),
        })
    }

    /// Number of samples rejected for being negative.
    #[must_use]
    pub fn negative(&self) -> u64 {
        self.negative
    }

    /// Clears all samples.
    pub fn clear(&mut self) {
        self.histogram.reset();
        self.negative = 0;
    }

    /// Returns the number of samples in the histogram.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.histogram.len()
    }

    /// Returns true if no samples have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty() && self.negative == 0
    }
}
