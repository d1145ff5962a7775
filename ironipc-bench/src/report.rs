//! CSV output and sweep summaries.

use crate::combine::CombinedMetric;
use crate::latency::{LatencyCollector, LatencyStats};
use crate::record::TrialRecord;
use crate::throughput::TransferRate;
use hdrhistogram::CreationError;
use ironipc_transport::TransportKind;
use std::fmt;
use std::io::{self, Write};
use std::time::Duration;

/// Header of the per-trial CSV.
pub const TRIALS_HEADER: &str =
    "trial,transport,payload_bytes,sender_ns,receiver_ns,latency_ns,status";

fn optional<T: fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Quotes a field if it contains a separator, quote or line break.
fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Writes one CSV row per trial, preceded by [`TRIALS_HEADER`].
///
/// # Errors
/// Returns any error from `out`.
pub fn write_trials_csv<W: Write>(records: &[TrialRecord], out: &mut W) -> io::Result<()> {
    writeln!(out, "{TRIALS_HEADER}")?;
    for record in records {
        writeln!(
            out,
            "{},{},{},{},{},{},{}",
            record.trial,
            record.transport,
            record.payload_bytes,
            optional(record.sender),
            optional(record.receiver),
            optional(record.latency_ns()),
            record.status,
        )?;
    }
    out.flush()
}

/// Writes combined counter rows: formatted value, then the labels.
///
/// # Errors
/// Returns any error from `out`.
pub fn write_combined_csv<W: Write>(metrics: &[CombinedMetric], out: &mut W) -> io::Result<()> {
    for metric in metrics {
        let mut row = escape(&metric.formatted_value());
        for label in &metric.labels {
            row.push(',');
            row.push_str(&escape(label));
        }
        writeln!(out, "{row}")?;
    }
    out.flush()
}

/// Aggregate view of a sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    /// Trials attempted.
    pub trials: usize,
    /// Trials with both timestamps.
    pub succeeded: usize,
    /// Successful trials whose receiver timestamp preceded the sender's.
    pub negative: u64,
    /// Latency over non-negative successful trials.
    pub stats: Option<LatencyStats>,
    /// Payload rate at the mean latency.
    ///
    /// Not computed for shared memory, whose latency ends at the receiver's
    /// attach and so covers no payload movement on the receiving side.
    pub mean_rate: Option<TransferRate>,
}

impl Summary {
    /// Summarises `records`.
    ///
    /// # Errors
    /// Returns [`CreationError`] if the latency histogram cannot be created.
    pub fn from_records(records: &[TrialRecord]) -> Result<Self, CreationError> {
        let mut collector = LatencyCollector::new()?;
        for latency in records.iter().filter_map(TrialRecord::latency_ns) {
            collector.record_nanos(latency);
        }

        let stats = collector.stats();
        let mean_rate = stats
            .as_ref()
            .zip(records.first())
            .filter(|(_, first)| first.transport != TransportKind::SharedMemory)
            .map(|(stats, first)| TransferRate::new(first.payload_bytes, stats.mean));

        Ok(Self {
            trials: records.len(),
            succeeded: records.iter().filter(|r| r.is_ok()).count(),
            negative: collector.negative(),
            stats,
            mean_rate,
        })
    }

    /// Trials that did not succeed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.trials - self.succeeded
    }
}

fn micros(d: Duration) -> f64 {
    d.as_secs_f64() * 1e6
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "trials: {} ok, {} failed, {} total",
            self.succeeded,
            self.failed(),
            self.trials
        )?;
        if self.negative > 0 {
            writeln!(f, "negative latencies (excluded): {}", self.negative)?;
        }
        match &self.stats {
            Some(stats) => {
                writeln!(
                    f,
                    "latency us: min {:.3}  p50 {:.3}  p99 {:.3}  max {:.3}  mean {:.3}  (n={})",
                    micros(stats.min),
                    micros(stats.median),
                    micros(stats.p99),
                    micros(stats.max),
                    micros(stats.mean),
                    stats.count
                )?;
                if let Some(rate) = self.mean_rate.and_then(|r| r.mib_per_second()) {
                    writeln!(f, "mean rate: {rate:.1} MiB/s")?;
                }
                Ok(())
            }
            None => writeln!(f, "latency: no successful samples"),
        }
    }
}
