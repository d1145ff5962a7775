//! # IronIPC Bench
//!
//! Measurement side of IronIPC: trial records, latency statistics,
//! sender/receiver result combining and CSV reports.

pub mod combine;
pub mod latency;
pub mod record;
pub mod report;
pub mod throughput;

pub use combine::{CombinedMetric, combine_metrics, pair_timestamps, parse_number, parse_samples};
pub use latency::{LatencyCollector, LatencyStats};
pub use record::{TrialRecord, TrialStatus};
pub use report::{Summary, write_combined_csv, write_trials_csv};
pub use throughput::TransferRate;
