//! Combining sender and receiver result files.
//!
//! Two inputs are supported:
//! - raw timestamp streams, one sample per line, paired into
//!   [`TrialRecord`]s by position;
//! - `perf stat`-style counter tables (`value,unit,event,...`), where the
//!   counters of both sides are summed row by row.
//!
//! Numbers may carry thousands separators (`1,234,567`). Rows whose first
//! field is not a number are skipped.

use crate::record::TrialRecord;
use ironipc_core::Timestamp;
use ironipc_transport::TransportKind;

/// Parses an unsigned integer, ignoring surrounding whitespace and `,`
/// thousands separators.
#[must_use]
pub fn parse_number(field: &str) -> Option<u64> {
    let digits: String = field.trim().chars().filter(|&c| c != ',').collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Splits one CSV line into fields, honouring double quotes.
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

/// Extracts the numeric samples of a line-oriented stream.
///
/// Each line's first field is parsed with [`parse_number`]. A bare number
/// with unquoted thousands separators (`1,234`) is recognised as a whole.
#[must_use]
pub fn parse_samples(text: &str) -> Vec<u64> {
    text.lines()
        .filter_map(|line| {
            parse_number(line)
                .or_else(|| split_fields(line).first().and_then(|f| parse_number(f)))
        })
        .collect()
}

/// Pairs sender and receiver timestamps by position into trial records.
///
/// Extra samples on the longer side are ignored.
#[must_use]
pub fn pair_timestamps(
    transport: TransportKind,
    payload_bytes: u64,
    sender: &[u64],
    receiver: &[u64],
) -> Vec<TrialRecord> {
    if sender.len() != receiver.len() {
        tracing::warn!(
            sender = sender.len(),
            receiver = receiver.len(),
            "sample counts differ; extra samples ignored"
        );
    }
    sender
        .iter()
        .zip(receiver)
        .enumerate()
        .map(|(trial, (&sent, &received))| {
            TrialRecord::completed(
                trial,
                transport,
                payload_bytes,
                Timestamp::from_nanos(sent),
                Timestamp::from_nanos(received),
            )
        })
        .collect()
}

/// One summed counter row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombinedMetric {
    /// Sum of both sides' values.
    pub value: u64,
    /// Trailing non-numeric fields of the first input's row (unit, event name, ...).
    pub labels: Vec<String>,
}

impl CombinedMetric {
    /// Value rendered with `,` thousands separators.
    #[must_use]
    pub fn formatted_value(&self) -> String {
        format_thousands(self.value)
    }
}

/// Formats `value` with `,` every three digits.
#[must_use]
pub fn format_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn counter_rows(text: &str) -> Vec<(u64, Vec<String>)> {
    text.lines()
        .filter_map(|line| {
            let fields = split_fields(line);
            let value = parse_number(fields.first()?)?;
            let labels = fields
                .into_iter()
                .skip_while(|f| parse_number(f).is_some())
                .collect();
            Some((value, labels))
        })
        .collect()
}

/// Sums two counter tables row by row.
///
/// Rows are paired by position after non-numeric rows are dropped; labels
/// come from `first`.
#[must_use]
pub fn combine_metrics(first: &str, second: &str) -> Vec<CombinedMetric> {
    counter_rows(first)
        .into_iter()
        .zip(counter_rows(second))
        .map(|((a, labels), (b, _))| CombinedMetric {
            value: a.saturating_add(b),
            labels,
        })
        .collect()
}
