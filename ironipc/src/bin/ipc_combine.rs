//! Combines receiver and sender result files.

use anyhow::Context;
use clap::Parser;
use ironipc::bench::{
    combine_metrics, pair_timestamps, parse_samples, write_combined_csv, write_trials_csv,
};
use ironipc::cli::CombineArgs;
use ironipc::core::payload::MEBIBYTE;
use ironipc::{logging, runner};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::process::ExitCode;

fn run(args: &CombineArgs) -> anyhow::Result<()> {
    let receiver = fs::read_to_string(&args.receiver)
        .with_context(|| format!("failed to read {}", args.receiver.display()))?;
    let sender = fs::read_to_string(&args.sender)
        .with_context(|| format!("failed to read {}", args.sender.display()))?;

    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )),
        None => Box::new(std::io::stdout().lock()),
    };

    match (args.timestamps, args.transport) {
        (true, Some(transport)) => {
            let records = pair_timestamps(
                transport,
                (args.size_mb * MEBIBYTE) as u64,
                &parse_samples(&sender),
                &parse_samples(&receiver),
            );
            write_trials_csv(&records, &mut out)?;
            tracing::info!(rows = records.len(), "timestamps combined");
        }
        _ => {
            let metrics = combine_metrics(&receiver, &sender);
            write_combined_csv(&metrics, &mut out)?;
            tracing::info!(rows = metrics.len(), "metrics combined");
        }
    }
    out.flush().context("failed to flush output")?;
    Ok(())
}

fn main() -> ExitCode {
    let args = CombineArgs::parse();
    logging::init(args.verbose);
    runner::finish("combine", run(&args))
}
