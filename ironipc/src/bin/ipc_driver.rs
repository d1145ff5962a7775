//! Runs repeated sender/receiver trials and reports latency.

use anyhow::Context;
use clap::Parser;
use ironipc::bench::{Summary, write_trials_csv};
use ironipc::cli::DriverArgs;
use ironipc::{TrialDriver, logging, runner};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::process::ExitCode;

async fn run(args: DriverArgs) -> anyhow::Result<()> {
    let driver = TrialDriver::from_args(&args)?;
    let records = driver.run().await?;

    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )),
        None => Box::new(std::io::stdout().lock()),
    };
    write_trials_csv(&records, &mut out).context("failed to write trial CSV")?;
    out.flush().context("failed to flush trial CSV")?;

    let summary = Summary::from_records(&records).context("failed to summarise trials")?;
    eprint!("{summary}");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = DriverArgs::parse();
    logging::init(args.transport_args.verbose);
    runner::finish("driver", run(args).await)
}
