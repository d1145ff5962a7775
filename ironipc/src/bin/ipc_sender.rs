//! Sends one payload and prints the before-send timestamp.

use clap::Parser;
use ironipc::cli::SenderArgs;
use ironipc::{logging, runner};
use std::process::ExitCode;

fn main() -> ExitCode {
    let args = SenderArgs::parse();
    logging::init(args.transport_args.verbose);
    let mut stdout = std::io::stdout().lock();
    runner::finish("sender", runner::run_sender(&args, &mut stdout))
}
