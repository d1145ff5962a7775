//! Receives one payload and prints the after-receive timestamp.

use clap::Parser;
use ironipc::cli::ReceiverArgs;
use ironipc::{logging, runner};
use std::process::ExitCode;

fn main() -> ExitCode {
    let args = ReceiverArgs::parse();
    logging::init(args.transport_args.verbose);
    let mut stdout = std::io::stdout().lock();
    runner::finish("receiver", runner::run_receiver(&args, &mut stdout))
}
