//! Command line model shared by the binaries.
//!
//! Transport settings resolve as: command line flags, then `IRONIPC_*`
//! environment variables, then built-in defaults.

use clap::{ArgAction, Args, Parser};
use ironipc_transport::{IpcKey, TransportConfig, TransportError, TransportKind};
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

/// Parses the `<0|1>` print flag.
fn parse_print_flag(s: &str) -> Result<bool, String> {
    match s.trim() {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(format!("print flag must be 0 or 1, got {other:?}")),
    }
}

/// Transport overrides accepted by every binary.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportArgs {
    /// FIFO path used by the pipe transport
    #[arg(long)]
    pub fifo: Option<PathBuf>,

    /// System V key of the payload message queue
    #[arg(long)]
    pub queue_key: Option<IpcKey>,

    /// System V key of the shared memory side-channel queue
    #[arg(long)]
    pub shm_queue_key: Option<IpcKey>,

    /// Pipe chunk size in bytes
    #[arg(long)]
    pub pipe_chunk: Option<usize>,

    /// Message queue chunk size in bytes
    #[arg(long)]
    pub queue_chunk: Option<usize>,

    /// Timeout for each blocking step, in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl TransportArgs {
    /// Resolves the effective configuration from the process environment.
    ///
    /// # Errors
    /// Returns [`TransportError::InvalidConfig`] for unparsable environment
    /// values or an inconsistent result.
    pub fn resolve(&self) -> Result<TransportConfig, TransportError> {
        self.apply(TransportConfig::from_env()?)
    }

    /// Applies the flags on top of `base` and validates the result.
    ///
    /// # Errors
    /// Returns [`TransportError::InvalidConfig`] if the result is inconsistent.
    pub fn apply(&self, mut config: TransportConfig) -> Result<TransportConfig, TransportError> {
        if let Some(path) = &self.fifo {
            config = config.with_fifo_path(path);
        }
        if let Some(key) = self.queue_key {
            config = config.with_queue_key(key);
        }
        if let Some(key) = self.shm_queue_key {
            config = config.with_shm_queue_key(key);
        }
        if let Some(bytes) = self.pipe_chunk {
            config = config.with_pipe_chunk(bytes);
        }
        if let Some(bytes) = self.queue_chunk {
            config = config.with_queue_chunk(bytes);
        }
        if let Some(ms) = self.timeout_ms {
            config = config.with_timeout(Some(Duration::from_millis(ms)));
        }
        config.validate()?;
        Ok(config)
    }

    /// Renders `config` back into flags for a child process.
    #[must_use]
    pub fn to_flags(config: &TransportConfig, verbose: bool) -> Vec<OsString> {
        let mut flags: Vec<OsString> = vec![
            "--fifo".into(),
            config.fifo_path.clone().into_os_string(),
            "--queue-key".into(),
            config.queue_key.to_string().into(),
            "--shm-queue-key".into(),
            config.shm_queue_key.to_string().into(),
            "--pipe-chunk".into(),
            config.pipe_chunk.to_string().into(),
            "--queue-chunk".into(),
            config.queue_chunk.to_string().into(),
        ];
        if let Some(ms) = config.timeout_ms {
            flags.push("--timeout-ms".into());
            flags.push(ms.to_string().into());
        }
        if verbose {
            flags.push("--verbose".into());
        }
        flags
    }
}

/// Sends one payload and optionally prints the before-send timestamp.
#[derive(Parser, Debug, Clone)]
#[command(name = "ipc-sender")]
#[command(version, about = "Send one payload over shared memory, a named pipe or a message queue")]
pub struct SenderArgs {
    /// Transport: shared, pipes or queue
    pub transport: TransportKind,

    /// Print the timestamp to stdout (0 or 1)
    #[arg(value_parser = parse_print_flag, action = ArgAction::Set)]
    pub print: bool,

    /// Payload size in MiB (0 sends an empty payload)
    pub size_mb: usize,

    #[command(flatten)]
    pub transport_args: TransportArgs,
}

/// Receives one payload and optionally prints the after-receive timestamp.
#[derive(Parser, Debug, Clone)]
#[command(name = "ipc-receiver")]
#[command(
    version,
    about = "Receive one payload over shared memory, a named pipe or a message queue"
)]
pub struct ReceiverArgs {
    /// Transport: shared, pipes or queue
    pub transport: TransportKind,

    /// Print the timestamp to stdout (0 or 1)
    #[arg(value_parser = parse_print_flag, action = ArgAction::Set)]
    pub print: bool,

    /// Expected payload size in MiB; a mismatch fails the trial
    pub size_mb: Option<usize>,

    /// Write the received payload to this file
    #[arg(long)]
    pub save: Option<PathBuf>,

    #[command(flatten)]
    pub transport_args: TransportArgs,
}

/// Runs a sweep of sender/receiver trials.
#[derive(Parser, Debug, Clone)]
#[command(name = "ipc-driver")]
#[command(version, about = "Run repeated sender/receiver trials and report latency")]
pub struct DriverArgs {
    /// Transport: shared, pipes or queue
    #[arg(long, short)]
    pub transport: TransportKind,

    /// Number of trials
    #[arg(long, short = 'n', default_value_t = 10)]
    pub trials: usize,

    /// Payload size in MiB
    #[arg(long, default_value_t = 1)]
    pub size_mb: usize,

    /// Per-trial CSV output (stdout if not specified)
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Wall-clock limit for one trial, in milliseconds
    #[arg(long, default_value_t = 30_000)]
    pub trial_timeout_ms: u64,

    /// Sender binary (defaults to `ipc-sender` next to this executable)
    #[arg(long)]
    pub sender_bin: Option<PathBuf>,

    /// Receiver binary (defaults to `ipc-receiver` next to this executable)
    #[arg(long)]
    pub receiver_bin: Option<PathBuf>,

    #[command(flatten)]
    pub transport_args: TransportArgs,
}

/// Combines sender and receiver result files.
#[derive(Parser, Debug, Clone)]
#[command(name = "ipc-combine")]
#[command(version, about = "Combine receiver and sender result files")]
pub struct CombineArgs {
    /// Receiver-side file
    pub receiver: PathBuf,

    /// Sender-side file
    pub sender: PathBuf,

    /// Treat inputs as timestamp streams and emit per-trial records
    #[arg(long, requires = "transport")]
    pub timestamps: bool,

    /// Transport the timestamps were taken with
    #[arg(long)]
    pub transport: Option<TransportKind>,

    /// Payload size in MiB for timestamp records
    #[arg(long, default_value_t = 1)]
    pub size_mb: usize,

    /// Output file (stdout if not specified)
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}
