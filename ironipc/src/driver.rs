//! Trial driver: runs sender/receiver process pairs and collects timestamps.
//!
//! Each trial spawns the receiver first, then the sender, both with the
//! print flag set. Keys are derived from the driver's session and the trial
//! index so a trial killed halfway cannot leave objects in the way of the
//! next one.

use crate::cli::{DriverArgs, TransportArgs};
use anyhow::{Context, bail};
use ironipc_bench::{TrialRecord, TrialStatus};
use ironipc_core::Timestamp;
use ironipc_core::payload::MEBIBYTE;
use ironipc_transport::{TransportConfig, TransportError, TransportKind, ensure_fifo};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Exit code a child uses for process-fatal errors.
const CHILD_FATAL: i32 = 2;

/// What one child process produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildOutcome {
    /// Exited 0 and printed a timestamp.
    Reported(Timestamp),
    /// Exited 0 but stdout was not a timestamp.
    Unparsable(String),
    /// Exited with a non-zero code (or by signal, `None`).
    Exited(Option<i32>),
}

impl ChildOutcome {
    fn from_output(output: &std::process::Output) -> Self {
        if !output.status.success() {
            return Self::Exited(output.status.code());
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        match stdout.parse::<Timestamp>() {
            Ok(ts) => Self::Reported(ts),
            Err(_) => Self::Unparsable(stdout.into_owned()),
        }
    }

    fn is_fatal(&self) -> bool {
        *self == Self::Exited(Some(CHILD_FATAL))
    }
}

/// Runs repeated trials of one transport.
#[derive(Debug, Clone)]
pub struct TrialDriver {
    transport: TransportKind,
    trials: usize,
    size_mb: usize,
    trial_timeout: Duration,
    config: TransportConfig,
    sender_bin: PathBuf,
    receiver_bin: PathBuf,
    session: u32,
    verbose: bool,
}

/// Default location of a sibling binary.
fn sibling_binary(name: &str) -> anyhow::Result<PathBuf> {
    let exe = std::env::current_exe().context("cannot locate the driver executable")?;
    Ok(exe.with_file_name(name))
}

impl TrialDriver {
    /// Builds a driver from parsed arguments and the environment.
    ///
    /// # Errors
    /// Returns an error for invalid transport settings or if the sibling
    /// binaries cannot be located.
    pub fn from_args(args: &DriverArgs) -> anyhow::Result<Self> {
        let mut config = args.transport_args.resolve()?;
        let trial_timeout = Duration::from_millis(args.trial_timeout_ms);
        if config.timeout_ms.is_none() {
            // Children give up slightly before the driver kills them.
            let child_ms = args.trial_timeout_ms * 9 / 10;
            config = config.with_timeout(Some(Duration::from_millis(child_ms)));
        }

        Ok(Self {
            transport: args.transport,
            trials: args.trials,
            size_mb: args.size_mb,
            trial_timeout,
            config,
            sender_bin: match &args.sender_bin {
                Some(path) => path.clone(),
                None => sibling_binary("ipc-sender")?,
            },
            receiver_bin: match &args.receiver_bin {
                Some(path) => path.clone(),
                None => sibling_binary("ipc-receiver")?,
            },
            session: std::process::id(),
            verbose: args.transport_args.verbose,
        })
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn payload_bytes(&self) -> u64 {
        (self.size_mb * MEBIBYTE) as u64
    }

    /// Session id mixed into the keys of `trial`: the full pid and trial index.
    #[must_use]
    pub fn session_for(&self, trial: usize) -> u64 {
        (u64::from(self.session) << 32) | (trial as u64 & 0xFFFF_FFFF)
    }

    /// Configuration handed to both children of `trial`.
    ///
    /// # Errors
    /// Returns [`TransportError::InvalidConfig`] in the unlikely case that the
    /// derived payload and side-channel keys coincide.
    pub fn trial_config(&self, trial: usize) -> Result<TransportConfig, TransportError> {
        let config = self.config.clone().for_session(self.session_for(trial));
        config.validate()?;
        Ok(config)
    }

    /// Arguments shared by both children: `<transport> 1 <size-mb>` plus flags.
    fn child_args(&self, trial: usize) -> Result<Vec<OsString>, TransportError> {
        let mut argv: Vec<OsString> = vec![
            self.transport.name().into(),
            "1".into(),
            self.size_mb.to_string().into(),
        ];
        argv.extend(TransportArgs::to_flags(&self.trial_config(trial)?, self.verbose));
        Ok(argv)
    }

    fn spawn(binary: &Path, argv: Vec<OsString>) -> anyhow::Result<tokio::process::Child> {
        Command::new(binary)
            .args(argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", binary.display()))
    }

    /// Runs one trial.
    ///
    /// # Errors
    /// Returns an error if a child cannot be spawned or reports a
    /// process-fatal failure; ordinary trial failures become records.
    pub async fn run_trial(&self, trial: usize) -> anyhow::Result<TrialRecord> {
        let argv = self.child_args(trial)?;
        let receiver = Self::spawn(&self.receiver_bin, argv.clone())?;
        let sender = Self::spawn(&self.sender_bin, argv)?;

        let both = async { tokio::join!(receiver.wait_with_output(), sender.wait_with_output()) };
        let outputs = tokio::time::timeout(self.trial_timeout, both).await;
        let (receiver_out, sender_out) = match outputs {
            Ok(outputs) => outputs,
            Err(_) => {
                // Dropping the futures kills both children.
                tracing::error!(
                    trial,
                    timeout = ?self.trial_timeout,
                    "trial timed out; children killed"
                );
                return Ok(self.failed(trial, TrialStatus::TimedOut));
            }
        };

        let receiver = ChildOutcome::from_output(&receiver_out.context("receiver wait failed")?);
        let sender = ChildOutcome::from_output(&sender_out.context("sender wait failed")?);

        if receiver.is_fatal() || sender.is_fatal() {
            bail!(
                "trial {trial}: child reported a process-fatal error \
                 (receiver {receiver:?}, sender {sender:?})"
            );
        }

        match (sender, receiver) {
            (ChildOutcome::Reported(sent), ChildOutcome::Reported(received)) => {
                let record = TrialRecord::completed(
                    trial,
                    self.transport,
                    self.payload_bytes(),
                    sent,
                    received,
                );
                tracing::debug!(trial, latency_ns = ?record.latency_ns(), "trial complete");
                Ok(record)
            }
            (sender, receiver) => {
                tracing::error!(trial, ?sender, ?receiver, "trial failed");
                Ok(self.failed(trial, TrialStatus::Failed))
            }
        }
    }

    fn failed(&self, trial: usize, status: TrialStatus) -> TrialRecord {
        TrialRecord::failed(trial, self.transport, self.payload_bytes(), status)
    }

    /// Runs every trial in sequence.
    ///
    /// # Errors
    /// Returns an error if the FIFO cannot be prepared or a trial hits a
    /// process-fatal failure.
    pub async fn run(&self) -> anyhow::Result<Vec<TrialRecord>> {
        if self.transport == TransportKind::Pipe {
            ensure_fifo(&self.config.fifo_path)?;
        }

        tracing::info!(
            transport = %self.transport,
            trials = self.trials,
            bytes = self.payload_bytes(),
            session = self.session,
            "starting sweep"
        );

        let mut records = Vec::with_capacity(self.trials);
        for trial in 0..self.trials {
            records.push(self.run_trial(trial).await?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::os::unix::process::ExitStatusExt;

    fn driver() -> TrialDriver {
        let args = DriverArgs::try_parse_from([
            "ipc-driver",
            "--transport",
            "queue",
            "--sender-bin",
            "true",
            "--receiver-bin",
            "true",
        ])
        .unwrap();
        TrialDriver::from_args(&args).unwrap()
    }

    #[test]
    fn test_trial_keys_differ() {
        let driver = driver();
        let first = driver.trial_config(0).unwrap();
        let second = driver.trial_config(1).unwrap();
        assert_ne!(first.queue_key, second.queue_key);
        assert_ne!(first.shm_queue_key, second.shm_queue_key);
        assert_ne!(first.queue_key, first.shm_queue_key);
        first.validate().unwrap();
    }

    #[test]
    fn test_sessions_keep_the_whole_pid() {
        let mut first = driver();
        let mut second = driver();
        first.session = 4242;
        second.session = 4242 + 1024;
        assert_ne!(first.session_for(0), second.session_for(0));
        assert_ne!(
            first.trial_config(0).unwrap().queue_key,
            second.trial_config(0).unwrap().queue_key
        );
        assert_ne!(first.session_for(0), first.session_for(1024));
    }

    #[test]
    fn test_children_inherit_timeout() {
        let driver = driver();
        let config = driver.trial_config(0).unwrap();
        assert_eq!(config.timeout(), Some(Duration::from_millis(27_000)));
    }

    #[test]
    fn test_child_args() {
        let argv = driver().child_args(3).unwrap();
        assert_eq!(argv[0], "queue");
        assert_eq!(argv[1], "1");
        assert_eq!(argv[2], "1");
        assert!(argv.iter().any(|a| a == "--queue-key"));
    }

    #[test]
    fn test_child_outcome() {
        let ok = std::process::Output {
            status: std::process::ExitStatus::from_raw(0),
            stdout: b"12345".to_vec(),
            stderr: Vec::new(),
        };
        assert_eq!(
            ChildOutcome::from_output(&ok),
            ChildOutcome::Reported(Timestamp::from_nanos(12_345))
        );

        let garbage = std::process::Output {
            stdout: b"oops".to_vec(),
            ..ok.clone()
        };
        assert!(matches!(
            ChildOutcome::from_output(&garbage),
            ChildOutcome::Unparsable(_)
        ));

        // Wait status 2 << 8 is exit code 2.
        let fatal = std::process::Output {
            status: std::process::ExitStatus::from_raw(2 << 8),
            ..ok
        };
        let outcome = ChildOutcome::from_output(&fatal);
        assert!(outcome.is_fatal());
    }

    #[tokio::test]
    async fn test_silent_children_fail_the_trial() {
        // `true` exits 0 without printing a timestamp.
        let record = driver().run_trial(0).await.unwrap();
        assert_eq!(record.status, TrialStatus::Failed);
        assert_eq!(record.latency_ns(), None);
    }

    #[tokio::test]
    async fn test_hung_children_time_out() {
        // `yes` never exits and keeps stdout busy.
        let args = DriverArgs::try_parse_from([
            "ipc-driver",
            "--transport",
            "shared",
            "--trial-timeout-ms",
            "50",
            "--sender-bin",
            "yes",
            "--receiver-bin",
            "yes",
        ])
        .unwrap();
        let driver = TrialDriver::from_args(&args).unwrap();
        let record = driver.run_trial(0).await.unwrap();
        assert_eq!(record.status, TrialStatus::TimedOut);
    }
}
