//! Sender and receiver entry points used by the binaries.

use crate::cli::{ReceiverArgs, SenderArgs};
use anyhow::Context;
use ironipc_core::payload::{MEBIBYTE, random_payload};
use ironipc_core::{LatencyProbe, Timestamp};
use ironipc_transport::{Severity, TransportError, open_transport};
use std::io::Write;
use std::process::ExitCode;

/// Exit code of a successful run.
pub const EXIT_OK: u8 = 0;
/// Exit code when the trial failed but the environment is sound.
pub const EXIT_TRIAL_FAILED: u8 = 1;
/// Exit code for argument, configuration or environment errors.
pub const EXIT_FATAL: u8 = 2;

/// Maps an error to the process exit code.
#[must_use]
pub fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<TransportError>().map(TransportError::severity) {
        Some(Severity::Trial) => EXIT_TRIAL_FAILED,
        Some(Severity::Process) | None => EXIT_FATAL,
    }
}

/// Logs `result` and converts it to an [`ExitCode`].
pub fn finish<T>(role: &str, result: anyhow::Result<T>) -> ExitCode {
    match result {
        Ok(_) => ExitCode::from(EXIT_OK),
        Err(err) => {
            tracing::error!(role, error = %format!("{err:#}"), "run failed");
            ExitCode::from(exit_code(&err))
        }
    }
}

fn payload_bytes(size_mb: usize) -> anyhow::Result<usize> {
    size_mb
        .checked_mul(MEBIBYTE)
        .ok_or_else(|| TransportError::invalid_config(format!("{size_mb} MiB overflows")).into())
}

/// Sends one payload of `args.size_mb` MiB of random bytes.
///
/// # Errors
/// Returns configuration and transport errors; a [`TransportError`] stays
/// downcastable for [`exit_code`].
pub fn run_sender<W: Write>(args: &SenderArgs, out: &mut W) -> anyhow::Result<Timestamp> {
    let config = args.transport_args.resolve()?;
    payload_bytes(args.size_mb)?;
    let payload = random_payload(args.size_mb);

    let mut transport = open_transport(args.transport, &config)?;
    let probe = LatencyProbe::new(args.print);
    tracing::debug!(transport = %args.transport, bytes = payload.len(), "sending");

    let sent_at = transport.send(&payload, &probe)?;
    probe.emit(sent_at, out).context("failed to write timestamp")?;
    tracing::info!(transport = %args.transport, bytes = payload.len(), %sent_at, "payload sent");
    Ok(sent_at)
}

/// Receives one payload and checks it against the expected size, if given.
///
/// # Errors
/// Returns configuration and transport errors, a framing error on a size
/// mismatch, or an IO error if saving the payload fails.
pub fn run_receiver<W: Write>(args: &ReceiverArgs, out: &mut W) -> anyhow::Result<Timestamp> {
    let config = args.transport_args.resolve()?;
    let expected = args.size_mb.map(payload_bytes).transpose()?;

    let mut transport = open_transport(args.transport, &config)?;
    let probe = LatencyProbe::new(args.print);
    tracing::debug!(transport = %args.transport, "waiting for payload");

    let received = transport.receive(&probe)?;
    if let Some(expected) = expected {
        if received.payload.len() != expected {
            return Err(TransportError::framing(format!(
                "received {} bytes, expected {expected}",
                received.payload.len()
            ))
            .into());
        }
    }

    probe
        .emit(received.timestamp, out)
        .context("failed to write timestamp")?;

    if let Some(path) = &args.save {
        std::fs::write(path, &received.payload)
            .with_context(|| format!("failed to save payload to {}", path.display()))?;
    }

    tracing::info!(
        transport = %args.transport,
        bytes = received.payload.len(),
        received_at = %received.timestamp,
        "payload received"
    );
    Ok(received.timestamp)
}
