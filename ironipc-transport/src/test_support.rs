//! Helpers shared by the transport tests.

use crate::config::IpcKey;
use crate::pipe::ensure_fifo;
use crate::transport::Transport;
use ironipc_core::LatencyProbe;
use ironipc_core::payload::seeded_bytes;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};
use std::thread;
use tempfile::TempDir;

static NEXT_KEY: AtomicI32 = AtomicI32::new(0);

/// Returns a key no other test in this process (or a concurrent test run)
/// will use.
pub(crate) fn unique_key() -> IpcKey {
    let pid = std::process::id() as i32 & 0xFFFF;
    let counter = NEXT_KEY.fetch_add(1, Ordering::Relaxed) & 0xFFF;
    IpcKey(0x4000_0000 | (pid << 12) | counter)
}

/// Creates a FIFO named `name` in a fresh temporary directory.
pub(crate) fn fifo_in(name: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(name);
    ensure_fifo(&path).unwrap();
    (dir, path)
}

/// Sends a `size`-byte payload from a sender thread and checks the
/// receiver reassembles it exactly.
pub(crate) fn round_trip<S, R>(mut sender: S, mut receiver: R, size: usize)
where
    S: Transport + Send + 'static,
    R: Transport,
{
    let payload = seeded_bytes(size, size as u64);
    let expected = payload.clone();

    let handle = thread::spawn(move || sender.send(&payload, &LatencyProbe::silent()));
    let received = receiver.receive(&LatencyProbe::silent()).unwrap();
    let sent_at = handle.join().unwrap().unwrap();

    assert_eq!(received.payload.len(), size, "size {size}");
    assert!(received.payload == expected, "payload mismatch for size {size}");
    assert!(received.timestamp.as_nanos() > 0);
    assert!(sent_at.as_nanos() > 0);
}
