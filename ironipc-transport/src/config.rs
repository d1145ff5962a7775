//! Transport configuration.
//!
//! Resolution order: command line → environment variables → defaults.

use crate::error::TransportError;
use ironipc_core::ChunkSize;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default FIFO path, relative to the working directory.
pub const DEFAULT_FIFO_PATH: &str = "pipe";

/// Default key of the payload message queue.
pub const DEFAULT_QUEUE_KEY: IpcKey = IpcKey(80);

/// Default key of the shared memory side-channel queue.
pub const DEFAULT_SHM_QUEUE_KEY: IpcKey = IpcKey(91);

/// System V IPC key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IpcKey(pub i32);

impl IpcKey {
    /// Derives a key for `session` from a well-known `base`.
    ///
    /// Every bit of both inputs feeds a 64-bit mix that is folded to a
    /// positive 31-bit key, so distinct inputs collide only by chance
    /// (about 2^-31 per pair). Callers that need a guarantee should
    /// [`TransportConfig::validate`] the derived configuration.
    #[must_use]
    pub fn for_session(base: IpcKey, session: u64) -> IpcKey {
        let mixed = mix64(mix64(u64::from(base.0 as u32)) ^ session);
        let folded = (mixed ^ (mixed >> 32)) as u32 & 0x7FFF_FFFF;
        // IPC_PRIVATE is 0 and must never be produced.
        IpcKey(folded.max(1) as i32)
    }

    /// Returns the raw key for System V calls.
    #[must_use]
    pub fn as_raw(self) -> libc::key_t {
        self.0 as libc::key_t
    }
}

/// SplitMix64 finalizer.
const fn mix64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

impl std::fmt::Display for IpcKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for IpcKey {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(IpcKey)
    }
}

/// Configuration shared by sender and receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Path of the pre-created FIFO.
    pub fifo_path: PathBuf,
    /// Key of the payload message queue.
    pub queue_key: IpcKey,
    /// Key of the queue carrying the shared memory handle.
    pub shm_queue_key: IpcKey,
    /// Pipe chunk size in bytes.
    pub pipe_chunk: usize,
    /// Message queue chunk size in bytes.
    pub queue_chunk: usize,
    /// Timeout for every blocking step in milliseconds. `None` blocks forever.
    pub timeout_ms: Option<u64>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            fifo_path: PathBuf::from(DEFAULT_FIFO_PATH),
            queue_key: DEFAULT_QUEUE_KEY,
            shm_queue_key: DEFAULT_SHM_QUEUE_KEY,
            pipe_chunk: ChunkSize::PIPE.get(),
            queue_chunk: ChunkSize::MESSAGE_QUEUE.get(),
            timeout_ms: None,
        }
    }
}

impl TransportConfig {
    /// Defaults overridden by `IRONIPC_*` environment variables.
    ///
    /// # Errors
    /// Returns [`TransportError::InvalidConfig`] if a variable is set but
    /// cannot be parsed.
    pub fn from_env() -> Result<Self, TransportError> {
        Self::default().with_env_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides looked up through `lookup`.
    ///
    /// # Errors
    /// Returns [`TransportError::InvalidConfig`] on an unparsable value.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self, TransportError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("IRONIPC_FIFO") {
            self.fifo_path = PathBuf::from(path);
        }
        if let Some(key) = lookup("IRONIPC_QUEUE_KEY") {
            self.queue_key = parse_env("IRONIPC_QUEUE_KEY", &key)?;
        }
        if let Some(key) = lookup("IRONIPC_SHM_QUEUE_KEY") {
            self.shm_queue_key = parse_env("IRONIPC_SHM_QUEUE_KEY", &key)?;
        }
        if let Some(ms) = lookup("IRONIPC_TIMEOUT_MS") {
            self.timeout_ms = Some(parse_env("IRONIPC_TIMEOUT_MS", &ms)?);
        }
        Ok(self)
    }

    /// Sets the FIFO path.
    #[must_use]
    pub fn with_fifo_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.fifo_path = path.into();
        self
    }

    /// Sets the payload queue key.
    #[must_use]
    pub fn with_queue_key(mut self, key: IpcKey) -> Self {
        self.queue_key = key;
        self
    }

    /// Sets the side-channel queue key.
    #[must_use]
    pub fn with_shm_queue_key(mut self, key: IpcKey) -> Self {
        self.shm_queue_key = key;
        self
    }

    /// Sets the pipe chunk size.
    #[must_use]
    pub fn with_pipe_chunk(mut self, bytes: usize) -> Self {
        self.pipe_chunk = bytes;
        self
    }

    /// Sets the message queue chunk size.
    #[must_use]
    pub fn with_queue_chunk(mut self, bytes: usize) -> Self {
        self.queue_chunk = bytes;
        self
    }

    /// Sets the timeout for blocking steps.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    /// Derives session-unique keys from the configured ones.
    #[must_use]
    pub fn for_session(mut self, session: u64) -> Self {
        self.queue_key = IpcKey::for_session(self.queue_key, session);
        self.shm_queue_key = IpcKey::for_session(self.shm_queue_key, session);
        self
    }

    /// Returns the timeout for blocking steps.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Returns the validated pipe chunk size.
    ///
    /// # Errors
    /// Returns [`TransportError::InvalidConfig`] if the size is zero.
    pub fn pipe_chunk_size(&self) -> Result<ChunkSize, TransportError> {
        Ok(ChunkSize::new(self.pipe_chunk)?)
    }

    /// Returns the validated message queue chunk size.
    ///
    /// # Errors
    /// Returns [`TransportError::InvalidConfig`] if the size is zero.
    pub fn queue_chunk_size(&self) -> Result<ChunkSize, TransportError> {
        Ok(ChunkSize::new(self.queue_chunk)?)
    }

    /// Checks the configuration for inconsistencies.
    ///
    /// # Errors
    /// Returns [`TransportError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.fifo_path.as_os_str().is_empty() {
            return Err(TransportError::invalid_config("FIFO path is empty"));
        }
        if self.queue_key == self.shm_queue_key {
            return Err(TransportError::invalid_config(format!(
                "payload queue and side-channel share key {}",
                self.queue_key
            )));
        }
        if self.queue_key.0 == libc::IPC_PRIVATE || self.shm_queue_key.0 == libc::IPC_PRIVATE {
            return Err(TransportError::invalid_config(
                "queue keys must not be IPC_PRIVATE (0)",
            ));
        }
        self.pipe_chunk_size()?;
        self.queue_chunk_size()?;
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, TransportError> {
    value
        .trim()
        .parse()
        .map_err(|_| TransportError::invalid_config(format!("{name}={value:?} is not valid")))
}
