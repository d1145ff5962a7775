//! Named pipe (FIFO) transport.
//!
//! Wire format: `[4-byte length (little-endian)][payload]`, the payload
//! written in chunks through [`ChunkedChannel`].

use crate::config::TransportConfig;
use crate::deadline::{Backoff, Deadline};
use crate::error::{Resource, TransportError};
use crate::framing::{self, SIZE_FIELD_LEN};
use crate::transport::{Received, Transport, TransportKind};
use ironipc_core::{
    ChunkSink, ChunkSize, ChunkSource, ChunkedChannel, LatencyProbe, ProbePoint, Timestamp,
};
use nix::sys::stat::Mode;
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Creates a FIFO at `path` unless one already exists.
///
/// # Errors
/// Returns [`TransportError::InvalidConfig`] if `path` exists but is not a
/// FIFO, or [`TransportError::ResourceCreation`] if `mkfifo` fails.
pub fn ensure_fifo(path: &Path) -> Result<(), TransportError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.file_type().is_fifo() => Ok(()),
        Ok(_) => Err(TransportError::invalid_config(format!(
            "{} exists and is not a FIFO",
            path.display()
        ))),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            nix::unistd::mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR).map_err(|errno| {
                TransportError::ResourceCreation {
                    resource: Resource::Fifo,
                    source: errno.into(),
                }
            })?;
            tracing::debug!(path = %path.display(), "fifo created");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Waits until `file` is ready for `events`, for at most `timeout`.
fn wait_ready(
    file: &File,
    events: libc::c_short,
    timeout: Option<Duration>,
    operation: &'static str,
) -> io::Result<()> {
    let deadline = Deadline::after(timeout);
    let mut pollfd = libc::pollfd {
        fd: file.as_raw_fd(),
        events,
        revents: 0,
    };

    loop {
        // SAFETY: one valid pollfd.
        let rc = unsafe { libc::poll(&mut pollfd, 1, deadline.poll_timeout_ms()) };
        if rc > 0 {
            // Readiness, hang-up or error: the following read/write reports which.
            return Ok(());
        }
        if rc == 0 {
            return Err(deadline.timeout_error(operation).into_io());
        }
        let err = io::Error::last_os_error();
        if err.kind() != ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Write end of a FIFO.
#[derive(Debug)]
pub struct FifoWriter {
    file: File,
    timeout: Option<Duration>,
}

impl FifoWriter {
    /// Opens `path` for writing, waiting for a reader.
    ///
    /// Without a timeout this blocks in `open(2)` like any FIFO writer. With
    /// one, the open is retried non-blocking until a reader appears.
    ///
    /// # Errors
    /// Returns [`TransportError::Timeout`] if no reader appears in time, or
    /// [`TransportError::ResourceCreation`] if the FIFO cannot be opened.
    pub fn open(path: &Path, timeout: Option<Duration>) -> Result<Self, TransportError> {
        let deadline = Deadline::after(timeout);
        let mut options = OpenOptions::new();
        options.write(true);
        if deadline.is_bounded() {
            options.custom_flags(libc::O_NONBLOCK);
        }

        let mut backoff = Backoff::default();
        loop {
            match options.open(path) {
                Ok(file) => {
                    tracing::debug!(path = %path.display(), "fifo opened for writing");
                    return Ok(Self { file, timeout });
                }
                Err(e) if e.raw_os_error() == Some(libc::ENXIO) => {
                    if deadline.expired() {
                        return Err(deadline.timeout_error("fifo open for writing"));
                    }
                    backoff.snooze();
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(source) => {
                    return Err(TransportError::ResourceCreation {
                        resource: Resource::Fifo,
                        source,
                    });
                }
            }
        }
    }

    /// Writes the size field in one `write(2)`.
    ///
    /// Four bytes are below `PIPE_BUF`, so the write is atomic.
    ///
    /// # Errors
    /// Returns [`TransportError::Framing`] on a short write.
    pub fn write_size(&mut self, field: &[u8; SIZE_FIELD_LEN]) -> Result<(), TransportError> {
        let written = loop {
            match self.write_chunk(field) {
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                other => break other.map_err(TransportError::from_io)?,
            }
        };
        if written != SIZE_FIELD_LEN {
            return Err(TransportError::framing(format!(
                "wrote {written} of {SIZE_FIELD_LEN} size field bytes"
            )));
        }
        Ok(())
    }
}

impl ChunkSink for FifoWriter {
    fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<usize> {
        loop {
            match self.file.write(chunk) {
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    wait_ready(&self.file, libc::POLLOUT, self.timeout, "fifo write")?;
                }
                other => return other,
            }
        }
    }
}

/// Read end of a FIFO.
#[derive(Debug)]
pub struct FifoReader {
    file: File,
    timeout: Option<Duration>,
}

impl FifoReader {
    /// Opens `path` for reading.
    ///
    /// The descriptor is non-blocking and every read first waits in
    /// `poll(2)`, so the rendezvous with the writer happens on the first
    /// read rather than in `open(2)`.
    ///
    /// # Errors
    /// Returns [`TransportError::ResourceCreation`] if the FIFO cannot be opened.
    pub fn open(path: &Path, timeout: Option<Duration>) -> Result<Self, TransportError> {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|source| TransportError::ResourceCreation {
                resource: Resource::Fifo,
                source,
            })?;
        tracing::debug!(path = %path.display(), "fifo opened for reading");
        Ok(Self { file, timeout })
    }

    /// Reads the size field with a single exact-size read.
    ///
    /// # Errors
    /// Returns [`TransportError::Framing`] if fewer than
    /// [`SIZE_FIELD_LEN`] bytes arrive.
    pub fn read_size(&mut self) -> Result<usize, TransportError> {
        let mut field = [0u8; SIZE_FIELD_LEN];
        let read = loop {
            match self.read_chunk(&mut field) {
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                other => break other.map_err(TransportError::from_io)?,
            }
        };
        framing::decode_size(&field[..read])
    }
}

impl ChunkSource for FifoReader {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            wait_ready(&self.file, libc::POLLIN, self.timeout, "fifo read")?;
            match self.file.read(buf) {
                Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
                other => return other,
            }
        }
    }
}

/// Payload transfer over a pre-created FIFO.
#[derive(Debug, Clone)]
pub struct PipeTransport {
    path: PathBuf,
    chunk_size: ChunkSize,
    timeout: Option<Duration>,
}

impl PipeTransport {
    /// Creates a pipe transport.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, chunk_size: ChunkSize, timeout: Option<Duration>) -> Self {
        Self {
            path: path.into(),
            chunk_size,
            timeout,
        }
    }

    /// Creates a pipe transport from configuration.
    ///
    /// # Errors
    /// Returns [`TransportError::InvalidConfig`] if the chunk size is zero.
    pub fn from_config(config: &TransportConfig) -> Result<Self, TransportError> {
        Ok(Self::new(
            config.fifo_path.clone(),
            config.pipe_chunk_size()?,
            config.timeout(),
        ))
    }

    /// FIFO path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Transport for PipeTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Pipe
    }

    fn send(&mut self, payload: &[u8], probe: &LatencyProbe) -> Result<Timestamp, TransportError> {
        let size_field = framing::encode_size(payload.len())?;

        let sent_at = probe.capture(ProbePoint::BeforeSend)?;
        let mut writer = FifoWriter::open(&self.path, self.timeout)?;
        writer.write_size(&size_field)?;

        let mut channel = ChunkedChannel::new(writer, self.chunk_size);
        let chunks = channel.write_all(payload)?;
        tracing::debug!(bytes = payload.len(), chunks, "pipe payload sent");
        Ok(sent_at)
    }

    fn receive(&mut self, probe: &LatencyProbe) -> Result<Received, TransportError> {
        let mut reader = FifoReader::open(&self.path, self.timeout)?;
        let size = reader.read_size()?;

        let mut channel = ChunkedChannel::new(reader, self.chunk_size);
        let payload = channel.read_all(size)?;
        let timestamp = probe.capture(ProbePoint::AfterReceive)?;
        tracing::debug!(bytes = size, "pipe payload received");
        Ok(Received { payload, timestamp })
    }
}
