//! Chunked bulk transfer over a primitive byte channel.
//!
//! A payload is split into ordered chunks of at most [`ChunkSize`] bytes.
//! There is no sequence number on the wire: the underlying channel must be
//! reliable and ordered, so transmission order is chunk order.

use crate::error::{Error, Result};
use std::io::ErrorKind;
use std::num::NonZeroUsize;
use std::ops::Range;

const fn non_zero(size: usize) -> NonZeroUsize {
    match NonZeroUsize::new(size) {
        Some(size) => size,
        None => panic!("chunk size constant must be non-zero"),
    }
}

/// Validated, strictly positive chunk length in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkSize(NonZeroUsize);

impl ChunkSize {
    /// Default chunk size for named pipes (4 KiB).
    pub const PIPE: Self = Self(non_zero(4 * 1024));

    /// Large chunk size for named pipes (64 KiB, one full pipe buffer).
    pub const PIPE_LARGE: Self = Self(non_zero(64 * 1024));

    /// Default chunk size for System V message queues (8 KiB, the stock `MSGMAX`).
    pub const MESSAGE_QUEUE: Self = Self(non_zero(8 * 1024));

    /// Creates a chunk size.
    ///
    /// # Errors
    /// Returns [`Error::InvalidChunkSize`] if `size` is zero.
    pub fn new(size: usize) -> Result<Self> {
        NonZeroUsize::new(size)
            .map(Self)
            .ok_or(Error::InvalidChunkSize { size })
    }

    /// Returns the chunk size in bytes.
    #[must_use]
    pub const fn get(self) -> usize {
        self.0.get()
    }
}

impl std::fmt::Display for ChunkSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Returns the number of chunks a payload of `size` bytes is split into.
#[must_use]
pub fn chunk_count(size: usize, chunk_size: ChunkSize) -> usize {
    size.div_ceil(chunk_size.get())
}

/// Returns the byte ranges of every chunk of a `size`-byte payload, in order.
#[must_use]
pub fn chunk_plan(size: usize, chunk_size: ChunkSize) -> ChunkPlan {
    ChunkPlan {
        next: 0,
        size,
        chunk_size: chunk_size.get(),
    }
}

/// Iterator over the chunk ranges of a payload.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    next: usize,
    size: usize,
    chunk_size: usize,
}

impl Iterator for ChunkPlan {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.size {
            return None;
        }
        let start = self.next;
        let end = start + (self.size - start).min(self.chunk_size);
        self.next = end;
        Some(start..end)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.size - self.next.min(self.size)).div_ceil(self.chunk_size);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ChunkPlan {}

/// Write side of a primitive channel (pipe, message queue, ...).
pub trait ChunkSink {
    /// Writes up to `chunk.len()` bytes and returns how many were accepted.
    ///
    /// # Errors
    /// Returns the channel's IO error. `ErrorKind::Interrupted` is retried by
    /// the caller; any other error aborts the transfer.
    fn write_chunk(&mut self, chunk: &[u8]) -> std::io::Result<usize>;
}

/// Read side of a primitive channel.
pub trait ChunkSource {
    /// Reads up to `buf.len()` bytes into `buf` and returns how many were
    /// read. `Ok(0)` signals end of stream.
    ///
    /// # Errors
    /// Returns the channel's IO error.
    fn read_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
}

impl<T: ChunkSink + ?Sized> ChunkSink for &mut T {
    fn write_chunk(&mut self, chunk: &[u8]) -> std::io::Result<usize> {
        (**self).write_chunk(chunk)
    }
}

impl<T: ChunkSource + ?Sized> ChunkSource for &mut T {
    fn read_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        (**self).read_chunk(buf)
    }
}

/// Splits and reassembles payloads over a primitive channel.
///
/// Every short write or read is continued until its chunk is complete;
/// end of stream or a zero-length write before completion is reported as
/// [`Error::PartialTransfer`].
#[derive(Debug)]
pub struct ChunkedChannel<C> {
    inner: C,
    chunk_size: ChunkSize,
}

impl<C> ChunkedChannel<C> {
    /// Wraps a primitive channel.
    #[must_use]
    pub fn new(inner: C, chunk_size: ChunkSize) -> Self {
        Self { inner, chunk_size }
    }

    /// Returns the configured chunk size.
    #[must_use]
    pub fn chunk_size(&self) -> ChunkSize {
        self.chunk_size
    }

    /// Returns a reference to the underlying channel.
    #[must_use]
    pub fn get_ref(&self) -> &C {
        &self.inner
    }

    /// Returns a mutable reference to the underlying channel.
    pub fn get_mut(&mut self) -> &mut C {
        &mut self.inner
    }

    /// Unwraps the underlying channel.
    pub fn into_inner(self) -> C {
        self.inner
    }
}

impl<C: ChunkSink> ChunkedChannel<C> {
    /// Writes the whole buffer as a sequence of chunks.
    ///
    /// # Returns
    /// The number of chunks written.
    ///
    /// # Errors
    /// Returns [`Error::PartialTransfer`] if the channel stops accepting
    /// bytes, or [`Error::Io`] for any other channel failure.
    pub fn write_all(&mut self, buffer: &[u8]) -> Result<usize> {
        let total = buffer.len();
        let mut chunks = 0;

        for range in chunk_plan(total, self.chunk_size) {
            let offset = range.start;
            let chunk = &buffer[range];
            let mut written = 0;

            while written < chunk.len() {
                match self.inner.write_chunk(&chunk[written..]) {
                    Ok(0) => return Err(Error::partial(offset + written, total)),
                    Ok(n) => written += n.min(chunk.len() - written),
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                }
            }
            chunks += 1;
        }

        Ok(chunks)
    }
}

impl<C: ChunkSource> ChunkedChannel<C> {
    /// Reads exactly `expected_size` bytes into a freshly allocated buffer.
    ///
    /// # Errors
    /// Returns [`Error::PartialTransfer`] if the channel ends early, or
    /// [`Error::Io`] for any other channel failure.
    pub fn read_all(&mut self, expected_size: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; expected_size];
        self.read_into(&mut buffer)?;
        Ok(buffer)
    }

    /// Fills `dst` completely, chunk by chunk.
    ///
    /// # Returns
    /// The number of chunks read.
    ///
    /// # Errors
    /// Same as [`ChunkedChannel::read_all`].
    pub fn read_into(&mut self, dst: &mut [u8]) -> Result<usize> {
        let total = dst.len();
        let mut chunks = 0;

        for range in chunk_plan(total, self.chunk_size) {
            let offset = range.start;
            let chunk = &mut dst[range];
            let mut filled = 0;

            while filled < chunk.len() {
                match self.inner.read_chunk(&mut chunk[filled..]) {
                    Ok(0) => return Err(Error::partial(offset + filled, total)),
                    Ok(n) => filled += n.min(chunk.len() - filled),
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                }
            }
            chunks += 1;
        }

        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::io;

    /// In-memory channel that records the length of every call.
    #[derive(Default)]
    struct RecordingChannel {
        data: VecDeque<u8>,
        writes: Vec<usize>,
        reads: Vec<usize>,
        max_per_call: Option<usize>,
    }

    impl ChunkSink for RecordingChannel {
        fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<usize> {
            let n = self.max_per_call.map_or(chunk.len(), |m| m.min(chunk.len()));
            self.data.extend(&chunk[..n]);
            self.writes.push(n);
            Ok(n)
        }
    }

    impl ChunkSource for RecordingChannel {
        fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let limit = self.max_per_call.map_or(buf.len(), |m| m.min(buf.len()));
            let n = limit.min(self.data.len());
            for (slot, byte) in buf.iter_mut().zip(self.data.drain(..n)) {
                *slot = byte;
            }
            self.reads.push(n);
            Ok(n)
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn test_chunk_size_rejects_zero() {
        assert!(matches!(
            ChunkSize::new(0),
            Err(Error::InvalidChunkSize { size: 0 })
        ));
        assert_eq!(ChunkSize::new(7).unwrap().get(), 7);
    }

    #[test]
    fn test_chunk_size_constants() {
        assert_eq!(ChunkSize::PIPE.get(), 4096);
        assert_eq!(ChunkSize::PIPE_LARGE.get(), 65536);
        assert_eq!(ChunkSize::MESSAGE_QUEUE.get(), 8192);
    }

    #[test]
    fn test_chunk_boundaries() {
        let chunk = ChunkSize::new(16).unwrap();
        let ranges: Vec<_> = chunk_plan(3 * 16 + 7, chunk).collect();
        assert_eq!(ranges.len(), 4);
        assert_eq!(ranges[0], 0..16);
        assert_eq!(ranges[2], 32..48);
        assert_eq!(ranges[3], 48..55);
        assert_eq!(chunk_count(3 * 16 + 7, chunk), 4);
    }

    #[test]
    fn test_even_division_ends_with_full_chunk() {
        let chunk = ChunkSize::new(8).unwrap();
        let lens: Vec<_> = chunk_plan(32, chunk).map(|r| r.len()).collect();
        assert_eq!(lens, vec![8, 8, 8, 8]);
    }

    #[test]
    fn test_write_all_chunk_lengths() {
        let chunk = ChunkSize::PIPE;
        let payload = pattern(3 * chunk.get() + 7);
        let mut channel = ChunkedChannel::new(RecordingChannel::default(), chunk);

        let chunks = channel.write_all(&payload).unwrap();
        assert_eq!(chunks, 4);
        assert_eq!(channel.get_ref().writes, vec![4096, 4096, 4096, 7]);
        assert_eq!(channel.get_ref().data.len(), payload.len());
    }

    #[test]
    fn test_read_all_chunk_lengths() {
        let chunk = ChunkSize::PIPE;
        let payload = pattern(3 * chunk.get() + 7);
        let mut recording = RecordingChannel::default();
        recording.data.extend(&payload);

        let mut channel = ChunkedChannel::new(recording, chunk);
        let received = channel.read_all(payload.len()).unwrap();
        assert_eq!(received, payload);
        assert_eq!(channel.get_ref().reads, vec![4096, 4096, 4096, 7]);
    }

    #[test]
    fn test_zero_size_transfers_nothing() {
        let mut channel = ChunkedChannel::new(RecordingChannel::default(), ChunkSize::PIPE);
        assert_eq!(channel.write_all(&[]).unwrap(), 0);
        assert!(channel.read_all(0).unwrap().is_empty());
        assert!(channel.get_ref().writes.is_empty());
        assert!(channel.get_ref().reads.is_empty());
    }

    #[test]
    fn test_short_io_is_continued() {
        let chunk = ChunkSize::new(10).unwrap();
        let payload = pattern(25);
        let recording = RecordingChannel {
            max_per_call: Some(3),
            ..Default::default()
        };
        let mut channel = ChunkedChannel::new(recording, chunk);

        assert_eq!(channel.write_all(&payload).unwrap(), 3);
        assert_eq!(channel.read_all(25).unwrap(), payload);
        assert!(channel.get_ref().writes.iter().all(|&n| n <= 3));
    }

    #[test]
    fn test_end_of_stream_is_partial_transfer() {
        let mut recording = RecordingChannel::default();
        recording.data.extend(pattern(10));
        let mut channel = ChunkedChannel::new(recording, ChunkSize::new(4).unwrap());

        match channel.read_all(12) {
            Err(Error::PartialTransfer {
                transferred,
                expected,
            }) => {
                assert_eq!(transferred, 10);
                assert_eq!(expected, 12);
            }
            other => panic!("expected partial transfer, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_write_is_partial_transfer() {
        struct Closed;
        impl ChunkSink for Closed {
            fn write_chunk(&mut self, _chunk: &[u8]) -> io::Result<usize> {
                Ok(0)
            }
        }

        let mut channel = ChunkedChannel::new(Closed, ChunkSize::new(4).unwrap());
        assert!(matches!(
            channel.write_all(b"abc"),
            Err(Error::PartialTransfer {
                transferred: 0,
                expected: 3
            })
        ));
    }

    #[test]
    fn test_interrupted_is_retried() {
        struct Flaky {
            interrupted: bool,
            seen: Vec<u8>,
        }
        impl ChunkSink for Flaky {
            fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<usize> {
                if !self.interrupted {
                    self.interrupted = true;
                    return Err(io::Error::from(io::ErrorKind::Interrupted));
                }
                self.seen.extend_from_slice(chunk);
                Ok(chunk.len())
            }
        }

        let mut channel = ChunkedChannel::new(
            Flaky {
                interrupted: false,
                seen: Vec::new(),
            },
            ChunkSize::new(4).unwrap(),
        );
        channel.write_all(b"hello").unwrap();
        assert_eq!(channel.into_inner().seen, b"hello");
    }

    #[test]
    fn test_io_error_propagates() {
        struct Broken;
        impl ChunkSource for Broken {
            fn read_chunk(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::from(io::ErrorKind::BrokenPipe))
            }
        }

        let mut channel = ChunkedChannel::new(Broken, ChunkSize::PIPE);
        assert!(matches!(channel.read_all(1), Err(Error::Io(_))));
    }

    proptest! {
        #[test]
        fn prop_chunk_plan_covers_payload(size in 0usize..100_000, chunk in 1usize..10_000) {
            let chunk_size = ChunkSize::new(chunk).unwrap();
            let ranges: Vec<_> = chunk_plan(size, chunk_size).collect();

            prop_assert_eq!(ranges.len(), chunk_count(size, chunk_size));
            let mut expected_start = 0;
            for (i, range) in ranges.iter().enumerate() {
                prop_assert_eq!(range.start, expected_start);
                if i + 1 < ranges.len() {
                    prop_assert_eq!(range.len(), chunk);
                } else {
                    let tail = if size % chunk == 0 { chunk } else { size % chunk };
                    prop_assert_eq!(range.len(), tail);
                }
                expected_start = range.end;
            }
            prop_assert_eq!(expected_start, size);
        }
    }
}
