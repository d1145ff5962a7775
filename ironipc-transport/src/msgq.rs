//! System V message queue transport.
//!
//! Protocol on one queue, every message of type [`MESSAGE_TYPE`]:
//! a 4-byte size announcement, then one message per chunk. The kernel
//! delivers messages of one type in send order, so no sequence numbers are
//! carried.
//!
//! The receiver creates the queue and removes it when the transfer ends.
//! The sender only opens an existing queue, and removes it if it fails
//! partway, so a late or failed sender never leaves messages behind for
//! the next transfer on the same key.

use crate::config::{IpcKey, TransportConfig};
use crate::error::{Resource, TransportError};
use crate::framing::{self, SIZE_FIELD_LEN};
use crate::sysv::{MessageBuffer, MessageQueue};
use crate::transport::{Received, Transport, TransportKind, with_cleanup};
use ironipc_core::{
    ChunkSink, ChunkSize, ChunkSource, ChunkedChannel, LatencyProbe, ProbePoint, Timestamp,
};
use std::io;
use std::time::Duration;

/// Message type of every announcement and chunk message.
pub const MESSAGE_TYPE: i64 = 1;

/// Adapts a message queue to the chunk channel traits.
///
/// Each chunk is one message. On receive, trailing zero bytes beyond the
/// caller's buffer are accepted as padding from senders that fill every
/// message to the full chunk size.
#[derive(Debug)]
pub struct QueueChannel<'q> {
    queue: &'q MessageQueue,
    scratch: MessageBuffer,
    timeout: Option<Duration>,
}

impl<'q> QueueChannel<'q> {
    /// Wraps `queue` for messages of at most `chunk_size` bytes.
    #[must_use]
    pub fn new(queue: &'q MessageQueue, chunk_size: ChunkSize, timeout: Option<Duration>) -> Self {
        Self {
            queue,
            scratch: MessageBuffer::with_capacity(chunk_size.get()),
            timeout,
        }
    }
}

impl ChunkSink for QueueChannel<'_> {
    fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<usize> {
        let len = chunk.len().min(self.scratch.capacity());
        self.scratch.fill(MESSAGE_TYPE, &chunk[..len]);
        self.queue
            .send(&self.scratch, self.timeout)
            .map_err(TransportError::into_io)?;
        Ok(len)
    }
}

impl ChunkSource for QueueChannel<'_> {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self
            .queue
            .receive(&mut self.scratch, MESSAGE_TYPE, self.timeout)
            .map_err(TransportError::into_io)?;
        let text = self.scratch.text();
        let used = n.min(buf.len());
        if text[used..].iter().any(|&b| b != 0) {
            return Err(TransportError::framing(format!(
                "chunk message of {n} bytes overruns the {} bytes still expected",
                buf.len()
            ))
            .into_io());
        }
        buf[..used].copy_from_slice(&text[..used]);
        Ok(used)
    }
}

/// Payload transfer over a System V message queue.
#[derive(Debug, Clone)]
pub struct MessageQueueTransport {
    key: IpcKey,
    chunk_size: ChunkSize,
    timeout: Option<Duration>,
}

impl MessageQueueTransport {
    /// Creates a message queue transport.
    #[must_use]
    pub fn new(key: IpcKey, chunk_size: ChunkSize, timeout: Option<Duration>) -> Self {
        Self {
            key,
            chunk_size,
            timeout,
        }
    }

    /// Creates a message queue transport from configuration.
    ///
    /// # Errors
    /// Returns [`TransportError::InvalidConfig`] if the chunk size is zero.
    pub fn from_config(config: &TransportConfig) -> Result<Self, TransportError> {
        Ok(Self::new(
            config.queue_key,
            config.queue_chunk_size()?,
            config.timeout(),
        ))
    }

    /// Queue key.
    #[must_use]
    pub fn key(&self) -> IpcKey {
        self.key
    }

    fn receive_from(
        &self,
        queue: &MessageQueue,
        probe: &LatencyProbe,
    ) -> Result<Received, TransportError> {
        let mut announcement = MessageBuffer::with_capacity(SIZE_FIELD_LEN);
        let n = queue.receive(&mut announcement, MESSAGE_TYPE, self.timeout)?;
        let size = framing::decode_size(&announcement.text()[..n])?;

        let source = QueueChannel::new(queue, self.chunk_size, self.timeout);
        let mut channel = ChunkedChannel::new(source, self.chunk_size);
        let payload = channel.read_all(size)?;
        let timestamp = probe.capture(ProbePoint::AfterReceive)?;
        tracing::debug!(key = %self.key, bytes = size, "queue payload received");
        Ok(Received { payload, timestamp })
    }

    fn send_on(
        &self,
        queue: &MessageQueue,
        size_field: &[u8],
        payload: &[u8],
    ) -> Result<usize, TransportError> {
        queue.send_bytes(MESSAGE_TYPE, size_field, self.timeout)?;
        let sink = QueueChannel::new(queue, self.chunk_size, self.timeout);
        let mut channel = ChunkedChannel::new(sink, self.chunk_size);
        Ok(channel.write_all(payload)?)
    }
}

impl Transport for MessageQueueTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::MessageQueue
    }

    fn send(&mut self, payload: &[u8], probe: &LatencyProbe) -> Result<Timestamp, TransportError> {
        let size_field = framing::encode_size(payload.len())?;

        let queue = MessageQueue::open_existing(self.key, Resource::MessageQueue, self.timeout)?;
        let sent_at = probe.capture(ProbePoint::BeforeSend)?;
        match self.send_on(&queue, &size_field, payload) {
            Ok(chunks) => {
                tracing::debug!(
                    key = %self.key,
                    bytes = payload.len(),
                    chunks,
                    "queue payload sent"
                );
                Ok(sent_at)
            }
            Err(err) => with_cleanup(Err(err), queue.remove()),
        }
    }

    fn receive(&mut self, probe: &LatencyProbe) -> Result<Received, TransportError> {
        let queue = MessageQueue::open(self.key, Resource::MessageQueue)?;
        let result = self.receive_from(&queue, probe);
        with_cleanup(result, queue.remove())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{round_trip, unique_key};

    fn transport(key: IpcKey) -> MessageQueueTransport {
        MessageQueueTransport::new(key, ChunkSize::MESSAGE_QUEUE, Some(Duration::from_secs(10)))
    }

    fn queue_exists(key: IpcKey) -> bool {
        // SAFETY: plain syscall, no pointers.
        unsafe { libc::msgget(key.as_raw(), 0) >= 0 }
    }

    #[test]
    fn test_round_trip_boundary_sizes() {
        let chunk = ChunkSize::MESSAGE_QUEUE.get();
        for size in [0, 1, chunk - 1, chunk, chunk + 1, 16 * chunk] {
            let key = unique_key();
            round_trip(transport(key), transport(key), size);
            assert!(!queue_exists(key), "queue left behind for size {size}");
        }
    }

    #[test]
    fn test_chunks_arrive_in_order_past_other_types() {
        let key = unique_key();
        let queue = MessageQueue::open(key, Resource::MessageQueue).unwrap();
        let chunk = ChunkSize::new(4).unwrap();

        queue.send_bytes(2, b"xxxx", None).unwrap();
        queue.send_bytes(MESSAGE_TYPE, b"AAAA", None).unwrap();
        queue.send_bytes(3, b"yyyy", None).unwrap();
        queue.send_bytes(MESSAGE_TYPE, b"BBBB", None).unwrap();
        queue.send_bytes(2, b"zzzz", None).unwrap();
        queue.send_bytes(MESSAGE_TYPE, b"CCCC", None).unwrap();

        let mut channel = ChunkedChannel::new(QueueChannel::new(&queue, chunk, None), chunk);
        let mut out = [0u8; 4];
        for expected in [b"AAAA", b"BBBB", b"CCCC"] {
            channel.read_into(&mut out).unwrap();
            assert_eq!(&out, expected);
        }
        assert_eq!(queue.pending().unwrap(), 3);
        queue.remove().unwrap();
    }

    #[test]
    fn test_zero_padded_last_chunk_is_accepted() {
        let key = unique_key();
        let queue = MessageQueue::open(key, Resource::MessageQueue).unwrap();
        let chunk = ChunkSize::new(8).unwrap();

        queue.send_bytes(MESSAGE_TYPE, &framing::encode_size(11).unwrap(), None).unwrap();
        queue.send_bytes(MESSAGE_TYPE, b"01234567", None).unwrap();
        queue.send_bytes(MESSAGE_TYPE, b"89a\0\0\0\0\0", None).unwrap();
        drop(queue);

        let mut receiver = MessageQueueTransport::new(key, chunk, Some(Duration::from_secs(5)));
        let received = receiver.receive(&LatencyProbe::silent()).unwrap();
        assert_eq!(received.payload, b"0123456789a");
        assert!(!queue_exists(key));
    }

    #[test]
    fn test_overrunning_chunk_is_framing_error() {
        let key = unique_key();
        let queue = MessageQueue::open(key, Resource::MessageQueue).unwrap();
        let chunk = ChunkSize::new(8).unwrap();

        queue.send_bytes(MESSAGE_TYPE, &framing::encode_size(3).unwrap(), None).unwrap();
        queue.send_bytes(MESSAGE_TYPE, b"abcdefgh", None).unwrap();
        drop(queue);

        let mut receiver = MessageQueueTransport::new(key, chunk, Some(Duration::from_secs(5)));
        let result = receiver.receive(&LatencyProbe::silent());
        assert!(matches!(result, Err(TransportError::Framing { .. })));
        assert!(!queue_exists(key));
    }

    #[test]
    fn test_short_announcement_is_framing_error() {
        let key = unique_key();
        let queue = MessageQueue::open(key, Resource::MessageQueue).unwrap();
        queue.send_bytes(MESSAGE_TYPE, &[0x10, 0x00], None).unwrap();
        drop(queue);

        let result = transport(key).receive(&LatencyProbe::silent());
        assert!(matches!(result, Err(TransportError::Framing { .. })));
        assert!(!queue_exists(key), "queue must be removed on failure");
    }

    #[test]
    fn test_failed_send_removes_queue() {
        let key = unique_key();
        // Created as a receiver would, but never drained.
        let queue = MessageQueue::open(key, Resource::MessageQueue).unwrap();

        let timeout = Some(Duration::from_millis(50));
        let mut sender = MessageQueueTransport::new(key, ChunkSize::MESSAGE_QUEUE, timeout);
        let result = sender.send(&vec![0xAB; 1 << 20], &LatencyProbe::silent());
        assert!(matches!(
            result,
            Err(TransportError::Timeout {
                operation: "message send",
                ..
            })
        ));
        assert!(!queue_exists(key), "partial transfer left behind");
        assert!(queue.remove().is_err());

        // The next transfer on the same key sees none of the stale messages.
        round_trip(transport(key), transport(key), 5);
    }

    #[test]
    fn test_sender_never_creates_the_queue() {
        let key = unique_key();
        let timeout = Some(Duration::from_millis(30));
        let mut sender = MessageQueueTransport::new(key, ChunkSize::MESSAGE_QUEUE, timeout);

        let result = sender.send(b"late", &LatencyProbe::silent());
        assert!(matches!(
            result,
            Err(TransportError::Timeout {
                operation: "message queue open",
                ..
            })
        ));
        assert!(!queue_exists(key));
    }

    #[test]
    fn test_timeout_does_not_slow_the_transfer() {
        fn median_round_trip(timeout: Option<Duration>) -> Duration {
            let mut samples: Vec<Duration> = (0..5)
                .map(|_| {
                    let key = unique_key();
                    let sender = MessageQueueTransport::new(key, ChunkSize::MESSAGE_QUEUE, timeout);
                    let receiver =
                        MessageQueueTransport::new(key, ChunkSize::MESSAGE_QUEUE, timeout);
                    let start = std::time::Instant::now();
                    round_trip(sender, receiver, 1 << 20);
                    start.elapsed()
                })
                .collect();
            samples.sort();
            samples[2]
        }

        let blocking = median_round_trip(None);
        let bounded = median_round_trip(Some(Duration::from_secs(10)));
        assert!(
            bounded <= blocking * 4 + Duration::from_millis(20),
            "bounded {bounded:?} vs blocking {blocking:?}"
        );
    }

    #[test]
    fn test_missing_chunks_time_out_and_clean_up() {
        let key = unique_key();
        let queue = MessageQueue::open(key, Resource::MessageQueue).unwrap();
        queue.send_bytes(MESSAGE_TYPE, &framing::encode_size(100).unwrap(), None).unwrap();
        drop(queue);

        let timeout = Some(Duration::from_millis(30));
        let mut receiver = MessageQueueTransport::new(key, ChunkSize::MESSAGE_QUEUE, timeout);
        let result = receiver.receive(&LatencyProbe::silent());
        assert!(matches!(
            result,
            Err(TransportError::Timeout {
                operation: "message receive",
                ..
            })
        ));
        assert!(!queue_exists(key));
    }
}
