//! Shared memory transport.
//!
//! The sender copies the whole payload into a fresh System V segment and
//! hands a [`SegmentHandle`] to the receiver over a side-channel message
//! queue. The receiver copies the payload out, detaches, and destroys the
//! segment; it also creates and removes the side-channel queue. The sender
//! only opens an existing side channel, so a sender arriving after the
//! receiver gave up cannot leave a handle for the next transfer.
//!
//! Latency boundaries: the sender timestamps before creating the segment
//! (after the side channel is open),
//! the receiver right after a successful attach. The measured interval
//! therefore covers allocation, copy-in, handoff and attach, but not the
//! receiver's copy-out.

use crate::config::{IpcKey, TransportConfig};
use crate::error::{Resource, TransportError};
use crate::sysv::{AttachMode, MessageBuffer, MessageQueue, SegmentHandle, SegmentId};
use crate::transport::{Received, Transport, TransportKind, with_cleanup};
use ironipc_core::{LatencyProbe, ProbePoint, Timestamp};
use std::time::Duration;

/// Message type of the handle message on the side channel.
pub const HANDLE_MESSAGE_TYPE: i64 = 1;

/// Sender progress through one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmSenderState {
    /// Nothing acquired.
    Idle,
    /// Segment exists, not yet mapped.
    SegmentCreated,
    /// Segment mapped read-write.
    SegmentAttached,
    /// Payload copied into the segment.
    DataCopied,
    /// Handle delivered; the receiver now owns the segment.
    HandleSent,
    /// Mapping released.
    Detached,
}

/// Receiver progress through one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmReceiverState {
    /// Waiting for a handle.
    Idle,
    /// Handle decoded.
    HandleReceived,
    /// Segment mapped read-only.
    SegmentAttached,
    /// Payload copied out.
    DataAvailable,
    /// Mapping released.
    Detached,
    /// Segment marked for removal.
    SegmentDestroyed,
}

/// Payload transfer through a shared memory segment.
#[derive(Debug, Clone)]
pub struct SharedMemoryTransport {
    side_channel_key: IpcKey,
    timeout: Option<Duration>,
    sender_state: ShmSenderState,
    receiver_state: ShmReceiverState,
}

impl SharedMemoryTransport {
    /// Creates a shared memory transport using the side channel at `side_channel_key`.
    #[must_use]
    pub fn new(side_channel_key: IpcKey, timeout: Option<Duration>) -> Self {
        Self {
            side_channel_key,
            timeout,
            sender_state: ShmSenderState::Idle,
            receiver_state: ShmReceiverState::Idle,
        }
    }

    /// Creates a shared memory transport from configuration.
    #[must_use]
    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(config.shm_queue_key, config.timeout())
    }

    /// Side-channel queue key.
    #[must_use]
    pub fn side_channel_key(&self) -> IpcKey {
        self.side_channel_key
    }

    /// Last state reached by [`Transport::send`].
    #[must_use]
    pub fn sender_state(&self) -> ShmSenderState {
        self.sender_state
    }

    /// Last state reached by [`Transport::receive`].
    #[must_use]
    pub fn receiver_state(&self) -> ShmReceiverState {
        self.receiver_state
    }

    fn advance_sender(&mut self, state: ShmSenderState) {
        tracing::debug!(from = ?self.sender_state, to = ?state, "shm sender");
        self.sender_state = state;
    }

    fn advance_receiver(&mut self, state: ShmReceiverState) {
        tracing::debug!(from = ?self.receiver_state, to = ?state, "shm receiver");
        self.receiver_state = state;
    }

    /// Fills `segment` and delivers its handle over `side_channel`.
    fn publish(
        &mut self,
        side_channel: &MessageQueue,
        segment: SegmentId,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let mut mapping = segment.attach(AttachMode::ReadWrite)?;
        self.advance_sender(ShmSenderState::SegmentAttached);

        mapping.as_mut_slice()?[..payload.len()].copy_from_slice(payload);
        self.advance_sender(ShmSenderState::DataCopied);

        let handle = SegmentHandle {
            id: segment.as_raw(),
            len: payload.len() as u64,
        };
        side_channel.send_bytes(HANDLE_MESSAGE_TYPE, &handle.encode(), self.timeout)?;
        self.advance_sender(ShmSenderState::HandleSent);

        mapping.detach()?;
        self.advance_sender(ShmSenderState::Detached);
        Ok(())
    }

    fn receive_handle(&mut self) -> Result<SegmentHandle, TransportError> {
        let side_channel = MessageQueue::open(self.side_channel_key, Resource::SideChannel)?;
        let mut msg = MessageBuffer::with_capacity(SegmentHandle::ENCODED_LEN);
        let received = side_channel
            .receive(&mut msg, HANDLE_MESSAGE_TYPE, self.timeout)
            .and_then(|n| SegmentHandle::decode(&msg.text()[..n]));
        let handle = with_cleanup(received, side_channel.remove())?;
        self.advance_receiver(ShmReceiverState::HandleReceived);
        Ok(handle)
    }

    fn copy_out(
        &mut self,
        segment: SegmentId,
        len: u64,
        probe: &LatencyProbe,
    ) -> Result<Received, TransportError> {
        let mapping = segment.attach(AttachMode::ReadOnly)?;
        let timestamp = probe.capture(ProbePoint::AfterReceive)?;
        self.advance_receiver(ShmReceiverState::SegmentAttached);

        let len = usize::try_from(len)
            .ok()
            .filter(|&len| len <= mapping.len())
            .ok_or_else(|| {
                TransportError::framing(format!(
                    "handle length {len} exceeds segment of {} bytes",
                    mapping.len()
                ))
            })?;
        let payload = mapping.as_slice()[..len].to_vec();
        self.advance_receiver(ShmReceiverState::DataAvailable);

        mapping.detach()?;
        self.advance_receiver(ShmReceiverState::Detached);
        Ok(Received { payload, timestamp })
    }
}

impl Transport for SharedMemoryTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::SharedMemory
    }

    fn send(&mut self, payload: &[u8], probe: &LatencyProbe) -> Result<Timestamp, TransportError> {
        self.sender_state = ShmSenderState::Idle;
        let key = self.side_channel_key;
        let side_channel = MessageQueue::open_existing(key, Resource::SideChannel, self.timeout)?;
        let sent_at = probe.capture(ProbePoint::BeforeSend)?;

        let segment = SegmentId::create(payload.len())?;
        self.advance_sender(ShmSenderState::SegmentCreated);

        if let Err(err) = self.publish(&side_channel, segment, payload) {
            // Until the handle is sent nobody else knows the segment exists.
            if self.sender_state != ShmSenderState::HandleSent {
                if let Err(cleanup) = segment.destroy() {
                    tracing::warn!(
                        id = segment.as_raw(),
                        error = %cleanup,
                        "failed to destroy unsent segment"
                    );
                }
            }
            return Err(err);
        }
        tracing::debug!(id = segment.as_raw(), bytes = payload.len(), "shm payload sent");
        Ok(sent_at)
    }

    fn receive(&mut self, probe: &LatencyProbe) -> Result<Received, TransportError> {
        self.receiver_state = ShmReceiverState::Idle;
        let handle = self.receive_handle()?;
        let segment = SegmentId::from_raw(handle.id);

        let result = self.copy_out(segment, handle.len, probe);
        let received = with_cleanup(result, segment.destroy())?;
        self.advance_receiver(ShmReceiverState::SegmentDestroyed);
        tracing::debug!(id = handle.id, bytes = received.payload.len(), "shm payload received");
        Ok(received)
    }
}
