//! System V message queues.

use super::last_errno;
use crate::config::IpcKey;
use crate::deadline::{Backoff, Deadline};
use crate::error::{CleanupOp, Resource, TransportError};
use std::io;
use std::mem::{MaybeUninit, size_of};
use std::time::Duration;

const WORD: usize = size_of::<libc::c_long>();

/// `struct msgbuf` with a variable-length text.
///
/// Backed by `c_long` words so the leading message type is aligned.
#[derive(Debug, Clone)]
pub struct MessageBuffer {
    words: Vec<libc::c_long>,
    capacity: usize,
    len: usize,
}

impl MessageBuffer {
    /// Creates a buffer able to hold `capacity` bytes of message text.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            words: vec![0; 1 + capacity.div_ceil(WORD)],
            capacity,
            len: 0,
        }
    }

    /// Maximum text length.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Message type of the last filled or received message.
    #[must_use]
    pub fn mtype(&self) -> i64 {
        i64::from(self.words[0])
    }

    /// Text of the last filled or received message.
    #[must_use]
    pub fn text(&self) -> &[u8] {
        &self.text_region()[..self.len]
    }

    /// Replaces the contents with `mtype` and `text`.
    ///
    /// # Panics
    /// Panics if `text` exceeds the capacity.
    pub fn fill(&mut self, mtype: i64, text: &[u8]) {
        assert!(text.len() <= self.capacity, "message text exceeds buffer");
        self.words[0] = mtype as libc::c_long;
        self.text_region_mut()[..text.len()].copy_from_slice(text);
        self.len = text.len();
    }

    fn text_region(&self) -> &[u8] {
        // SAFETY: `words` holds `1 + ceil(capacity / WORD)` initialized words,
        // so `capacity` bytes after the first word are in bounds.
        unsafe {
            std::slice::from_raw_parts(self.words.as_ptr().add(1).cast::<u8>(), self.capacity)
        }
    }

    fn text_region_mut(&mut self) -> &mut [u8] {
        // SAFETY: see `text_region`; `&mut self` guarantees exclusivity.
        unsafe {
            std::slice::from_raw_parts_mut(
                self.words.as_mut_ptr().add(1).cast::<u8>(),
                self.capacity,
            )
        }
    }
}

/// Handle to a System V message queue.
#[derive(Debug)]
pub struct MessageQueue {
    id: libc::c_int,
    key: IpcKey,
    resource: Resource,
}

impl MessageQueue {
    /// Creates the queue for `key`, or opens it if it already exists.
    ///
    /// # Errors
    /// Returns [`TransportError::ResourceCreation`] if `msgget` fails.
    pub fn open(key: IpcKey, resource: Resource) -> Result<Self, TransportError> {
        // SAFETY: plain syscall, no pointers.
        let id = unsafe { libc::msgget(key.as_raw(), libc::IPC_CREAT | 0o666) };
        if id < 0 {
            return Err(TransportError::creation(resource));
        }
        tracing::debug!(%key, id, %resource, "message queue opened");
        Ok(Self { id, key, resource })
    }

    /// Opens the queue for `key` once another process has created it.
    ///
    /// Waits while no such queue exists, for at most `timeout` if set.
    ///
    /// # Errors
    /// Returns [`TransportError::Timeout`] if the queue never appears, or
    /// [`TransportError::ResourceCreation`] if `msgget` fails otherwise.
    pub fn open_existing(
        key: IpcKey,
        resource: Resource,
        timeout: Option<Duration>,
    ) -> Result<Self, TransportError> {
        let deadline = Deadline::after(timeout);
        let mut backoff = Backoff::default();

        loop {
            // SAFETY: plain syscall, no pointers.
            let id = unsafe { libc::msgget(key.as_raw(), 0) };
            if id >= 0 {
                tracing::debug!(%key, id, %resource, "existing message queue opened");
                return Ok(Self { id, key, resource });
            }
            match last_errno() {
                libc::EINTR => {}
                libc::ENOENT => {
                    if deadline.expired() {
                        return Err(deadline.timeout_error("message queue open"));
                    }
                    backoff.snooze();
                }
                _ => return Err(TransportError::creation(resource)),
            }
        }
    }

    /// Returns the kernel queue id.
    #[must_use]
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Returns the key the queue was opened with.
    #[must_use]
    pub fn key(&self) -> IpcKey {
        self.key
    }

    /// Sends the message held in `msg`.
    ///
    /// Blocks while the queue is full, for at most `timeout` if set.
    ///
    /// # Errors
    /// Returns [`TransportError::Timeout`] if the queue stays full, or
    /// [`TransportError::Io`] if `msgsnd` fails.
    pub fn send(
        &self,
        msg: &MessageBuffer,
        timeout: Option<Duration>,
    ) -> Result<(), TransportError> {
        let deadline = Deadline::after(timeout);
        let flags = if deadline.is_bounded() { libc::IPC_NOWAIT } else { 0 };
        let mut backoff = Backoff::default();

        loop {
            // SAFETY: `msg.words` points at a `c_long` type followed by at
            // least `msg.len` text bytes.
            let rc = unsafe { libc::msgsnd(self.id, msg.words.as_ptr().cast(), msg.len, flags) };
            if rc == 0 {
                return Ok(());
            }
            match last_errno() {
                libc::EINTR => continue,
                libc::EAGAIN if deadline.is_bounded() => {
                    if deadline.expired() {
                        return Err(deadline.timeout_error("message send"));
                    }
                    backoff.snooze();
                }
                errno => return Err(io::Error::from_raw_os_error(errno).into()),
            }
        }
    }

    /// Sends `text` as one message of type `mtype`.
    ///
    /// # Errors
    /// Same as [`MessageQueue::send`].
    pub fn send_bytes(
        &self,
        mtype: i64,
        text: &[u8],
        timeout: Option<Duration>,
    ) -> Result<(), TransportError> {
        let mut msg = MessageBuffer::with_capacity(text.len());
        msg.fill(mtype, text);
        self.send(&msg, timeout)
    }

    /// Receives the oldest message of type `mtype` into `msg`.
    ///
    /// Messages of other types stay queued. Blocks until one arrives, for at
    /// most `timeout` if set.
    ///
    /// # Returns
    /// The text length of the received message.
    ///
    /// # Errors
    /// Returns [`TransportError::Framing`] if the message does not fit in
    /// `msg`, [`TransportError::Timeout`] if none arrives in time, or
    /// [`TransportError::Io`] if `msgrcv` fails.
    pub fn receive(
        &self,
        msg: &mut MessageBuffer,
        mtype: i64,
        timeout: Option<Duration>,
    ) -> Result<usize, TransportError> {
        let deadline = Deadline::after(timeout);
        let flags = if deadline.is_bounded() { libc::IPC_NOWAIT } else { 0 };
        let mut backoff = Backoff::default();

        loop {
            // SAFETY: `msg.words` has room for a `c_long` type plus
            // `msg.capacity` text bytes.
            let rc = unsafe {
                libc::msgrcv(
                    self.id,
                    msg.words.as_mut_ptr().cast(),
                    msg.capacity,
                    mtype as libc::c_long,
                    flags,
                )
            };
            if rc >= 0 {
                msg.len = rc as usize;
                return Ok(msg.len);
            }
            match last_errno() {
                libc::EINTR => continue,
                libc::ENOMSG if deadline.is_bounded() => {
                    if deadline.expired() {
                        return Err(deadline.timeout_error("message receive"));
                    }
                    backoff.snooze();
                }
                libc::E2BIG => {
                    return Err(TransportError::framing(format!(
                        "message on {} exceeds {} byte buffer",
                        self.resource, msg.capacity
                    )));
                }
                errno => return Err(io::Error::from_raw_os_error(errno).into()),
            }
        }
    }

    /// Number of messages currently queued.
    ///
    /// # Errors
    /// Returns [`TransportError::Io`] if `msgctl(IPC_STAT)` fails.
    pub fn pending(&self) -> Result<usize, TransportError> {
        let mut stat = MaybeUninit::<libc::msqid_ds>::uninit();
        // SAFETY: IPC_STAT fills the whole struct on success.
        let rc = unsafe { libc::msgctl(self.id, libc::IPC_STAT, stat.as_mut_ptr()) };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }
        // SAFETY: initialized by the successful call above.
        let stat = unsafe { stat.assume_init() };
        Ok(stat.msg_qnum as usize)
    }

    /// Removes the queue, discarding any unread messages.
    ///
    /// # Errors
    /// Returns [`TransportError::ResourceCleanup`] if `msgctl(IPC_RMID)` fails.
    pub fn remove(self) -> Result<(), TransportError> {
        // SAFETY: IPC_RMID ignores the buffer argument.
        let rc = unsafe { libc::msgctl(self.id, libc::IPC_RMID, std::ptr::null_mut()) };
        if rc < 0 {
            return Err(TransportError::cleanup(self.resource, CleanupOp::Remove));
        }
        tracing::debug!(
            key = %self.key,
            id = self.id,
            resource = %self.resource,
            "message queue removed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::unique_key;

    #[test]
    fn test_message_buffer_fill() {
        let mut msg = MessageBuffer::with_capacity(5);
        assert_eq!(msg.capacity(), 5);
        msg.fill(3, b"abc");
        assert_eq!(msg.mtype(), 3);
        assert_eq!(msg.text(), b"abc");
    }

    #[test]
    #[should_panic(expected = "exceeds buffer")]
    fn test_message_buffer_overflow_panics() {
        MessageBuffer::with_capacity(2).fill(1, b"abc");
    }

    #[test]
    fn test_send_receive_by_type() {
        let queue = MessageQueue::open(unique_key(), Resource::MessageQueue).unwrap();
        queue.send_bytes(2, b"other", None).unwrap();
        queue.send_bytes(1, b"mine", None).unwrap();
        assert_eq!(queue.pending().unwrap(), 2);

        let mut msg = MessageBuffer::with_capacity(16);
        let n = queue.receive(&mut msg, 1, None).unwrap();
        assert_eq!(n, 4);
        assert_eq!(msg.text(), b"mine");
        assert_eq!(queue.pending().unwrap(), 1);

        queue.remove().unwrap();
    }

    #[test]
    fn test_receive_times_out() {
        let queue = MessageQueue::open(unique_key(), Resource::MessageQueue).unwrap();
        let mut msg = MessageBuffer::with_capacity(8);

        let result = queue.receive(&mut msg, 1, Some(Duration::from_millis(20)));
        assert!(matches!(result, Err(TransportError::Timeout { .. })));

        queue.remove().unwrap();
    }

    #[test]
    fn test_oversized_message_is_framing_error() {
        let queue = MessageQueue::open(unique_key(), Resource::MessageQueue).unwrap();
        queue.send_bytes(1, &[7u8; 32], None).unwrap();

        let mut msg = MessageBuffer::with_capacity(8);
        let result = queue.receive(&mut msg, 1, None);
        assert!(matches!(result, Err(TransportError::Framing { .. })));

        queue.remove().unwrap();
    }

    #[test]
    fn test_open_existing_waits_for_creator() {
        let key = unique_key();
        let creator = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            MessageQueue::open(key, Resource::MessageQueue).unwrap()
        });

        let opened =
            MessageQueue::open_existing(key, Resource::MessageQueue, Some(Duration::from_secs(10)))
                .unwrap();
        let created = creator.join().unwrap();
        assert_eq!(opened.id(), created.id());
        created.remove().unwrap();
    }

    #[test]
    fn test_open_existing_never_creates() {
        let key = unique_key();
        let timeout = Some(Duration::from_millis(20));
        let result = MessageQueue::open_existing(key, Resource::SideChannel, timeout);
        assert!(matches!(
            result,
            Err(TransportError::Timeout {
                operation: "message queue open",
                ..
            })
        ));
        // SAFETY: plain syscall, no pointers.
        assert!(unsafe { libc::msgget(key.as_raw(), 0) } < 0);
    }

    #[test]
    fn test_open_is_idempotent() {
        let key = unique_key();
        let first = MessageQueue::open(key, Resource::MessageQueue).unwrap();
        let second = MessageQueue::open(key, Resource::MessageQueue).unwrap();
        assert_eq!(first.id(), second.id());
        assert_eq!(second.key(), key);

        first.remove().unwrap();
        assert!(matches!(
            second.remove(),
            Err(TransportError::ResourceCleanup {
                op: CleanupOp::Remove,
                ..
            })
        ));
    }
}
