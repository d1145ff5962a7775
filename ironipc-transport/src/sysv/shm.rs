//! System V shared memory segments.
//!
//! Lifecycle: [`SegmentId::create`] → [`SegmentId::attach`] →
//! [`Attachment::detach`] → [`SegmentId::destroy`]. Destroy marks the
//! segment for removal; the kernel frees it once the last attacher detaches.

use crate::error::{CleanupOp, Resource, TransportError};
use bytes::{Buf, BufMut};
use std::io;
use std::mem::MaybeUninit;
use std::ptr::NonNull;

/// Segment id and payload length, as exchanged over the side channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHandle {
    /// Kernel segment id.
    pub id: i32,
    /// Payload length in bytes (may be smaller than the segment).
    pub len: u64,
}

impl SegmentHandle {
    /// Encoded size: `[id: i32 LE][len: u64 LE]`.
    pub const ENCODED_LEN: usize = 12;

    /// Encodes the handle for the side channel.
    #[must_use]
    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        let mut cursor = &mut out[..];
        cursor.put_i32_le(self.id);
        cursor.put_u64_le(self.len);
        out
    }

    /// Decodes a handle received over the side channel.
    ///
    /// # Errors
    /// Returns [`TransportError::Framing`] unless `bytes` is exactly
    /// [`SegmentHandle::ENCODED_LEN`] long.
    pub fn decode(mut bytes: &[u8]) -> Result<Self, TransportError> {
        if bytes.len() != Self::ENCODED_LEN {
            return Err(TransportError::framing(format!(
                "segment handle is {} bytes, expected {}",
                bytes.len(),
                Self::ENCODED_LEN
            )));
        }
        Ok(Self {
            id: bytes.get_i32_le(),
            len: bytes.get_u64_le(),
        })
    }
}

/// Access requested when attaching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachMode {
    /// Map read-only (`SHM_RDONLY`).
    ReadOnly,
    /// Map read-write.
    ReadWrite,
}

/// Kernel id of a shared memory segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentId(i32);

impl SegmentId {
    /// Creates a fresh private segment of at least `len` bytes.
    ///
    /// The kernel rejects zero-sized segments, so an empty payload gets a
    /// one-byte segment.
    ///
    /// # Errors
    /// Returns [`TransportError::ResourceCreation`] if `shmget` fails.
    pub fn create(len: usize) -> Result<Self, TransportError> {
        let size = len.max(1);
        // SAFETY: plain syscall, no pointers.
        let id = unsafe {
            libc::shmget(
                libc::IPC_PRIVATE,
                size,
                libc::IPC_CREAT | libc::IPC_EXCL | 0o600,
            )
        };
        if id < 0 {
            return Err(TransportError::creation(Resource::Segment));
        }
        tracing::debug!(id, size, "segment created");
        Ok(Self(id))
    }

    /// Wraps an id received from a peer.
    #[must_use]
    pub const fn from_raw(id: i32) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self.0
    }

    /// Size of the segment in bytes.
    ///
    /// # Errors
    /// Returns [`TransportError::Io`] if `shmctl(IPC_STAT)` fails.
    pub fn size(self) -> Result<usize, TransportError> {
        Ok(self.stat()?.shm_segsz as usize)
    }

    /// Number of current attachments.
    ///
    /// # Errors
    /// Returns [`TransportError::Io`] if `shmctl(IPC_STAT)` fails.
    pub fn attach_count(self) -> Result<u64, TransportError> {
        Ok(self.stat()?.shm_nattch as u64)
    }

    fn stat(self) -> Result<libc::shmid_ds, TransportError> {
        let mut stat = MaybeUninit::<libc::shmid_ds>::uninit();
        // SAFETY: IPC_STAT fills the whole struct on success.
        let rc = unsafe { libc::shmctl(self.0, libc::IPC_STAT, stat.as_mut_ptr()) };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }
        // SAFETY: initialized by the successful call above.
        Ok(unsafe { stat.assume_init() })
    }

    /// Maps the segment into this process.
    ///
    /// # Errors
    /// Returns [`TransportError::Attach`] if `shmat` fails.
    pub fn attach(self, mode: AttachMode) -> Result<Attachment, TransportError> {
        let flags = match mode {
            AttachMode::ReadOnly => libc::SHM_RDONLY,
            AttachMode::ReadWrite => 0,
        };
        // SAFETY: a null address lets the kernel pick the mapping.
        let addr = unsafe { libc::shmat(self.0, std::ptr::null(), flags) };
        if addr as isize == -1 {
            return Err(TransportError::Attach {
                id: self.0,
                source: io::Error::last_os_error(),
            });
        }
        let Some(addr) = NonNull::new(addr.cast::<u8>()) else {
            return Err(TransportError::Attach {
                id: self.0,
                source: io::Error::other("shmat returned null"),
            });
        };

        // Built before the size query so a failure below still detaches.
        let mut attachment = Attachment {
            id: self,
            addr,
            len: 0,
            mode,
            attached: true,
        };
        attachment.len = self.size()?;
        tracing::debug!(id = self.0, len = attachment.len, ?mode, "segment attached");
        Ok(attachment)
    }

    /// Marks the segment for removal.
    ///
    /// Succeeds once per segment; a second call on the same id fails.
    ///
    /// # Errors
    /// Returns [`TransportError::ResourceCleanup`] if `shmctl(IPC_RMID)` fails.
    pub fn destroy(self) -> Result<(), TransportError> {
        // SAFETY: IPC_RMID ignores the buffer argument.
        let rc = unsafe { libc::shmctl(self.0, libc::IPC_RMID, std::ptr::null_mut()) };
        if rc < 0 {
            return Err(TransportError::cleanup(Resource::Segment, CleanupOp::Destroy));
        }
        tracing::debug!(id = self.0, "segment destroyed");
        Ok(())
    }
}

/// A segment mapped into this process. Detaches on drop.
#[derive(Debug)]
pub struct Attachment {
    id: SegmentId,
    addr: NonNull<u8>,
    len: usize,
    mode: AttachMode,
    attached: bool,
}

impl Attachment {
    /// Segment this mapping belongs to.
    #[must_use]
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Mapped length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the mapping is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the mapped bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `addr` maps `len` bytes for as long as `self` is attached.
        unsafe { std::slice::from_raw_parts(self.addr.as_ptr(), self.len) }
    }

    /// Returns the mapped bytes mutably.
    ///
    /// # Errors
    /// Returns [`TransportError::Attach`] for a read-only mapping.
    pub fn as_mut_slice(&mut self) -> Result<&mut [u8], TransportError> {
        if self.mode == AttachMode::ReadOnly {
            return Err(TransportError::Attach {
                id: self.id.0,
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            });
        }
        // SAFETY: read-write mapping of `len` bytes, borrowed exclusively.
        Ok(unsafe { std::slice::from_raw_parts_mut(self.addr.as_ptr(), self.len) })
    }

    /// Unmaps the segment.
    ///
    /// # Errors
    /// Returns [`TransportError::ResourceCleanup`] if `shmdt` fails.
    pub fn detach(mut self) -> Result<(), TransportError> {
        self.attached = false;
        self.unmap()
    }

    fn unmap(&self) -> Result<(), TransportError> {
        // SAFETY: `addr` came from a successful `shmat` and is detached once.
        let rc = unsafe { libc::shmdt(self.addr.as_ptr().cast()) };
        if rc < 0 {
            return Err(TransportError::cleanup(Resource::Segment, CleanupOp::Detach));
        }
        tracing::debug!(id = self.id.0, "segment detached");
        Ok(())
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        if self.attached {
            if let Err(e) = self.unmap() {
                tracing::warn!(id = self.id.0, error = %e, "detach on drop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_encoding() {
        let handle = SegmentHandle {
            id: 0x0102_0304,
            len: 1 << 20,
        };
        let bytes = handle.encode();
        assert_eq!(&bytes[..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(SegmentHandle::decode(&bytes).unwrap(), handle);
    }

    #[test]
    fn test_short_handle_is_framing_error() {
        assert!(matches!(
            SegmentHandle::decode(&[1, 2, 3, 4]),
            Err(TransportError::Framing { .. })
        ));
    }

    #[test]
    fn test_create_attach_write_read() {
        let segment = SegmentId::create(4096).unwrap();

        let mut writer = segment.attach(AttachMode::ReadWrite).unwrap();
        assert!(writer.len() >= 4096);
        writer.as_mut_slice().unwrap()[..3].copy_from_slice(b"abc");

        let reader = segment.attach(AttachMode::ReadOnly).unwrap();
        assert_eq!(&reader.as_slice()[..3], b"abc");
        assert_eq!(segment.attach_count().unwrap(), 2);

        writer.detach().unwrap();
        drop(reader);
        assert_eq!(segment.attach_count().unwrap(), 0);
        segment.destroy().unwrap();
    }

    #[test]
    fn test_read_only_mapping_refuses_writes() {
        let segment = SegmentId::create(16).unwrap();
        let mut reader = segment.attach(AttachMode::ReadOnly).unwrap();
        assert!(reader.as_mut_slice().is_err());
        reader.detach().unwrap();
        segment.destroy().unwrap();
    }

    #[test]
    fn test_zero_length_segment() {
        let segment = SegmentId::create(0).unwrap();
        assert_eq!(segment.size().unwrap(), 1);
        segment.destroy().unwrap();
    }

    #[test]
    fn test_destroy_twice_fails_cleanly() {
        let segment = SegmentId::create(64).unwrap();
        segment.attach(AttachMode::ReadWrite).unwrap().detach().unwrap();

        segment.destroy().unwrap();
        assert!(matches!(
            segment.destroy(),
            Err(TransportError::ResourceCleanup {
                resource: Resource::Segment,
                op: CleanupOp::Destroy,
                ..
            })
        ));
    }

    #[test]
    fn test_attach_unknown_segment_fails() {
        let segment = SegmentId::create(8).unwrap();
        segment.destroy().unwrap();
        assert!(matches!(
            segment.attach(AttachMode::ReadOnly),
            Err(TransportError::Attach { .. })
        ));
    }
}
