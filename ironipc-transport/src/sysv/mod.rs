//! Thin safe wrappers over System V IPC objects.
//!
//! Message queues and shared memory segments are kernel-global: they outlive
//! the processes that created them until explicitly removed.

pub mod msg;
pub mod shm;

pub use msg::{MessageBuffer, MessageQueue};
pub use shm::{AttachMode, Attachment, SegmentHandle, SegmentId};

use std::io;

/// Returns the errno of the last failed call.
pub(crate) fn last_errno() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(0)
}
