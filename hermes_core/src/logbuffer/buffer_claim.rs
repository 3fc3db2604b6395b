//! Zero-copy claim over a term region.
//!
//! `Publication::try_claim` hands the caller a claimed frame whose header
//! is already written but whose length is still 0, so readers cannot see
//! it. The caller fills the body in place, then `commit` publishes the
//! frame with a single release store (or `abort` turns it into padding).
//! A claim that is neither committed nor aborted leaves a permanently
//! uncommitted slot; the unblocker recovers it after a timeout.

use crate::concurrent::atomic_buffer::AtomicBuffer;
use crate::logbuffer::frame_descriptor::{self, HEADER_LENGTH};

/// A claimed frame awaiting commit.
#[derive(Debug)]
pub struct BufferClaim {
    buffer: AtomicBuffer,
    committed: bool,
}

impl BufferClaim {
    /// `buffer` spans the whole frame including its header.
    pub(crate) fn new(buffer: AtomicBuffer) -> Self {
        Self {
            buffer,
            committed: false,
        }
    }

    /// Writable view of the claimed message body.
    #[inline]
    pub fn body(&mut self) -> &mut [u8] {
        let length = self.length();
        self.buffer.as_mut_slice(HEADER_LENGTH, length)
    }

    /// Length of the claimed message body.
    #[inline]
    pub fn length(&self) -> usize {
        self.buffer.capacity() - HEADER_LENGTH
    }

    /// Publish the frame to subscribers.
    pub fn commit(mut self) {
        frame_descriptor::frame_length_ordered(&self.buffer, 0, self.buffer.capacity() as i32);
        self.committed = true;
    }

    /// Turn the claim into padding so subscribers skip it.
    pub fn abort(mut self) {
        frame_descriptor::set_frame_type(&self.buffer, 0, frame_descriptor::HDR_TYPE_PAD);
        frame_descriptor::frame_length_ordered(&self.buffer, 0, -(self.buffer.capacity() as i32));
        self.committed = true;
    }
}

impl Drop for BufferClaim {
    fn drop(&mut self) {
        if !self.committed {
            // Dropping without commit leaves the slot uncommitted on
            // purpose; the unblock path covers a crashed producer, but a
            // live one should not leak claims.
            log::warn!("buffer claim dropped without commit or abort");
        }
    }
}
