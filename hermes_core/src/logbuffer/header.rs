//! Read-only view of a fragment's frame header, handed to fragment
//! handlers during a poll.

use crate::concurrent::atomic_buffer::AtomicBuffer;
use crate::logbuffer::{descriptor, frame_descriptor};

/// Header of the fragment currently being delivered.
///
/// The header is re-pointed at each fragment during a poll; handlers must
/// not retain it.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    initial_term_id: i32,
    position_bits_to_shift: u32,
    buffer: AtomicBuffer,
    offset: usize,
}

impl Header {
    pub fn new(initial_term_id: i32, position_bits_to_shift: u32, buffer: AtomicBuffer) -> Self {
        Self {
            initial_term_id,
            position_bits_to_shift,
            buffer,
            offset: 0,
        }
    }

    #[inline]
    pub(crate) fn wrap(&mut self, buffer: AtomicBuffer, offset: usize) {
        self.buffer = buffer;
        self.offset = offset;
    }

    /// Offset of the frame within its term.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn frame_length(&self) -> i32 {
        self.buffer.get_i32(self.offset + frame_descriptor::FRAME_LENGTH_OFFSET)
    }

    #[inline]
    pub fn flags(&self) -> u8 {
        frame_descriptor::frame_flags(&self.buffer, self.offset)
    }

    #[inline]
    pub fn frame_type(&self) -> u16 {
        frame_descriptor::frame_type(&self.buffer, self.offset)
    }

    #[inline]
    pub fn session_id(&self) -> i32 {
        frame_descriptor::frame_session_id(&self.buffer, self.offset)
    }

    #[inline]
    pub fn stream_id(&self) -> i32 {
        frame_descriptor::frame_stream_id(&self.buffer, self.offset)
    }

    #[inline]
    pub fn term_id(&self) -> i32 {
        frame_descriptor::frame_term_id(&self.buffer, self.offset)
    }

    #[inline]
    pub fn term_offset(&self) -> i32 {
        frame_descriptor::frame_term_offset(&self.buffer, self.offset)
    }

    #[inline]
    pub fn reserved_value(&self) -> i64 {
        frame_descriptor::frame_reserved_value(&self.buffer, self.offset)
    }

    #[inline]
    pub fn initial_term_id(&self) -> i32 {
        self.initial_term_id
    }

    /// Stream position just past this fragment.
    pub fn position(&self) -> i64 {
        let next_offset =
            self.term_offset() + frame_descriptor::frame_aligned_length(self.frame_length());
        descriptor::compute_position(
            self.term_id(),
            next_offset,
            self.position_bits_to_shift,
            self.initial_term_id,
        )
    }
}
