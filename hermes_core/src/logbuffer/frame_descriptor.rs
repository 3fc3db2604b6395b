//! Frame layout within a term.
//!
//! Every write is framed with a 32-byte little-endian header. The frame
//! length field is the publication point: 0 means not yet committed (a
//! reader must stop), negative marks padding covering |length| bytes to
//! the end of the term or an unblocked gap. Frames are 32-byte aligned.
//!
//! ```text
//!  0: frame_length   (i32; 0 = uncommitted, < 0 = padding)
//!  4: version        (u8)
//!  5: flags          (u8; bit 7 = begin fragment, bit 6 = end fragment)
//!  6: type           (u16; 0 = padding, 1 = data)
//!  8: term_offset    (i32)
//! 12: session_id     (i32)
//! 16: stream_id      (i32)
//! 20: term_id        (i32)
//! 24: reserved_value (i64)
//! ```

use crate::concurrent::atomic_buffer::AtomicBuffer;
use crate::util::align_i32;

/// Frame alignment in bytes.
pub const FRAME_ALIGNMENT: i32 = 32;

/// Header length in bytes.
pub const HEADER_LENGTH: usize = 32;

pub const FRAME_LENGTH_OFFSET: usize = 0;
pub const VERSION_OFFSET: usize = 4;
pub const FLAGS_OFFSET: usize = 5;
pub const TYPE_OFFSET: usize = 6;
pub const TERM_OFFSET_OFFSET: usize = 8;
pub const SESSION_ID_OFFSET: usize = 12;
pub const STREAM_ID_OFFSET: usize = 16;
pub const TERM_ID_OFFSET: usize = 20;
pub const RESERVED_VALUE_OFFSET: usize = 24;

pub const CURRENT_VERSION: u8 = 1;

/// First fragment of a message.
pub const BEGIN_FRAG_FLAG: u8 = 0x80;
/// Last fragment of a message.
pub const END_FRAG_FLAG: u8 = 0x40;
/// A whole message in one frame.
pub const UNFRAGMENTED: u8 = BEGIN_FRAG_FLAG | END_FRAG_FLAG;

/// Padding frame type.
pub const HDR_TYPE_PAD: u16 = 0;
/// Data frame type.
pub const HDR_TYPE_DATA: u16 = 1;

/// Align a frame length up to `FRAME_ALIGNMENT`.
#[inline]
pub fn frame_aligned_length(frame_length: i32) -> i32 {
    align_i32(frame_length, FRAME_ALIGNMENT)
}

/// Acquire load of the frame length: the commit point of the protocol.
#[inline]
pub fn frame_length_volatile(term: &AtomicBuffer, frame_offset: usize) -> i32 {
    term.get_i32_volatile(frame_offset + FRAME_LENGTH_OFFSET)
}

/// Release store of the frame length: publishes the frame to readers.
#[inline]
pub fn frame_length_ordered(term: &AtomicBuffer, frame_offset: usize, frame_length: i32) {
    term.put_i32_ordered(frame_offset + FRAME_LENGTH_OFFSET, frame_length)
}

#[inline]
pub fn frame_version(term: &AtomicBuffer, frame_offset: usize) -> u8 {
    term.as_slice(frame_offset + VERSION_OFFSET, 1)[0]
}

#[inline]
pub fn frame_flags(term: &AtomicBuffer, frame_offset: usize) -> u8 {
    term.as_slice(frame_offset + FLAGS_OFFSET, 1)[0]
}

#[inline]
pub fn set_frame_flags(term: &AtomicBuffer, frame_offset: usize, flags: u8) {
    term.as_mut_slice(frame_offset + FLAGS_OFFSET, 1)[0] = flags
}

#[inline]
pub fn frame_type(term: &AtomicBuffer, frame_offset: usize) -> u16 {
    let bytes = term.as_slice(frame_offset + TYPE_OFFSET, 2);
    u16::from_le_bytes([bytes[0], bytes[1]])
}

#[inline]
pub fn set_frame_type(term: &AtomicBuffer, frame_offset: usize, frame_type: u16) {
    term.as_mut_slice(frame_offset + TYPE_OFFSET, 2)
        .copy_from_slice(&frame_type.to_le_bytes())
}

/// Padding is signalled by a negative committed length.
#[inline]
pub fn is_padding_frame(frame_length: i32) -> bool {
    frame_length < 0
}

#[inline]
pub fn frame_term_offset(term: &AtomicBuffer, frame_offset: usize) -> i32 {
    term.get_i32(frame_offset + TERM_OFFSET_OFFSET)
}

#[inline]
pub fn set_frame_term_offset(term: &AtomicBuffer, frame_offset: usize, term_offset: i32) {
    term.put_i32(frame_offset + TERM_OFFSET_OFFSET, term_offset)
}

#[inline]
pub fn frame_session_id(term: &AtomicBuffer, frame_offset: usize) -> i32 {
    term.get_i32(frame_offset + SESSION_ID_OFFSET)
}

#[inline]
pub fn frame_stream_id(term: &AtomicBuffer, frame_offset: usize) -> i32 {
    term.get_i32(frame_offset + STREAM_ID_OFFSET)
}

#[inline]
pub fn frame_term_id(term: &AtomicBuffer, frame_offset: usize) -> i32 {
    term.get_i32(frame_offset + TERM_ID_OFFSET)
}

#[inline]
pub fn set_frame_term_id(term: &AtomicBuffer, frame_offset: usize, term_id: i32) {
    term.put_i32(frame_offset + TERM_ID_OFFSET, term_id)
}

#[inline]
pub fn frame_reserved_value(term: &AtomicBuffer, frame_offset: usize) -> i64 {
    term.get_i64(frame_offset + RESERVED_VALUE_OFFSET)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_is_32_bytes() {
        assert_eq!(frame_aligned_length(1), 32);
        assert_eq!(frame_aligned_length(32), 32);
        assert_eq!(frame_aligned_length(33), 64);
        assert_eq!(frame_aligned_length(132), 160);
    }

    #[test]
    fn field_roundtrip() {
        let mut backing = vec![0u64; 16];
        // SAFETY: Vec allocation is 8-byte aligned and outlives the test.
        let term =
            unsafe { AtomicBuffer::new(backing.as_mut_ptr() as *mut u8, backing.len() * 8) };

        set_frame_type(&term, 32, HDR_TYPE_DATA);
        set_frame_flags(&term, 32, UNFRAGMENTED);
        set_frame_term_offset(&term, 32, 32);
        set_frame_term_id(&term, 32, 5);
        frame_length_ordered(&term, 32, 64);

        assert_eq!(frame_length_volatile(&term, 32), 64);
        assert_eq!(frame_type(&term, 32), HDR_TYPE_DATA);
        assert_eq!(frame_flags(&term, 32), UNFRAGMENTED);
        assert_eq!(frame_term_offset(&term, 32), 32);
        assert_eq!(frame_term_id(&term, 32), 5);
        assert!(!is_padding_frame(frame_length_volatile(&term, 32)));
        assert!(is_padding_frame(-64));
    }
}
