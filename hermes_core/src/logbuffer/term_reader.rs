//! Consumer scan over one term partition.

use crate::concurrent::atomic_buffer::AtomicBuffer;
use crate::logbuffer::frame_descriptor::{
    self, frame_aligned_length, HEADER_LENGTH,
};
use crate::logbuffer::header::Header;

/// Result of one term read batch.
#[derive(Debug)]
pub struct ReadOutcome {
    /// Term offset after the batch (== term length when the term is done).
    pub offset: i32,
    /// Data fragments delivered.
    pub fragments_read: usize,
}

/// Read committed frames from `offset`, delivering up to `fragments_limit`
/// data fragments to `handler(body, header)`.
///
/// Stops at the first uncommitted frame (length 0). Padding frames
/// (negative length) are skipped, advancing the offset without a
/// delivery.
pub fn read<H>(
    term_buffer: &AtomicBuffer,
    mut offset: i32,
    handler: &mut H,
    fragments_limit: usize,
    header: &mut Header,
) -> ReadOutcome
where
    H: FnMut(&[u8], &Header),
{
    let capacity = term_buffer.capacity() as i32;
    let mut fragments_read = 0usize;

    while fragments_read < fragments_limit && offset < capacity {
        let frame_length = frame_descriptor::frame_length_volatile(term_buffer, offset as usize);
        if frame_length == 0 {
            break;
        }

        let frame_offset = offset as usize;

        if frame_descriptor::is_padding_frame(frame_length) {
            offset += frame_aligned_length(-frame_length);
            continue;
        }

        offset += frame_aligned_length(frame_length);
        header.wrap(*term_buffer, frame_offset);
        let body = term_buffer.as_slice(
            frame_offset + HEADER_LENGTH,
            frame_length as usize - HEADER_LENGTH,
        );
        handler(body, header);
        fragments_read += 1;
    }

    ReadOutcome {
        offset,
        fragments_read,
    }
}
