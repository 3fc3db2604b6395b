//! Recovery from producers that claimed a frame and never committed it.
//!
//! A crashed producer leaves a zero-length slot that stops every reader
//! forever. Once the conductor has watched the consumer position sit
//! still past the unblock timeout, it calls in here to write a padding
//! frame over the dead claim so readers advance. The scan re-confirms the
//! gap is still zeroed immediately before padding, shrinking the window
//! in which a merely slow producer could be overwritten.

use crate::concurrent::atomic_buffer::AtomicBuffer;
use crate::logbuffer::descriptor::{self, PARTITION_COUNT};
use crate::logbuffer::frame_descriptor::{self, FRAME_ALIGNMENT, UNFRAGMENTED};

/// Outcome of an unblock attempt on one term.
#[derive(Debug, PartialEq, Eq)]
pub enum UnblockStatus {
    /// Nothing to do, or a commit raced the scan.
    NoAction,
    /// Padded up to the next committed frame.
    Unblocked,
    /// Padded all the way to the tail.
    UnblockedToEnd,
}

/// Attempt to unblock a term at `blocked_offset`, with the producer tail
/// at `tail_offset`.
pub fn unblock(
    term_buffer: &AtomicBuffer,
    meta: &AtomicBuffer,
    blocked_offset: usize,
    tail_offset: usize,
    term_id: i32,
) -> UnblockStatus {
    if frame_descriptor::frame_length_volatile(term_buffer, blocked_offset) != 0 {
        return UnblockStatus::NoAction;
    }

    let alignment = FRAME_ALIGNMENT as usize;
    let mut scan = blocked_offset + alignment;
    while scan < tail_offset {
        if frame_descriptor::frame_length_volatile(term_buffer, scan) != 0 {
            if !still_zeroed(term_buffer, blocked_offset, scan) {
                return UnblockStatus::NoAction;
            }
            write_padding(term_buffer, meta, blocked_offset, scan - blocked_offset, term_id);
            return UnblockStatus::Unblocked;
        }
        scan += alignment;
    }

    if tail_offset > blocked_offset {
        if !still_zeroed(term_buffer, blocked_offset, tail_offset) {
            return UnblockStatus::NoAction;
        }
        write_padding(
            term_buffer,
            meta,
            blocked_offset,
            tail_offset - blocked_offset,
            term_id,
        );
        return UnblockStatus::UnblockedToEnd;
    }

    UnblockStatus::NoAction
}

/// Unblock a log at the consumer's position. Handles the stuck-rotation
/// case (producer padded out a term and died before advancing the active
/// term count) as well as an uncommitted claim inside the active term.
pub fn unblock_log(
    term_buffers: &[AtomicBuffer; PARTITION_COUNT],
    meta: &AtomicBuffer,
    blocked_position: i64,
) -> bool {
    let term_length = descriptor::term_length(meta);
    let bits = descriptor::position_bits_to_shift(term_length);
    let blocked_offset = descriptor::compute_term_offset_from_position(blocked_position, bits) as usize;
    let expected_term_count = (blocked_position >> bits) as i32;
    let active_term_count = descriptor::active_term_count(meta);

    if expected_term_count != active_term_count {
        if expected_term_count == active_term_count.wrapping_add(1) {
            // The consumer drained a term whose producer never rotated.
            let stale_index = descriptor::index_by_term_count(active_term_count);
            let stale_raw_tail = descriptor::raw_tail_volatile(meta, stale_index);
            if descriptor::term_offset_from_raw_tail(stale_raw_tail, term_length)
                == term_length as i32
            {
                return descriptor::rotate_log(
                    meta,
                    active_term_count,
                    descriptor::term_id_from_raw_tail(stale_raw_tail),
                );
            }
        }
        return false;
    }

    let index = descriptor::index_by_position(blocked_position, bits);
    let raw_tail = descriptor::raw_tail_volatile(meta, index);
    let tail_offset = descriptor::term_offset_from_raw_tail(raw_tail, term_length) as usize;
    let term_id = descriptor::term_id_from_raw_tail(raw_tail);

    unblock(
        &term_buffers[index],
        meta,
        blocked_offset,
        tail_offset,
        term_id,
    ) != UnblockStatus::NoAction
}

/// Re-check that every frame-length word in `[from, to)` is still zero.
fn still_zeroed(term_buffer: &AtomicBuffer, from: usize, to: usize) -> bool {
    let alignment = FRAME_ALIGNMENT as usize;
    let mut offset = from;
    while offset < to {
        if frame_descriptor::frame_length_volatile(term_buffer, offset) != 0 {
            return false;
        }
        offset += alignment;
    }
    true
}

fn write_padding(
    term_buffer: &AtomicBuffer,
    meta: &AtomicBuffer,
    frame_offset: usize,
    length: usize,
    term_id: i32,
) {
    let template = descriptor::default_frame_header(meta);
    term_buffer.put_bytes(frame_offset, template);
    frame_descriptor::set_frame_term_offset(term_buffer, frame_offset, frame_offset as i32);
    frame_descriptor::set_frame_term_id(term_buffer, frame_offset, term_id);
    frame_descriptor::set_frame_flags(term_buffer, frame_offset, UNFRAGMENTED);
    frame_descriptor::set_frame_type(term_buffer, frame_offset, frame_descriptor::HDR_TYPE_PAD);
    frame_descriptor::frame_length_ordered(term_buffer, frame_offset, -(length as i32));
}
