//! Log buffer layout and position algebra.
//!
//! A log is three equal term partitions followed by a metadata page. The
//! global stream position is a 64-bit monotone counter; term id, term
//! offset and the active partition all derive from it:
//!
//! ```text
//! term_id     = initial_term_id + (position >> log2(term_length))
//! term_offset = position & (term_length - 1)
//! partition   = (position >> log2(term_length)) mod 3
//! ```
//!
//! Each partition's tail is a packed i64 `term_id << 32 | term_offset` so
//! a single CAS moves both fields together. At any instant one partition
//! is active, the previous one is being cleaned, and the next one is
//! pre-initialised with the term id that will follow rotation.

use crate::concurrent::atomic_buffer::AtomicBuffer;
use crate::error::{HermesError, HermesResult};
use crate::logbuffer::frame_descriptor::{self, HEADER_LENGTH};
use crate::util::align;

/// Number of term partitions per log.
pub const PARTITION_COUNT: usize = 3;

/// Minimum term length (64 KiB).
pub const TERM_MIN_LENGTH: usize = 64 * 1024;

/// Maximum term length (1 GiB).
pub const TERM_MAX_LENGTH: usize = 1 << 30;

/// Minimum file page size (4 KiB).
pub const PAGE_MIN_SIZE: usize = 4 * 1024;

/// Maximum file page size (1 GiB).
pub const PAGE_MAX_SIZE: usize = 1 << 30;

/// Length of the metadata section proper. It lives in the final
/// `LOG_META_DATA_LENGTH` bytes of the file so a mapper can locate it from
/// the file length alone.
pub const LOG_META_DATA_LENGTH: usize = 4096;

// Metadata section offsets. Hot fields (tails, active term count) lead;
// fields written by different parties sit on separate cache lines.
pub const TERM_TAIL_COUNTERS_OFFSET: usize = 0;
pub const LOG_ACTIVE_TERM_COUNT_OFFSET: usize = 24;
pub const LOG_END_OF_STREAM_POSITION_OFFSET: usize = 64;
pub const LOG_IS_CONNECTED_OFFSET: usize = 72;
pub const LOG_ACTIVE_TRANSPORT_COUNT_OFFSET: usize = 76;
pub const LOG_CORRELATION_ID_OFFSET: usize = 128;
pub const LOG_INITIAL_TERM_ID_OFFSET: usize = 136;
pub const LOG_MTU_LENGTH_OFFSET: usize = 140;
pub const LOG_TERM_LENGTH_OFFSET: usize = 144;
pub const LOG_PAGE_SIZE_OFFSET: usize = 148;
pub const LOG_DEFAULT_FRAME_HEADER_OFFSET: usize = 192;

/// Validate a term length.
pub fn check_term_length(term_length: usize) -> HermesResult<()> {
    if !term_length.is_power_of_two()
        || !(TERM_MIN_LENGTH..=TERM_MAX_LENGTH).contains(&term_length)
    {
        return Err(HermesError::config(format!(
            "term length {} not a power of 2 in [{}, {}]",
            term_length, TERM_MIN_LENGTH, TERM_MAX_LENGTH
        )));
    }
    Ok(())
}

/// Validate a file page size.
pub fn check_page_size(page_size: usize) -> HermesResult<()> {
    if !page_size.is_power_of_two() || !(PAGE_MIN_SIZE..=PAGE_MAX_SIZE).contains(&page_size) {
        return Err(HermesError::config(format!(
            "page size {} not a power of 2 in [{}, {}]",
            page_size, PAGE_MIN_SIZE, PAGE_MAX_SIZE
        )));
    }
    Ok(())
}

/// Total file length for a log: three terms plus the page-aligned
/// metadata region.
pub fn compute_log_length(term_length: usize, page_size: usize) -> usize {
    term_length * PARTITION_COUNT + align(LOG_META_DATA_LENGTH, page_size)
}

/// log2 of the term length, used for all position conversions.
#[inline]
pub fn position_bits_to_shift(term_length: usize) -> u32 {
    term_length.trailing_zeros()
}

// === Packed tails ===

#[inline]
pub fn pack_tail(term_id: i32, term_offset: i32) -> i64 {
    ((term_id as i64) << 32) | (term_offset as i64 & 0xFFFF_FFFF)
}

#[inline]
pub fn term_id_from_raw_tail(raw_tail: i64) -> i32 {
    (raw_tail >> 32) as i32
}

/// Tail offset capped at the term length (a fetch-add may push the raw
/// offset past the end of the term).
#[inline]
pub fn term_offset_from_raw_tail(raw_tail: i64, term_length: usize) -> i32 {
    (raw_tail & 0xFFFF_FFFF).min(term_length as i64) as i32
}

#[inline]
fn tail_counter_offset(index: usize) -> usize {
    debug_assert!(index < PARTITION_COUNT);
    TERM_TAIL_COUNTERS_OFFSET + index * 8
}

#[inline]
pub fn raw_tail_volatile(meta: &AtomicBuffer, index: usize) -> i64 {
    meta.get_i64_volatile(tail_counter_offset(index))
}

#[inline]
pub fn raw_tail(meta: &AtomicBuffer, index: usize) -> i64 {
    meta.get_i64(tail_counter_offset(index))
}

#[inline]
pub fn set_raw_tail(meta: &AtomicBuffer, index: usize, raw_tail: i64) {
    meta.put_i64(tail_counter_offset(index), raw_tail)
}

#[inline]
pub fn cas_raw_tail(meta: &AtomicBuffer, index: usize, expected: i64, updated: i64) -> bool {
    meta.compare_and_set_i64(tail_counter_offset(index), expected, updated)
}

#[inline]
pub fn get_and_add_raw_tail(meta: &AtomicBuffer, index: usize, delta: i64) -> i64 {
    meta.get_and_add_i64(tail_counter_offset(index), delta)
}

/// Set a partition's tail to the start of `term_id`.
pub fn initialize_tail_with_term_id(meta: &AtomicBuffer, index: usize, term_id: i32) {
    set_raw_tail(meta, index, pack_tail(term_id, 0))
}

// === Metadata fields ===

#[inline]
pub fn active_term_count(meta: &AtomicBuffer) -> i32 {
    meta.get_i32_volatile(LOG_ACTIVE_TERM_COUNT_OFFSET)
}

#[inline]
pub fn set_active_term_count(meta: &AtomicBuffer, count: i32) {
    meta.put_i32_ordered(LOG_ACTIVE_TERM_COUNT_OFFSET, count)
}

#[inline]
pub fn cas_active_term_count(meta: &AtomicBuffer, expected: i32, updated: i32) -> bool {
    meta.compare_and_set_i32(LOG_ACTIVE_TERM_COUNT_OFFSET, expected, updated)
}

#[inline]
pub fn initial_term_id(meta: &AtomicBuffer) -> i32 {
    meta.get_i32(LOG_INITIAL_TERM_ID_OFFSET)
}

#[inline]
pub fn term_length(meta: &AtomicBuffer) -> usize {
    meta.get_i32(LOG_TERM_LENGTH_OFFSET) as usize
}

#[inline]
pub fn page_size(meta: &AtomicBuffer) -> usize {
    meta.get_i32(LOG_PAGE_SIZE_OFFSET) as usize
}

#[inline]
pub fn mtu_length(meta: &AtomicBuffer) -> usize {
    meta.get_i32(LOG_MTU_LENGTH_OFFSET) as usize
}

#[inline]
pub fn correlation_id(meta: &AtomicBuffer) -> i64 {
    meta.get_i64(LOG_CORRELATION_ID_OFFSET)
}

#[inline]
pub fn is_connected(meta: &AtomicBuffer) -> bool {
    meta.get_i32_volatile(LOG_IS_CONNECTED_OFFSET) == 1
}

#[inline]
pub fn set_is_connected(meta: &AtomicBuffer, connected: bool) {
    meta.put_i32_ordered(LOG_IS_CONNECTED_OFFSET, i32::from(connected))
}

#[inline]
pub fn active_transport_count(meta: &AtomicBuffer) -> i32 {
    meta.get_i32_volatile(LOG_ACTIVE_TRANSPORT_COUNT_OFFSET)
}

#[inline]
pub fn end_of_stream_position(meta: &AtomicBuffer) -> i64 {
    meta.get_i64_volatile(LOG_END_OF_STREAM_POSITION_OFFSET)
}

#[inline]
pub fn set_end_of_stream_position(meta: &AtomicBuffer, position: i64) {
    meta.put_i64_ordered(LOG_END_OF_STREAM_POSITION_OFFSET, position)
}

// === Index and position conversions ===

#[inline]
pub fn index_by_term(initial_term_id: i32, term_id: i32) -> usize {
    (term_id.wrapping_sub(initial_term_id) as u32 as usize) % PARTITION_COUNT
}

#[inline]
pub fn index_by_term_count(term_count: i32) -> usize {
    (term_count as u32 as usize) % PARTITION_COUNT
}

#[inline]
pub fn index_by_position(position: i64, position_bits_to_shift: u32) -> usize {
    (((position >> position_bits_to_shift) as u64) % PARTITION_COUNT as u64) as usize
}

/// Absolute position of `(term_id, term_offset)`.
#[inline]
pub fn compute_position(
    term_id: i32,
    term_offset: i32,
    position_bits_to_shift: u32,
    initial_term_id: i32,
) -> i64 {
    let term_count = term_id.wrapping_sub(initial_term_id) as i64;
    (term_count << position_bits_to_shift) + term_offset as i64
}

/// Absolute position of the start of `term_id`.
#[inline]
pub fn compute_term_begin_position(
    term_id: i32,
    position_bits_to_shift: u32,
    initial_term_id: i32,
) -> i64 {
    compute_position(term_id, 0, position_bits_to_shift, initial_term_id)
}

#[inline]
pub fn compute_term_id_from_position(
    position: i64,
    position_bits_to_shift: u32,
    initial_term_id: i32,
) -> i32 {
    ((position >> position_bits_to_shift) + initial_term_id as i64) as i32
}

#[inline]
pub fn compute_term_offset_from_position(position: i64, position_bits_to_shift: u32) -> i32 {
    (position & ((1i64 << position_bits_to_shift) - 1)) as i32
}

// === Rotation ===

/// Rotate the log: pre-initialise the tail of the partition after the
/// next one, then advance the active term count. Idempotent under races;
/// losing a CAS means another party already rotated.
pub fn rotate_log(meta: &AtomicBuffer, current_term_count: i32, current_term_id: i32) -> bool {
    let next_term_id = current_term_id.wrapping_add(1);
    let next_term_count = current_term_count.wrapping_add(1);
    let next_index = index_by_term_count(next_term_count);
    let expected_term_id = next_term_id.wrapping_sub(PARTITION_COUNT as i32);
    let new_raw_tail = pack_tail(next_term_id, 0);

    loop {
        let raw_tail = raw_tail_volatile(meta, next_index);
        if expected_term_id != term_id_from_raw_tail(raw_tail) {
            break;
        }
        if cas_raw_tail(meta, next_index, raw_tail, new_raw_tail) {
            break;
        }
    }

    cas_active_term_count(meta, current_term_count, next_term_count)
}

// === Default frame header ===

/// Write the 32-byte default header template producers stamp on every
/// frame. The frame length stays 0; term offset and term id are patched
/// per frame by the appender.
pub fn store_default_frame_header(meta: &AtomicBuffer, session_id: i32, stream_id: i32) {
    let header = meta.as_mut_slice(LOG_DEFAULT_FRAME_HEADER_OFFSET, HEADER_LENGTH);
    header.fill(0);
    header[frame_descriptor::VERSION_OFFSET] = frame_descriptor::CURRENT_VERSION;
    header[frame_descriptor::FLAGS_OFFSET] = frame_descriptor::UNFRAGMENTED;
    header[frame_descriptor::TYPE_OFFSET..frame_descriptor::TYPE_OFFSET + 2]
        .copy_from_slice(&frame_descriptor::HDR_TYPE_DATA.to_le_bytes());
    header[frame_descriptor::SESSION_ID_OFFSET..frame_descriptor::SESSION_ID_OFFSET + 4]
        .copy_from_slice(&session_id.to_le_bytes());
    header[frame_descriptor::STREAM_ID_OFFSET..frame_descriptor::STREAM_ID_OFFSET + 4]
        .copy_from_slice(&stream_id.to_le_bytes());
}

/// Borrow the default frame header template.
pub fn default_frame_header(meta: &AtomicBuffer) -> &[u8] {
    meta.as_slice(LOG_DEFAULT_FRAME_HEADER_OFFSET, HEADER_LENGTH)
}

/// Initialise a fresh log's metadata: partition 0 starts at
/// `initial_term_id`, the other two are pre-set to the term ids that will
/// land there after rotation, end-of-stream starts unbounded.
#[allow(clippy::too_many_arguments)]
pub fn initialize_log_metadata(
    meta: &AtomicBuffer,
    initial_term_id: i32,
    term_length: usize,
    page_size: usize,
    mtu_length: usize,
    correlation_id: i64,
    session_id: i32,
    stream_id: i32,
) {
    initialize_tail_with_term_id(meta, 0, initial_term_id);
    for i in 1..PARTITION_COUNT {
        let expected_term_id = initial_term_id.wrapping_add(i as i32) - PARTITION_COUNT as i32;
        initialize_tail_with_term_id(meta, i, expected_term_id);
    }

    meta.put_i32(LOG_ACTIVE_TERM_COUNT_OFFSET, 0);
    meta.put_i32(LOG_INITIAL_TERM_ID_OFFSET, initial_term_id);
    meta.put_i32(LOG_TERM_LENGTH_OFFSET, term_length as i32);
    meta.put_i32(LOG_PAGE_SIZE_OFFSET, page_size as i32);
    meta.put_i32(LOG_MTU_LENGTH_OFFSET, mtu_length as i32);
    meta.put_i64(LOG_CORRELATION_ID_OFFSET, correlation_id);
    meta.put_i32(LOG_IS_CONNECTED_OFFSET, 0);
    meta.put_i32(LOG_ACTIVE_TRANSPORT_COUNT_OFFSET, 0);
    meta.put_i64(LOG_END_OF_STREAM_POSITION_OFFSET, i64::MAX);
    store_default_frame_header(meta, session_id, stream_id);
}

/// Re-point a log at a replay start position: the active partition's tail
/// is `(term_id, term_offset)` and the active term count reflects how far
/// the stream had progressed. The replay-derived term count is kept as-is
/// (overwriting it with zero would desynchronise partition selection from
/// the tails).
pub fn initialize_log_metadata_for_replay(
    meta: &AtomicBuffer,
    initial_term_id: i32,
    term_id: i32,
    term_offset: i32,
) {
    let term_count = term_id.wrapping_sub(initial_term_id);
    let mut index = index_by_term_count(term_count);
    set_raw_tail(meta, index, pack_tail(term_id, term_offset));

    for i in 1..PARTITION_COUNT as i32 {
        let expected_term_id = term_id.wrapping_add(i) - PARTITION_COUNT as i32;
        index = (index + 1) % PARTITION_COUNT;
        initialize_tail_with_term_id(meta, index, expected_term_id);
    }

    meta.put_i32(LOG_ACTIVE_TERM_COUNT_OFFSET, term_count);
}
