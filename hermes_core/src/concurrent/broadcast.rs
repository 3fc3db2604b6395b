//! One-to-many broadcast channel for driver-to-client responses.
//!
//! A single transmitter (the driver conductor) writes records into a ring;
//! any number of receivers follow independently. Receivers are never flow
//! controlled: one that falls more than a buffer-length behind is lapped,
//! loses the overwritten records, and re-joins at the latest record. The
//! `tail_intent` counter is advanced before a record is written and the
//! `tail` after, so a receiver can always detect that the region it just
//! copied may have been overwritten and discard it.
//!
//! Record layout matches the command ring: `{length: i32, type: i32}`
//! header, 8-byte alignment, padding type `-1` to fill the seam at wrap.

use crate::concurrent::atomic_buffer::AtomicBuffer;
use crate::error::{HermesError, HermesResult};
use crate::util::{align, CACHE_LINE_LENGTH};

/// Trailer appended to the data region.
pub const TRAILER_LENGTH: usize = CACHE_LINE_LENGTH * 3;

const TAIL_INTENT_COUNTER_OFFSET: usize = 0;
const TAIL_COUNTER_OFFSET: usize = CACHE_LINE_LENGTH;
const LATEST_COUNTER_OFFSET: usize = CACHE_LINE_LENGTH * 2;

const RECORD_HEADER_LENGTH: usize = 8;
const RECORD_ALIGNMENT: usize = 8;
const TYPE_OFFSET: usize = 4;
const PADDING_MSG_TYPE: i32 = -1;

fn checked_capacity(buffer: &AtomicBuffer) -> HermesResult<usize> {
    if buffer.capacity() <= TRAILER_LENGTH {
        return Err(HermesError::invalid_input(format!(
            "broadcast region too small: {}",
            buffer.capacity()
        )));
    }
    let capacity = buffer.capacity() - TRAILER_LENGTH;
    if !capacity.is_power_of_two() {
        return Err(HermesError::invalid_input(format!(
            "broadcast capacity not a power of 2: {}",
            capacity
        )));
    }
    Ok(capacity)
}

/// The single writer side.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastTransmitter {
    buffer: AtomicBuffer,
    capacity: usize,
    max_msg_length: usize,
}

impl BroadcastTransmitter {
    pub fn new(buffer: AtomicBuffer) -> HermesResult<Self> {
        let capacity = checked_capacity(&buffer)?;
        Ok(Self {
            buffer,
            capacity,
            max_msg_length: capacity / 8,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Transmit one message to all receivers.
    pub fn transmit(&self, msg_type: i32, payload: &[u8]) -> HermesResult<()> {
        if msg_type < 1 {
            return Err(HermesError::invalid_input(format!(
                "message type must be positive: {}",
                msg_type
            )));
        }
        if payload.len() > self.max_msg_length {
            return Err(HermesError::invalid_input(format!(
                "message length {} exceeds max {}",
                payload.len(),
                self.max_msg_length
            )));
        }

        let mask = (self.capacity - 1) as i64;
        let record_length = payload.len() + RECORD_HEADER_LENGTH;
        let aligned_length = align(record_length, RECORD_ALIGNMENT);

        let mut tail = self.buffer.get_i64(self.tail_counter_offset());
        let mut record_offset = (tail & mask) as usize;
        let to_end = self.capacity - record_offset;

        if aligned_length > to_end {
            // Pad the seam and wrap to the front.
            self.signal_tail_intent(tail + (to_end + aligned_length) as i64);
            self.buffer.put_i32(record_offset, to_end as i32);
            self.buffer
                .put_i32(record_offset + TYPE_OFFSET, PADDING_MSG_TYPE);
            tail += to_end as i64;
            record_offset = 0;
        } else {
            self.signal_tail_intent(tail + aligned_length as i64);
        }

        self.buffer.put_i32(record_offset, record_length as i32);
        self.buffer.put_i32(record_offset + TYPE_OFFSET, msg_type);
        self.buffer
            .put_bytes(record_offset + RECORD_HEADER_LENGTH, payload);

        self.buffer.put_i64(self.latest_counter_offset(), tail);
        self.buffer
            .put_i64_ordered(self.tail_counter_offset(), tail + aligned_length as i64);
        Ok(())
    }

    #[inline]
    fn signal_tail_intent(&self, tail_intent: i64) {
        self.buffer
            .put_i64_ordered(self.tail_intent_counter_offset(), tail_intent);
        // Later plain stores must not be reordered before the intent.
        std::sync::atomic::fence(std::sync::atomic::Ordering::Release);
    }

    #[inline]
    fn tail_intent_counter_offset(&self) -> usize {
        self.capacity + TAIL_INTENT_COUNTER_OFFSET
    }

    #[inline]
    fn tail_counter_offset(&self) -> usize {
        self.capacity + TAIL_COUNTER_OFFSET
    }

    #[inline]
    fn latest_counter_offset(&self) -> usize {
        self.capacity + LATEST_COUNTER_OFFSET
    }
}

/// One receiver's view. Each receiver keeps its own cursor.
pub struct BroadcastReceiver {
    buffer: AtomicBuffer,
    capacity: usize,
    cursor: i64,
    next_record: i64,
    record_offset: usize,
    lapped_count: u64,
}

impl BroadcastReceiver {
    /// Join the channel at the current tail (only new records are seen).
    pub fn new(buffer: AtomicBuffer) -> HermesResult<Self> {
        let capacity = checked_capacity(&buffer)?;
        let tail = buffer.get_i64_volatile(capacity + TAIL_COUNTER_OFFSET);
        Ok(Self {
            buffer,
            capacity,
            cursor: tail,
            next_record: tail,
            record_offset: (tail & (capacity as i64 - 1)) as usize,
            lapped_count: 0,
        })
    }

    /// Times this receiver was overrun and re-joined at the latest record.
    #[inline]
    pub fn lapped_count(&self) -> u64 {
        self.lapped_count
    }

    /// Advance to the next record if one is available.
    pub fn receive_next(&mut self) -> bool {
        let mask = (self.capacity - 1) as i64;
        let tail = self
            .buffer
            .get_i64_volatile(self.capacity + TAIL_COUNTER_OFFSET);
        let mut cursor = self.next_record;

        if tail <= cursor {
            return false;
        }

        let mut record_offset = (cursor & mask) as usize;
        if !self.validate_at(cursor) {
            self.lapped_count += 1;
            cursor = self
                .buffer
                .get_i64(self.capacity + LATEST_COUNTER_OFFSET);
            record_offset = (cursor & mask) as usize;
        }

        self.cursor = cursor;
        self.next_record = cursor
            + align(self.buffer.get_i32(record_offset) as usize, RECORD_ALIGNMENT) as i64;

        if self.buffer.get_i32(record_offset + TYPE_OFFSET) == PADDING_MSG_TYPE {
            self.cursor = self.next_record;
            record_offset = 0;
            self.next_record +=
                align(self.buffer.get_i32(0) as usize, RECORD_ALIGNMENT) as i64;
        }

        self.record_offset = record_offset;
        true
    }

    /// Message type of the current record.
    #[inline]
    pub fn msg_type(&self) -> i32 {
        self.buffer.get_i32(self.record_offset + TYPE_OFFSET)
    }

    /// Payload offset of the current record.
    #[inline]
    pub fn offset(&self) -> usize {
        self.record_offset + RECORD_HEADER_LENGTH
    }

    /// Payload length of the current record.
    #[inline]
    pub fn length(&self) -> usize {
        self.buffer.get_i32(self.record_offset) as usize - RECORD_HEADER_LENGTH
    }

    #[inline]
    pub fn buffer(&self) -> &AtomicBuffer {
        &self.buffer
    }

    /// Confirm the record read at the current cursor was not overwritten
    /// while it was being copied.
    pub fn validate(&self) -> bool {
        self.validate_at(self.cursor)
    }

    #[inline]
    fn validate_at(&self, cursor: i64) -> bool {
        std::sync::atomic::fence(std::sync::atomic::Ordering::Acquire);
        let tail_intent = self
            .buffer
            .get_i64_volatile(self.capacity + TAIL_INTENT_COUNTER_OFFSET);
        cursor + self.capacity as i64 > tail_intent
    }
}

/// Receiver wrapper that hands out validated copies.
///
/// Copying decouples the handler from concurrent overwrites: a record that
/// fails validation after the copy is dropped rather than delivered torn.
pub struct CopyBroadcastReceiver {
    receiver: BroadcastReceiver,
    scratch: Vec<u8>,
}

impl CopyBroadcastReceiver {
    pub fn new(receiver: BroadcastReceiver) -> Self {
        Self {
            receiver,
            scratch: vec![0u8; 4096],
        }
    }

    /// Deliver every available record to `handler(msg_type, payload)`.
    pub fn receive<F: FnMut(i32, &[u8])>(&mut self, mut handler: F) -> usize {
        let mut messages = 0;
        while self.receiver.receive_next() {
            let length = self.receiver.length();
            if self.scratch.len() < length {
                self.scratch.resize(length, 0);
            }
            let msg_type = self.receiver.msg_type();
            self.receiver
                .buffer()
                .get_bytes(self.receiver.offset(), &mut self.scratch[..length]);

            if self.receiver.validate() {
                handler(msg_type, &self.scratch[..length]);
                messages += 1;
            }
        }
        messages
    }

    #[inline]
    pub fn lapped_count(&self) -> u64 {
        self.receiver.lapped_count()
    }
}
