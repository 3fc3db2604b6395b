//! Many-to-one ring buffer carrying client commands to the driver.
//!
//! Producers claim space with a CAS on the tail position, write the record
//! body, then publish by release-storing the record length; a zero length
//! is an uncommitted claim and stops the consumer, exactly like the term
//! claim protocol. The single consumer zeroes space as it commits the head
//! so producers always wrap into clean memory.
//!
//! Record layout (8-byte aligned):
//!
//! ```text
//!  0: length  (i32; 0 = uncommitted, negative = padding of |length| bytes)
//!  4: msg type (i32; positive application types)
//!  8: payload
//! ```
//!
//! A trailer after the data region holds the tail, a producer-side cached
//! head, the head, a correlation-id counter and the consumer heartbeat,
//! each on its own cache line.

use crate::concurrent::atomic_buffer::AtomicBuffer;
use crate::error::{HermesError, HermesResult};
use crate::util::{align, CACHE_LINE_LENGTH};

/// Record header length (length + type).
pub const RECORD_HEADER_LENGTH: usize = 8;

/// Record alignment.
pub const RECORD_ALIGNMENT: usize = 8;

/// Message type used for padding records.
pub const PADDING_MSG_TYPE: i32 = -1;

/// Trailer size appended to the data region.
pub const TRAILER_LENGTH: usize = CACHE_LINE_LENGTH * 5;

const TAIL_POSITION_OFFSET: usize = 0;
const HEAD_CACHE_POSITION_OFFSET: usize = CACHE_LINE_LENGTH;
const HEAD_POSITION_OFFSET: usize = CACHE_LINE_LENGTH * 2;
const CORRELATION_COUNTER_OFFSET: usize = CACHE_LINE_LENGTH * 3;
const CONSUMER_HEARTBEAT_OFFSET: usize = CACHE_LINE_LENGTH * 4;

const TYPE_OFFSET: usize = 4;

/// Multi-producer, single-consumer ring over shared memory.
#[derive(Debug, Clone, Copy)]
pub struct RingBuffer {
    buffer: AtomicBuffer,
    capacity: usize,
    max_msg_length: usize,
}

impl RingBuffer {
    /// Wrap a region of `data capacity + TRAILER_LENGTH` bytes. The data
    /// capacity must be a power of two.
    pub fn new(buffer: AtomicBuffer) -> HermesResult<Self> {
        if buffer.capacity() <= TRAILER_LENGTH {
            return Err(HermesError::invalid_input(format!(
                "ring buffer region too small: {}",
                buffer.capacity()
            )));
        }
        let capacity = buffer.capacity() - TRAILER_LENGTH;
        if !capacity.is_power_of_two() {
            return Err(HermesError::invalid_input(format!(
                "ring buffer capacity not a power of 2: {}",
                capacity
            )));
        }
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

    #[inline]
    pub fn max_msg_length(&self) -> usize {
        self.max_msg_length
    }

    /// Write one message. Fails with `Memory` when the ring is full
    /// (callers treat this as back-pressure and retry).
    pub fn write(&self, msg_type: i32, payload: &[u8]) -> HermesResult<()> {
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

        let record_length = payload.len() + RECORD_HEADER_LENGTH;
        let required = align(record_length, RECORD_ALIGNMENT);
        let record_index = self.claim_capacity(required)?;

        self.buffer.put_i32(record_index + TYPE_OFFSET, msg_type);
        self.buffer
            .put_bytes(record_index + RECORD_HEADER_LENGTH, payload);
        // Publish: a reader that observes the length sees the whole record.
        self.buffer
            .put_i32_ordered(record_index, record_length as i32);
        Ok(())
    }

    /// Read up to `message_limit` committed records, invoking
    /// `handler(msg_type, buffer, payload_offset, payload_length)`.
    ///
    /// Single consumer only. Consumed space is zeroed before the head is
    /// published so producers always claim clean memory.
    pub fn read<F>(&self, mut handler: F, message_limit: usize) -> usize
    where
        F: FnMut(i32, &AtomicBuffer, usize, usize),
    {
        let head = self.buffer.get_i64(self.head_offset());
        let head_index = (head & self.mask()) as usize;
        let contiguous = self.capacity - head_index;

        let mut bytes_read = 0usize;
        let mut messages = 0usize;

        while bytes_read < contiguous && messages < message_limit {
            let record_index = head_index + bytes_read;
            let length = self.buffer.get_i32_volatile(record_index);
            if length == 0 {
                break;
            }

            bytes_read += align(length.unsigned_abs() as usize, RECORD_ALIGNMENT);

            if length < 0 {
                // Padding from a wrap or an unblock; skip.
                continue;
            }

            let msg_type = self.buffer.get_i32(record_index + TYPE_OFFSET);
            handler(
                msg_type,
                &self.buffer,
                record_index + RECORD_HEADER_LENGTH,
                length as usize - RECORD_HEADER_LENGTH,
            );
            messages += 1;
        }

        if bytes_read > 0 {
            self.buffer.set_memory(head_index, bytes_read, 0);
            self.buffer
                .put_i64_ordered(self.head_offset(), head + bytes_read as i64);
        }

        messages
    }

    /// Recover from a producer that claimed space and never committed.
    ///
    /// If the record at the head is still uncommitted, pad up to the next
    /// committed record (or the producer position / buffer end) so the
    /// consumer can advance. Returns whether anything was unblocked.
    pub fn unblock(&self) -> bool {
        let mask = self.mask();
        let head = self.buffer.get_i64_volatile(self.head_offset());
        let tail = self.buffer.get_i64_volatile(self.tail_offset());
        if tail == head {
            return false;
        }

        let consumer_index = (head & mask) as usize;
        let producer_index = (tail & mask) as usize;
        if self.buffer.get_i32_volatile(consumer_index) != 0 {
            return false;
        }

        let limit = if producer_index > consumer_index {
            producer_index
        } else {
            self.capacity
        };

        let mut scan = consumer_index + RECORD_ALIGNMENT;
        while scan < limit && self.buffer.get_i32_volatile(scan) == 0 {
            scan += RECORD_ALIGNMENT;
        }

        // Confirm nothing committed behind the scan point in the meantime.
        let mut check = scan - RECORD_ALIGNMENT;
        while check > consumer_index {
            if self.buffer.get_i32_volatile(check) != 0 {
                return false;
            }
            check -= RECORD_ALIGNMENT;
        }

        let gap = scan - consumer_index;
        self.buffer
            .put_i32(consumer_index + TYPE_OFFSET, PADDING_MSG_TYPE);
        self.buffer
            .put_i32_ordered(consumer_index, -(gap as i32));
        true
    }

    /// Next unique correlation id for a command.
    #[inline]
    pub fn next_correlation_id(&self) -> i64 {
        self.buffer
            .get_and_add_i64(self.capacity + CORRELATION_COUNTER_OFFSET, 1)
    }

    #[inline]
    pub fn consumer_heartbeat_time(&self) -> i64 {
        self.buffer
            .get_i64_volatile(self.capacity + CONSUMER_HEARTBEAT_OFFSET)
    }

    #[inline]
    pub fn set_consumer_heartbeat_time(&self, now_ms: i64) {
        self.buffer
            .put_i64_ordered(self.capacity + CONSUMER_HEARTBEAT_OFFSET, now_ms)
    }

    #[inline]
    pub fn producer_position(&self) -> i64 {
        self.buffer.get_i64_volatile(self.tail_offset())
    }

    #[inline]
    pub fn consumer_position(&self) -> i64 {
        self.buffer.get_i64_volatile(self.head_offset())
    }

    #[inline]
    fn mask(&self) -> i64 {
        (self.capacity - 1) as i64
    }

    #[inline]
    fn tail_offset(&self) -> usize {
        self.capacity + TAIL_POSITION_OFFSET
    }

    #[inline]
    fn head_cache_offset(&self) -> usize {
        self.capacity + HEAD_CACHE_POSITION_OFFSET
    }

    #[inline]
    fn head_offset(&self) -> usize {
        self.capacity + HEAD_POSITION_OFFSET
    }

    /// Claim `required` bytes, returning the record index.
    ///
    /// Lazy head caching: producers re-read the consumer's head only when
    /// the cached value says the ring looks full, avoiding a cross-core
    /// cache line bounce on every claim.
    fn claim_capacity(&self, required: usize) -> HermesResult<usize> {
        let mask = self.mask();
        let capacity = self.capacity as i64;
        let mut head = self.buffer.get_i64_volatile(self.head_cache_offset());

        loop {
            let tail = self.buffer.get_i64_volatile(self.tail_offset());

            if required as i64 > capacity - (tail - head) {
                head = self.buffer.get_i64_volatile(self.head_offset());
                if required as i64 > capacity - (tail - head) {
                    return Err(HermesError::memory("command ring full".to_string()));
                }
                self.buffer.put_i64_ordered(self.head_cache_offset(), head);
            }

            let tail_index = (tail & mask) as usize;
            let to_buffer_end = self.capacity - tail_index;
            let mut padding = 0usize;

            if required > to_buffer_end {
                // The record must wrap; the front of the buffer up to the
                // head index has to be free.
                let mut head_index = (head & mask) as usize;
                if required > head_index {
                    head = self.buffer.get_i64_volatile(self.head_offset());
                    head_index = (head & mask) as usize;
                    if required > head_index {
                        return Err(HermesError::memory("command ring full".to_string()));
                    }
                    self.buffer.put_i64_ordered(self.head_cache_offset(), head);
                }
                padding = to_buffer_end;
            }

            if self.buffer.compare_and_set_i64(
                self.tail_offset(),
                tail,
                tail + (required + padding) as i64,
            ) {
                if padding != 0 {
                    self.buffer
                        .put_i32(tail_index + TYPE_OFFSET, PADDING_MSG_TYPE);
                    self.buffer
                        .put_i32_ordered(tail_index, -(padding as i32));
                    return Ok(0);
                }
                return Ok(tail_index);
            }
        }
    }
}
