//! Shared counters file: labelled 64-bit values readable by every process.
//!
//! Two regions back the counters: a metadata region (one record per
//! counter: state, type id, registration id, label) and a values region
//! (one 64-bit value per counter). Each value gets a 128-byte slot so a
//! hot counter never shares a prefetch pair with its neighbours, the same
//! spacing rationale the topic ring headers use.
//!
//! The driver conductor is the only allocator; readers rendezvous on the
//! record state, which is published last with Release ordering.

use crate::concurrent::atomic_buffer::AtomicBuffer;
use crate::error::{HermesError, HermesResult};

/// Bytes per value slot (2 cache lines).
pub const COUNTER_LENGTH: usize = 128;

/// Bytes per metadata record.
pub const METADATA_LENGTH: usize = 256;

/// Offsets within a metadata record.
const STATE_OFFSET: usize = 0;
const TYPE_ID_OFFSET: usize = 4;
const REGISTRATION_ID_OFFSET: usize = 8;
const LABEL_LENGTH_OFFSET: usize = 16;
const LABEL_OFFSET: usize = 20;

/// Maximum label length storable in a record.
pub const MAX_LABEL_LENGTH: usize = METADATA_LENGTH - LABEL_OFFSET;

/// Record states.
pub const RECORD_UNUSED: i32 = 0;
pub const RECORD_ALLOCATED: i32 = 1;
pub const RECORD_RECLAIMED: i32 = -1;

/// Allocator for counters. Owned by the driver conductor; single-threaded.
pub struct CountersManager {
    metadata: AtomicBuffer,
    values: AtomicBuffer,
    max_counters: usize,
}

impl CountersManager {
    pub fn new(metadata: AtomicBuffer, values: AtomicBuffer) -> Self {
        let by_values = values.capacity() / COUNTER_LENGTH;
        let by_metadata = metadata.capacity() / METADATA_LENGTH;
        Self {
            metadata,
            values,
            max_counters: by_values.min(by_metadata),
        }
    }

    /// Allocate a counter, returning its id.
    ///
    /// Scans for the first unused or reclaimed record; the label and type
    /// are written before the state is published.
    pub fn allocate(&mut self, label: &str, type_id: i32) -> HermesResult<i32> {
        for id in 0..self.max_counters {
            let record = id * METADATA_LENGTH;
            let state = self.metadata.get_i32_volatile(record + STATE_OFFSET);
            if state == RECORD_UNUSED || state == RECORD_RECLAIMED {
                self.values.put_i64_ordered(id * COUNTER_LENGTH, 0);
                self.metadata.put_i32(record + TYPE_ID_OFFSET, type_id);
                self.metadata.put_i64(record + REGISTRATION_ID_OFFSET, 0);

                let label_bytes = label.as_bytes();
                let label_length = label_bytes.len().min(MAX_LABEL_LENGTH);
                self.metadata
                    .put_bytes(record + LABEL_OFFSET, &label_bytes[..label_length]);
                self.metadata
                    .put_i32(record + LABEL_LENGTH_OFFSET, label_length as i32);

                // State is published last so a reader that observes
                // ALLOCATED sees a complete record.
                self.metadata
                    .put_i32_ordered(record + STATE_OFFSET, RECORD_ALLOCATED);
                return Ok(id as i32);
            }
        }

        Err(HermesError::memory(format!(
            "counters exhausted: max_counters={}",
            self.max_counters
        )))
    }

    /// Free a counter for reuse. Zeroes the value.
    pub fn free(&mut self, counter_id: i32) {
        let record = counter_id as usize * METADATA_LENGTH;
        self.metadata
            .put_i32_ordered(record + STATE_OFFSET, RECORD_RECLAIMED);
        self.values
            .put_i64_ordered(counter_id as usize * COUNTER_LENGTH, 0);
    }

    /// Stamp the owning registration id on an allocated counter.
    pub fn set_registration_id(&mut self, counter_id: i32, registration_id: i64) {
        let record = counter_id as usize * METADATA_LENGTH;
        self.metadata
            .put_i64_ordered(record + REGISTRATION_ID_OFFSET, registration_id);
    }

    /// A `Position` handle over an allocated counter's value slot.
    pub fn position(&self, counter_id: i32) -> Position {
        Position::new(self.values, counter_id)
    }

    pub fn max_counters(&self) -> usize {
        self.max_counters
    }
}

/// Read-only access to the counters file from any process.
pub struct CountersReader {
    metadata: AtomicBuffer,
    values: AtomicBuffer,
    max_counters: usize,
}

impl CountersReader {
    pub fn new(metadata: AtomicBuffer, values: AtomicBuffer) -> Self {
        let by_values = values.capacity() / COUNTER_LENGTH;
        let by_metadata = metadata.capacity() / METADATA_LENGTH;
        Self {
            metadata,
            values,
            max_counters: by_values.min(by_metadata),
        }
    }

    /// Current value of a counter.
    pub fn counter_value(&self, counter_id: i32) -> i64 {
        self.values
            .get_i64_volatile(counter_id as usize * COUNTER_LENGTH)
    }

    /// Label of an allocated counter, or `None` if the slot is not live.
    pub fn label(&self, counter_id: i32) -> Option<String> {
        let record = counter_id as usize * METADATA_LENGTH;
        if self.metadata.get_i32_volatile(record + STATE_OFFSET) != RECORD_ALLOCATED {
            return None;
        }
        let length = self.metadata.get_i32(record + LABEL_LENGTH_OFFSET) as usize;
        let bytes = self
            .metadata
            .as_slice(record + LABEL_OFFSET, length.min(MAX_LABEL_LENGTH));
        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Visit every allocated counter as `(id, type_id, label)`.
    pub fn for_each<F: FnMut(i32, i32, &str)>(&self, mut handler: F) {
        for id in 0..self.max_counters {
            let record = id * METADATA_LENGTH;
            if self.metadata.get_i32_volatile(record + STATE_OFFSET) == RECORD_ALLOCATED {
                let length = self.metadata.get_i32(record + LABEL_LENGTH_OFFSET) as usize;
                let bytes = self
                    .metadata
                    .as_slice(record + LABEL_OFFSET, length.min(MAX_LABEL_LENGTH));
                let type_id = self.metadata.get_i32(record + TYPE_ID_OFFSET);
                handler(id as i32, type_id, &String::from_utf8_lossy(bytes));
            }
        }
    }

    /// A `Position` over a counter allocated by the driver.
    pub fn position(&self, counter_id: i32) -> Position {
        Position::new(self.values, counter_id)
    }
}

/// Handle to one counter value slot.
///
/// Each position counter has exactly one writer (producer position: the
/// producer; subscriber position: that subscriber; publisher limit: the
/// conductor) and any number of readers.
#[derive(Debug, Clone, Copy)]
pub struct Position {
    values: AtomicBuffer,
    counter_id: i32,
    offset: usize,
}

impl Position {
    pub fn new(values: AtomicBuffer, counter_id: i32) -> Self {
        Self {
            values,
            counter_id,
            offset: counter_id as usize * COUNTER_LENGTH,
        }
    }

    #[inline]
    pub fn id(&self) -> i32 {
        self.counter_id
    }

    /// Plain read; only valid from the single writer's own thread.
    #[inline]
    pub fn get(&self) -> i64 {
        self.values.get_i64(self.offset)
    }

    /// Acquire read for cross-thread observation.
    #[inline]
    pub fn get_volatile(&self) -> i64 {
        self.values.get_i64_volatile(self.offset)
    }

    /// Plain write; only valid from the single writer before publication.
    #[inline]
    pub fn set(&self, value: i64) {
        self.values.put_i64(self.offset, value)
    }

    /// Release write publishing the value to all readers.
    #[inline]
    pub fn set_ordered(&self, value: i64) {
        self.values.put_i64_ordered(self.offset, value)
    }

    /// Ordered increment for system counters.
    #[inline]
    pub fn increment_ordered(&self) {
        self.values.get_and_add_i64(self.offset, 1);
    }
}
