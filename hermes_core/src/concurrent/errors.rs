//! Distinct error log: coalescing error observations in a shared buffer.
//!
//! Each distinct error message gets one record; repeat observations bump a
//! counter and the last-seen timestamp instead of appending. Records are
//! committed by release-storing the length last, so readers in other
//! processes never see a partial record.
//!
//! Record layout (8-byte aligned):
//!
//! ```text
//!  0: length               (i32; total including header; 0 = end of log)
//!  4: observation_count    (i32, ordered increments)
//!  8: last_observation_ms  (i64)
//! 16: first_observation_ms (i64)
//! 24: encoded message (utf-8)
//! ```

use crate::concurrent::atomic_buffer::AtomicBuffer;
use crate::util::align;

const LENGTH_OFFSET: usize = 0;
const OBSERVATION_COUNT_OFFSET: usize = 4;
const LAST_OBSERVATION_MS_OFFSET: usize = 8;
const FIRST_OBSERVATION_MS_OFFSET: usize = 16;
const ENCODED_ERROR_OFFSET: usize = 24;

const RECORD_ALIGNMENT: usize = 8;

/// Writer side. Owned by the driver conductor (single-threaded); the
/// `offsets` index avoids rescanning the buffer on every repeat
/// observation.
pub struct DistinctErrorLog {
    buffer: AtomicBuffer,
    next_offset: usize,
    observations: Vec<(usize, String)>,
}

impl DistinctErrorLog {
    pub fn new(buffer: AtomicBuffer) -> Self {
        Self {
            buffer,
            next_offset: 0,
            observations: Vec::new(),
        }
    }

    /// Record an observation of `message`. Returns false if the log is
    /// full and the message is new.
    pub fn record(&mut self, message: &str, now_ms: i64) -> bool {
        if let Some((offset, _)) = self
            .observations
            .iter()
            .find(|(_, existing)| existing == message)
        {
            let offset = *offset;
            self.buffer
                .put_i64_ordered(offset + LAST_OBSERVATION_MS_OFFSET, now_ms);
            let count = self.buffer.get_i32(offset + OBSERVATION_COUNT_OFFSET);
            self.buffer
                .put_i32_ordered(offset + OBSERVATION_COUNT_OFFSET, count + 1);
            return true;
        }

        let encoded = message.as_bytes();
        let length = ENCODED_ERROR_OFFSET + encoded.len();
        let aligned = align(length, RECORD_ALIGNMENT);
        if self.next_offset + aligned > self.buffer.capacity() {
            return false;
        }

        let offset = self.next_offset;
        self.buffer
            .put_i64(offset + FIRST_OBSERVATION_MS_OFFSET, now_ms);
        self.buffer
            .put_i64(offset + LAST_OBSERVATION_MS_OFFSET, now_ms);
        self.buffer.put_i32(offset + OBSERVATION_COUNT_OFFSET, 1);
        self.buffer.put_bytes(offset + ENCODED_ERROR_OFFSET, encoded);
        self.buffer
            .put_i32_ordered(offset + LENGTH_OFFSET, length as i32);

        self.next_offset += aligned;
        self.observations.push((offset, message.to_string()));
        true
    }
}

/// One decoded observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorObservation {
    pub observation_count: i32,
    pub first_observation_ms: i64,
    pub last_observation_ms: i64,
    pub message: String,
}

/// Reader side; usable from any process mapping the log region.
pub struct ErrorLogReader {
    buffer: AtomicBuffer,
}

impl ErrorLogReader {
    pub fn new(buffer: AtomicBuffer) -> Self {
        Self { buffer }
    }

    /// Decode every committed observation.
    pub fn read(&self) -> Vec<ErrorObservation> {
        let mut observations = Vec::new();
        let mut offset = 0usize;

        while offset + ENCODED_ERROR_OFFSET <= self.buffer.capacity() {
            let length = self.buffer.get_i32_volatile(offset + LENGTH_OFFSET);
            if length == 0 {
                break;
            }

            let message_length = length as usize - ENCODED_ERROR_OFFSET;
            let message = String::from_utf8_lossy(
                self.buffer.as_slice(offset + ENCODED_ERROR_OFFSET, message_length),
            )
            .into_owned();

            observations.push(ErrorObservation {
                observation_count: self
                    .buffer
                    .get_i32_volatile(offset + OBSERVATION_COUNT_OFFSET),
                first_observation_ms: self.buffer.get_i64(offset + FIRST_OBSERVATION_MS_OFFSET),
                last_observation_ms: self
                    .buffer
                    .get_i64_volatile(offset + LAST_OBSERVATION_MS_OFFSET),
                message,
            });

            offset += align(length as usize, RECORD_ALIGNMENT);
        }

        observations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_buffer(backing: &mut Vec<u64>) -> AtomicBuffer {
        // SAFETY: Vec allocation is 8-byte aligned and outlives the test.
        unsafe { AtomicBuffer::new(backing.as_mut_ptr() as *mut u8, backing.len() * 8) }
    }

    #[test]
    fn distinct_errors_append() {
        let mut backing = vec![0u64; 128];
        let buffer = log_buffer(&mut backing);
        let mut log = DistinctErrorLog::new(buffer);

        assert!(log.record("no space left on device", 10));
        assert!(log.record("unknown publication: 42", 20));

        let observations = ErrorLogReader::new(buffer).read();
        assert_eq!(observations.len(), 2);
        assert_eq!(observations[0].message, "no space left on device");
        assert_eq!(observations[1].observation_count, 1);
    }

    #[test]
    fn repeat_observations_coalesce() {
        let mut backing = vec![0u64; 128];
        let buffer = log_buffer(&mut backing);
        let mut log = DistinctErrorLog::new(buffer);

        log.record("clashing session id: 7", 10);
        log.record("clashing session id: 7", 30);
        log.record("clashing session id: 7", 50);

        let observations = ErrorLogReader::new(buffer).read();
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].observation_count, 3);
        assert_eq!(observations[0].first_observation_ms, 10);
        assert_eq!(observations[0].last_observation_ms, 50);
    }

    #[test]
    fn full_log_rejects_new_messages() {
        let mut backing = vec![0u64; 8];
        let buffer = log_buffer(&mut backing);
        let mut log = DistinctErrorLog::new(buffer);

        assert!(log.record("abcdefghij", 1));
        assert!(!log.record("a different very long message that cannot fit", 2));
        // Existing messages still coalesce when the log is full.
        assert!(log.record("abcdefghij", 3));
    }
}
