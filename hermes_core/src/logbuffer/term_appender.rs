//! Producer side of a term partition: the claim/commit protocol.
//!
//! To claim space the appender moves the partition's packed tail. Shared
//! sessions (several producer clients on one session) move it with a CAS
//! so concurrent claims serialise; an exclusive session is the only
//! writer and may use a plain fetch-add. A claim that would cross the end
//! of the term instead claims the remainder, writes a padding frame over
//! it and reports `Tripped` so the caller rotates the log and retries in
//! the next partition.
//!
//! A claimed frame is invisible until its length is release-stored; the
//! body and all other header fields are written first.

use crate::concurrent::atomic_buffer::AtomicBuffer;
use crate::logbuffer::buffer_claim::BufferClaim;
use crate::logbuffer::descriptor;
use crate::logbuffer::frame_descriptor::{
    self, frame_aligned_length, BEGIN_FRAG_FLAG, END_FRAG_FLAG, HEADER_LENGTH, UNFRAGMENTED,
};

/// Result of an append or claim on one partition.
#[derive(Debug)]
pub enum AppendOutcome {
    /// Frame(s) committed; `resulting_offset` is the tail just past them.
    Appended { term_id: i32, resulting_offset: i32 },
    /// The term was exhausted and padded out; rotate the log and retry.
    Tripped { term_id: i32 },
}

/// Result of a zero-copy claim on one partition.
#[derive(Debug)]
pub enum ClaimOutcome {
    Claimed {
        term_id: i32,
        resulting_offset: i32,
        claim: BufferClaim,
    },
    Tripped {
        term_id: i32,
    },
}

/// Appender over one term partition of a log.
#[derive(Debug, Clone, Copy)]
pub struct TermAppender {
    term_buffer: AtomicBuffer,
    meta: AtomicBuffer,
    partition_index: usize,
}

struct Slot {
    term_id: i32,
    term_offset: i32,
}

enum SlotOutcome {
    Claimed(Slot),
    Tripped { term_id: i32 },
}

impl TermAppender {
    pub fn new(term_buffer: AtomicBuffer, meta: AtomicBuffer, partition_index: usize) -> Self {
        Self {
            term_buffer,
            meta,
            partition_index,
        }
    }

    #[inline]
    pub fn term_buffer(&self) -> &AtomicBuffer {
        &self.term_buffer
    }

    /// Append a message that fits in a single frame.
    pub fn append_unfragmented(&self, msg: &[u8], is_exclusive: bool) -> AppendOutcome {
        let frame_length = msg.len() as i32 + HEADER_LENGTH as i32;
        let aligned_length = frame_aligned_length(frame_length);

        match self.claim_slot(aligned_length, is_exclusive) {
            SlotOutcome::Tripped { term_id } => AppendOutcome::Tripped { term_id },
            SlotOutcome::Claimed(slot) => {
                let frame_offset = slot.term_offset as usize;
                self.write_header(frame_offset, slot.term_id, UNFRAGMENTED);
                self.term_buffer.put_bytes(frame_offset + HEADER_LENGTH, msg);
                frame_descriptor::frame_length_ordered(
                    &self.term_buffer,
                    frame_offset,
                    frame_length,
                );

                AppendOutcome::Appended {
                    term_id: slot.term_id,
                    resulting_offset: slot.term_offset + aligned_length,
                }
            }
        }
    }

    /// Append a message split into MTU-sized fragments. The whole run is
    /// claimed with one tail move; fragments are committed in order, so a
    /// reader may observe a prefix of the run (reassembly joins them).
    pub fn append_fragmented(
        &self,
        msg: &[u8],
        max_payload_length: usize,
        is_exclusive: bool,
    ) -> AppendOutcome {
        let num_max_payloads = msg.len() / max_payload_length;
        let remaining_payload = msg.len() - num_max_payloads * max_payload_length;
        let last_frame_length = if remaining_payload > 0 {
            frame_aligned_length((remaining_payload + HEADER_LENGTH) as i32)
        } else {
            0
        };
        let required_length = (num_max_payloads
            * frame_aligned_length((max_payload_length + HEADER_LENGTH) as i32) as usize)
            as i32
            + last_frame_length;

        match self.claim_slot(required_length, is_exclusive) {
            SlotOutcome::Tripped { term_id } => AppendOutcome::Tripped { term_id },
            SlotOutcome::Claimed(slot) => {
                let mut flags = BEGIN_FRAG_FLAG;
                let mut frame_offset = slot.term_offset as usize;
                let mut written = 0usize;

                loop {
                    let chunk = (msg.len() - written).min(max_payload_length);
                    if written + chunk == msg.len() {
                        flags |= END_FRAG_FLAG;
                    }

                    let frame_length = (chunk + HEADER_LENGTH) as i32;
                    self.write_header(frame_offset, slot.term_id, flags);
                    self.term_buffer
                        .put_bytes(frame_offset + HEADER_LENGTH, &msg[written..written + chunk]);
                    frame_descriptor::frame_length_ordered(
                        &self.term_buffer,
                        frame_offset,
                        frame_length,
                    );

                    written += chunk;
                    frame_offset += frame_aligned_length(frame_length) as usize;
                    flags = 0;

                    if written == msg.len() {
                        break;
                    }
                }

                AppendOutcome::Appended {
                    term_id: slot.term_id,
                    resulting_offset: slot.term_offset + required_length,
                }
            }
        }
    }

    /// Claim a frame for zero-copy writing. The header is written with a
    /// zero length; `BufferClaim::commit` publishes it.
    pub fn claim(&self, length: usize, is_exclusive: bool) -> ClaimOutcome {
        let frame_length = (length + HEADER_LENGTH) as i32;
        let aligned_length = frame_aligned_length(frame_length);

        match self.claim_slot(aligned_length, is_exclusive) {
            SlotOutcome::Tripped { term_id } => ClaimOutcome::Tripped { term_id },
            SlotOutcome::Claimed(slot) => {
                let frame_offset = slot.term_offset as usize;
                self.write_header(frame_offset, slot.term_id, UNFRAGMENTED);

                // The view spans the unaligned frame; commit stores its
                // exact length.
                let claim_buffer = self
                    .term_buffer
                    .view(frame_offset, frame_length as usize)
                    .expect("claimed slot within term");

                ClaimOutcome::Claimed {
                    term_id: slot.term_id,
                    resulting_offset: slot.term_offset + aligned_length,
                    claim: BufferClaim::new(claim_buffer),
                }
            }
        }
    }

    /// Move the tail by `aligned_length`, or pad out the term and report
    /// `Tripped` when the claim would cross its end.
    fn claim_slot(&self, aligned_length: i32, is_exclusive: bool) -> SlotOutcome {
        let term_length = self.term_buffer.capacity() as i64;

        loop {
            let raw_tail = descriptor::raw_tail_volatile(&self.meta, self.partition_index);
            let term_offset = raw_tail & 0xFFFF_FFFF;
            let term_id = descriptor::term_id_from_raw_tail(raw_tail);

            if term_offset >= term_length {
                // Term already exhausted; the caller rotates.
                return SlotOutcome::Tripped { term_id };
            }

            let resulting_offset = term_offset + aligned_length as i64;
            if resulting_offset > term_length {
                // Claim the remainder, pad it, and trip the caller into
                // the next partition.
                let padded_tail = descriptor::pack_tail(term_id, term_length as i32);
                if descriptor::cas_raw_tail(&self.meta, self.partition_index, raw_tail, padded_tail)
                {
                    self.write_padding(term_offset as usize, (term_length - term_offset) as i32, term_id);
                    return SlotOutcome::Tripped { term_id };
                }
                continue;
            }

            if is_exclusive {
                // Single writer per the exclusive-publication contract;
                // fetch-add cannot race another claim.
                descriptor::get_and_add_raw_tail(
                    &self.meta,
                    self.partition_index,
                    aligned_length as i64,
                );
                return SlotOutcome::Claimed(Slot {
                    term_id,
                    term_offset: term_offset as i32,
                });
            }

            if descriptor::cas_raw_tail(
                &self.meta,
                self.partition_index,
                raw_tail,
                raw_tail + aligned_length as i64,
            ) {
                return SlotOutcome::Claimed(Slot {
                    term_id,
                    term_offset: term_offset as i32,
                });
            }
        }
    }

    /// Stamp the default header template and patch the per-frame fields.
    /// The frame length field in the template is zero, so the frame stays
    /// invisible until explicitly committed.
    fn write_header(&self, frame_offset: usize, term_id: i32, flags: u8) {
        let template = descriptor::default_frame_header(&self.meta);
        self.term_buffer.put_bytes(frame_offset, template);
        frame_descriptor::set_frame_term_offset(&self.term_buffer, frame_offset, frame_offset as i32);
        frame_descriptor::set_frame_term_id(&self.term_buffer, frame_offset, term_id);
        frame_descriptor::set_frame_flags(&self.term_buffer, frame_offset, flags);
    }

    fn write_padding(&self, frame_offset: usize, length: i32, term_id: i32) {
        self.write_header(frame_offset, term_id, UNFRAGMENTED);
        frame_descriptor::set_frame_type(&self.term_buffer, frame_offset, frame_descriptor::HDR_TYPE_PAD);
        frame_descriptor::frame_length_ordered(&self.term_buffer, frame_offset, -length);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logbuffer::descriptor::{
        initialize_log_metadata, LOG_META_DATA_LENGTH, PAGE_MIN_SIZE, TERM_MIN_LENGTH,
    };

    struct Fixture {
        _backing: Vec<u64>,
        term: AtomicBuffer,
        meta: AtomicBuffer,
    }

    fn fixture() -> Fixture {
        let mut backing = vec![0u64; (TERM_MIN_LENGTH + LOG_META_DATA_LENGTH) / 8];
        // SAFETY: Vec allocation is 8-byte aligned and outlives the fixture.
        let whole =
            unsafe { AtomicBuffer::new(backing.as_mut_ptr() as *mut u8, backing.len() * 8) };
        let term = whole.view(0, TERM_MIN_LENGTH).unwrap();
        let meta = whole.view(TERM_MIN_LENGTH, LOG_META_DATA_LENGTH).unwrap();
        initialize_log_metadata(&meta, 0, TERM_MIN_LENGTH, PAGE_MIN_SIZE, 4096, 1, 42, 10);
        Fixture {
            _backing: backing,
            term,
            meta,
        }
    }

    #[test]
    fn unfragmented_append_commits_visible_frame() {
        let f = fixture();
        let appender = TermAppender::new(f.term, f.meta, 0);

        let outcome = appender.append_unfragmented(b"hello world", false);
        match outcome {
            AppendOutcome::Appended {
                term_id,
                resulting_offset,
            } => {
                assert_eq!(term_id, 0);
                assert_eq!(resulting_offset, 64); // 32 header + 11 body -> 64 aligned
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        assert_eq!(frame_descriptor::frame_length_volatile(&f.term, 0), 43);
        assert_eq!(frame_descriptor::frame_session_id(&f.term, 0), 42);
        assert_eq!(frame_descriptor::frame_stream_id(&f.term, 0), 10);
        assert_eq!(frame_descriptor::frame_flags(&f.term, 0), UNFRAGMENTED);
        assert_eq!(f.term.as_slice(HEADER_LENGTH, 11), b"hello world");
    }

    #[test]
    fn sequential_appends_advance_the_tail() {
        let f = fixture();
        let appender = TermAppender::new(f.term, f.meta, 0);

        for expected_offset in [64, 128, 192] {
            match appender.append_unfragmented(&[0u8; 32], false) {
                AppendOutcome::Appended {
                    resulting_offset, ..
                } => assert_eq!(resulting_offset, expected_offset),
                other => panic!("unexpected outcome: {:?}", other),
            }
        }
    }

    #[test]
    fn overflow_pads_term_and_trips() {
        let f = fixture();
        let appender = TermAppender::new(f.term, f.meta, 0);

        // Leave 64 bytes of space at the end of the term.
        let near_end = TERM_MIN_LENGTH - 64;
        descriptor::set_raw_tail(&f.meta, 0, descriptor::pack_tail(0, near_end as i32));

        match appender.append_unfragmented(&[1u8; 100], false) {
            AppendOutcome::Tripped { term_id } => assert_eq!(term_id, 0),
            other => panic!("unexpected outcome: {:?}", other),
        }

        // The gap carries a padding frame with negative length.
        let padding_length = frame_descriptor::frame_length_volatile(&f.term, near_end);
        assert_eq!(padding_length, -64);
        assert_eq!(
            frame_descriptor::frame_type(&f.term, near_end),
            frame_descriptor::HDR_TYPE_PAD
        );

        // Tail is parked at the term length.
        let raw_tail = descriptor::raw_tail(&f.meta, 0);
        assert_eq!(
            descriptor::term_offset_from_raw_tail(raw_tail, TERM_MIN_LENGTH),
            TERM_MIN_LENGTH as i32
        );
    }

    #[test]
    fn fragmented_append_flags_begin_and_end() {
        let f = fixture();
        let appender = TermAppender::new(f.term, f.meta, 0);
        let max_payload = 256;
        let msg = vec![9u8; 600]; // 3 fragments: 256 + 256 + 88

        match appender.append_fragmented(&msg, max_payload, false) {
            AppendOutcome::Appended {
                resulting_offset, ..
            } => {
                let expected = 2 * (256 + 32) + frame_aligned_length(88 + 32);
                assert_eq!(resulting_offset, expected);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        assert_eq!(frame_descriptor::frame_flags(&f.term, 0), BEGIN_FRAG_FLAG);
        assert_eq!(frame_descriptor::frame_flags(&f.term, 288), 0);
        assert_eq!(frame_descriptor::frame_flags(&f.term, 576), END_FRAG_FLAG);
        assert_eq!(frame_descriptor::frame_length_volatile(&f.term, 576), 120);
    }

    #[test]
    fn claim_stays_invisible_until_commit() {
        let f = fixture();
        let appender = TermAppender::new(f.term, f.meta, 0);

        match appender.claim(64, true) {
            ClaimOutcome::Claimed {
                resulting_offset,
                mut claim,
                ..
            } => {
                assert_eq!(resulting_offset, 96);
                assert_eq!(frame_descriptor::frame_length_volatile(&f.term, 0), 0);
                claim.body().copy_from_slice(&[7u8; 64]);
                claim.commit();
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        assert_eq!(frame_descriptor::frame_length_volatile(&f.term, 0), 96);
        assert_eq!(f.term.as_slice(HEADER_LENGTH, 64), &[7u8; 64]);
    }

    #[test]
    fn aborted_claim_becomes_padding() {
        let f = fixture();
        let appender = TermAppender::new(f.term, f.meta, 0);

        match appender.claim(64, false) {
            ClaimOutcome::Claimed { claim, .. } => claim.abort(),
            other => panic!("unexpected outcome: {:?}", other),
        }

        assert_eq!(frame_descriptor::frame_length_volatile(&f.term, 0), -96);
        assert_eq!(
            frame_descriptor::frame_type(&f.term, 0),
            frame_descriptor::HDR_TYPE_PAD
        );
    }

    #[test]
    fn exhausted_term_trips_without_padding() {
        let f = fixture();
        let appender = TermAppender::new(f.term, f.meta, 0);
        descriptor::set_raw_tail(
            &f.meta,
            0,
            descriptor::pack_tail(0, TERM_MIN_LENGTH as i32),
        );

        match appender.append_unfragmented(b"x", false) {
            AppendOutcome::Tripped { term_id } => assert_eq!(term_id, 0),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
