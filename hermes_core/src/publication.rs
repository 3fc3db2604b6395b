//! Client-side producer over a mapped log.
//!
//! `offer` and `try_claim` run entirely against shared memory: the term
//! appender moves the packed tail, the conductor-maintained publisher
//! limit bounds how far the producer may run ahead of the slowest
//! subscriber. Nothing here enters the driver.

use std::sync::Arc;

use thiserror::Error;

use crate::concurrent::counters::Position;
use crate::logbuffer::buffer_claim::BufferClaim;
use crate::logbuffer::descriptor;
use crate::logbuffer::frame_descriptor::HEADER_LENGTH;
use crate::logbuffer::term_appender::{AppendOutcome, ClaimOutcome, TermAppender};
use crate::memory::log_buffers::LogBuffers;

/// Recoverable outcomes of `offer`/`try_claim`. Back pressure is the
/// normal flow-control signal and is never logged.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OfferError {
    /// The publisher limit has been reached; poll subscribers or retry.
    #[error("back pressured")]
    BackPressured,
    /// No subscriber is connected to the stream.
    #[error("not connected")]
    NotConnected,
    /// The term rotated (or another administrative action ran); retry.
    #[error("administrative action")]
    AdminAction,
    /// The stream has reached its maximum possible position.
    #[error("max position exceeded")]
    MaxPositionExceeded,
    /// The publication has been closed.
    #[error("publication closed")]
    Closed,
    /// The message exceeds the maximum message length for the term.
    #[error("message of {length} bytes exceeds max of {max}")]
    MaxMessageLength { length: usize, max: usize },
}

/// Producer handle for one session on one stream.
pub struct Publication {
    log_buffers: Arc<LogBuffers>,
    appenders: [TermAppender; descriptor::PARTITION_COUNT],
    publisher_limit: Position,
    stream_id: i32,
    session_id: i32,
    registration_id: i64,
    initial_term_id: i32,
    position_bits_to_shift: u32,
    term_length: usize,
    max_possible_position: i64,
    max_message_length: usize,
    max_payload_length: usize,
    is_exclusive: bool,
    is_closed: bool,
}

impl Publication {
    /// Wrap a mapped log. `publisher_limit` is the conductor-allocated
    /// limit counter from the publication-ready response.
    pub fn new(
        log_buffers: Arc<LogBuffers>,
        publisher_limit: Position,
        registration_id: i64,
        is_exclusive: bool,
    ) -> Self {
        let meta = log_buffers.meta_buffer();
        let term_length = log_buffers.term_length();
        let mtu = descriptor::mtu_length(&meta);
        let appenders = [
            TermAppender::new(log_buffers.term_buffer(0), meta, 0),
            TermAppender::new(log_buffers.term_buffer(1), meta, 1),
            TermAppender::new(log_buffers.term_buffer(2), meta, 2),
        ];

        Self {
            appenders,
            publisher_limit,
            stream_id: meta_stream_id(&log_buffers),
            session_id: meta_session_id(&log_buffers),
            registration_id,
            initial_term_id: descriptor::initial_term_id(&meta),
            position_bits_to_shift: descriptor::position_bits_to_shift(term_length),
            term_length,
            max_possible_position: (term_length as i64) << 31,
            max_message_length: term_length / 8,
            max_payload_length: mtu - HEADER_LENGTH,
            is_exclusive,
            is_closed: false,
            log_buffers,
        }
    }

    #[inline]
    pub fn stream_id(&self) -> i32 {
        self.stream_id
    }

    #[inline]
    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    #[inline]
    pub fn registration_id(&self) -> i64 {
        self.registration_id
    }

    #[inline]
    pub fn is_exclusive(&self) -> bool {
        self.is_exclusive
    }

    #[inline]
    pub fn max_message_length(&self) -> usize {
        self.max_message_length
    }

    #[inline]
    pub fn max_payload_length(&self) -> usize {
        self.max_payload_length
    }

    /// Current producer position.
    pub fn position(&self) -> i64 {
        let meta = self.log_buffers.meta_buffer();
        let term_count = descriptor::active_term_count(&meta);
        let index = descriptor::index_by_term_count(term_count);
        let raw_tail = descriptor::raw_tail_volatile(&meta, index);
        descriptor::compute_position(
            descriptor::term_id_from_raw_tail(raw_tail),
            descriptor::term_offset_from_raw_tail(raw_tail, self.term_length),
            self.position_bits_to_shift,
            self.initial_term_id,
        )
    }

    /// The furthest position the producer may currently claim.
    pub fn publisher_limit(&self) -> i64 {
        self.publisher_limit.get_volatile()
    }

    /// Whether any subscriber is attached.
    pub fn is_connected(&self) -> bool {
        descriptor::is_connected(&self.log_buffers.meta_buffer())
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.is_closed
    }

    pub fn close(&mut self) {
        self.is_closed = true;
    }

    /// Offer a whole message, fragmenting if it exceeds the MTU payload.
    /// Returns the stream position past the message on success.
    pub fn offer(&self, msg: &[u8]) -> Result<i64, OfferError> {
        if self.is_closed {
            return Err(OfferError::Closed);
        }
        if msg.len() > self.max_message_length {
            return Err(OfferError::MaxMessageLength {
                length: msg.len(),
                max: self.max_message_length,
            });
        }

        let meta = self.log_buffers.meta_buffer();
        let (term_count, index, position) = self.claim_context(&meta)?;

        let outcome = if msg.len() <= self.max_payload_length {
            self.appenders[index].append_unfragmented(msg, self.is_exclusive)
        } else {
            self.appenders[index].append_fragmented(msg, self.max_payload_length, self.is_exclusive)
        };

        self.resolve(&meta, term_count, position, outcome)
    }

    /// Claim a frame for zero-copy writing. On success returns the
    /// position past the claim and the claim itself; the message becomes
    /// visible on `BufferClaim::commit`.
    pub fn try_claim(&self, length: usize) -> Result<(i64, BufferClaim), OfferError> {
        if self.is_closed {
            return Err(OfferError::Closed);
        }
        if length > self.max_payload_length {
            return Err(OfferError::MaxMessageLength {
                length,
                max: self.max_payload_length,
            });
        }

        let meta = self.log_buffers.meta_buffer();
        let (term_count, index, _position) = self.claim_context(&meta)?;

        match self.appenders[index].claim(length, self.is_exclusive) {
            ClaimOutcome::Claimed {
                term_id,
                resulting_offset,
                claim,
            } => {
                let new_position = descriptor::compute_position(
                    term_id,
                    resulting_offset,
                    self.position_bits_to_shift,
                    self.initial_term_id,
                );
                Ok((new_position, claim))
            }
            ClaimOutcome::Tripped { term_id } => {
                descriptor::rotate_log(&meta, term_count, term_id);
                Err(OfferError::AdminAction)
            }
        }
    }

    /// Resolve the active partition and check flow control. Returns
    /// `(term_count, partition_index, current_position)`.
    fn claim_context(
        &self,
        meta: &crate::concurrent::atomic_buffer::AtomicBuffer,
    ) -> Result<(i32, usize, i64), OfferError> {
        let term_count = descriptor::active_term_count(meta);
        let index = descriptor::index_by_term_count(term_count);
        let raw_tail = descriptor::raw_tail_volatile(meta, index);
        let term_id = descriptor::term_id_from_raw_tail(raw_tail);

        // A rotation between the term-count load and the tail load shows
        // up as a mismatched term id; treat as an admin action and retry.
        if term_id.wrapping_sub(self.initial_term_id) != term_count {
            return Err(OfferError::AdminAction);
        }

        let term_offset = descriptor::term_offset_from_raw_tail(raw_tail, self.term_length);
        let position = descriptor::compute_position(
            term_id,
            term_offset,
            self.position_bits_to_shift,
            self.initial_term_id,
        );

        let limit = self.publisher_limit.get_volatile();
        if position >= limit {
            return Err(self.back_pressure_status(position));
        }

        Ok((term_count, index, position))
    }

    fn resolve(
        &self,
        meta: &crate::concurrent::atomic_buffer::AtomicBuffer,
        term_count: i32,
        _position: i64,
        outcome: AppendOutcome,
    ) -> Result<i64, OfferError> {
        match outcome {
            AppendOutcome::Appended {
                term_id,
                resulting_offset,
            } => Ok(descriptor::compute_position(
                term_id,
                resulting_offset,
                self.position_bits_to_shift,
                self.initial_term_id,
            )),
            AppendOutcome::Tripped { term_id } => {
                descriptor::rotate_log(meta, term_count, term_id);
                Err(OfferError::AdminAction)
            }
        }
    }

    fn back_pressure_status(&self, position: i64) -> OfferError {
        if position >= self.max_possible_position {
            return OfferError::MaxPositionExceeded;
        }
        if !self.is_connected() {
            return OfferError::NotConnected;
        }
        OfferError::BackPressured
    }
}

fn meta_stream_id(log_buffers: &LogBuffers) -> i32 {
    let meta_buffer = log_buffers.meta_buffer();
    let header = descriptor::default_frame_header(&meta_buffer);
    i32::from_le_bytes(header[16..20].try_into().unwrap_or_default())
}

fn meta_session_id(log_buffers: &LogBuffers) -> i32 {
    let meta_buffer = log_buffers.meta_buffer();
    let header = descriptor::default_frame_header(&meta_buffer);
    i32::from_le_bytes(header[12..16].try_into().unwrap_or_default())
}
