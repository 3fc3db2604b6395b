//! Subscriber-side view of one session's log: the Image.

use std::sync::Arc;

use crate::concurrent::atomic_buffer::AtomicBuffer;
use crate::concurrent::counters::Position;
use crate::logbuffer::descriptor;
use crate::logbuffer::header::Header;
use crate::logbuffer::term_reader;
use crate::memory::log_buffers::LogBuffers;

/// Delivered fragment callback: `(body, header)`.
pub type FragmentHandler<'a> = dyn FnMut(&[u8], &Header) + 'a;

/// A subscriber's per-session view of a log buffer.
///
/// The image owns the subscriber position counter: `poll` reads frames
/// from the current position and release-stores the new position after
/// the batch, which is what feeds publisher flow control.
pub struct Image {
    log_buffers: Arc<LogBuffers>,
    term_buffers: [AtomicBuffer; descriptor::PARTITION_COUNT],
    subscriber_position: Position,
    header: Header,
    term_length_mask: i64,
    position_bits_to_shift: u32,
    session_id: i32,
    correlation_id: i64,
    subscription_registration_id: i64,
    is_closed: bool,
}

impl Image {
    pub fn new(
        log_buffers: Arc<LogBuffers>,
        subscriber_position: Position,
        subscription_registration_id: i64,
    ) -> Self {
        let meta = log_buffers.meta_buffer();
        let term_length = log_buffers.term_length();
        let position_bits_to_shift = descriptor::position_bits_to_shift(term_length);
        let header = Header::new(
            descriptor::initial_term_id(&meta),
            position_bits_to_shift,
            log_buffers.term_buffer(0),
        );

        Self {
            term_buffers: log_buffers.term_buffers(),
            subscriber_position,
            header,
            term_length_mask: term_length as i64 - 1,
            position_bits_to_shift,
            session_id: session_id_from_meta(&log_buffers),
            correlation_id: descriptor::correlation_id(&meta),
            subscription_registration_id,
            is_closed: false,
            log_buffers,
        }
    }

    #[inline]
    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    /// Registration id of the publication this image views.
    #[inline]
    pub fn correlation_id(&self) -> i64 {
        self.correlation_id
    }

    #[inline]
    pub fn subscription_registration_id(&self) -> i64 {
        self.subscription_registration_id
    }

    /// Current consume position.
    #[inline]
    pub fn position(&self) -> i64 {
        self.subscriber_position.get()
    }

    /// Counter id of the subscriber position (driver-allocated).
    #[inline]
    pub fn subscriber_position_id(&self) -> i32 {
        self.subscriber_position.id()
    }

    /// Whether the publication has ended and this image has consumed
    /// everything up to the end of the stream.
    pub fn is_end_of_stream(&self) -> bool {
        self.position() >= descriptor::end_of_stream_position(&self.log_buffers.meta_buffer())
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.is_closed
    }

    pub fn close(&mut self) {
        self.is_closed = true;
    }

    /// Poll for up to `fragment_limit` fragments, delivering each to
    /// `handler`. Returns the number of fragments delivered.
    pub fn poll<H>(&mut self, handler: &mut H, fragment_limit: usize) -> usize
    where
        H: FnMut(&[u8], &Header),
    {
        if self.is_closed {
            return 0;
        }

        let position = self.subscriber_position.get();
        let term_offset = (position & self.term_length_mask) as i32;
        let index = descriptor::index_by_position(position, self.position_bits_to_shift);

        let outcome = term_reader::read(
            &self.term_buffers[index],
            term_offset,
            handler,
            fragment_limit,
            &mut self.header,
        );

        let new_position = position + (outcome.offset - term_offset) as i64;
        if new_position > position {
            self.subscriber_position.set_ordered(new_position);
        }

        outcome.fragments_read
    }
}

fn session_id_from_meta(log_buffers: &LogBuffers) -> i32 {
    use crate::logbuffer::frame_descriptor::SESSION_ID_OFFSET;
    let meta_buffer = log_buffers.meta_buffer();
    let header = descriptor::default_frame_header(&meta_buffer);
    i32::from_le_bytes(
        header[SESSION_ID_OFFSET..SESSION_ID_OFFSET + 4]
            .try_into()
            .unwrap_or_default(),
    )
}
