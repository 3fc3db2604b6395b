//! Driver-side record of one IPC publication.
//!
//! The conductor owns these. Every duty cycle it calls
//! `update_publisher_limit` on ACTIVE publications; every timer sweep it
//! calls `on_time_event`, which drives the lifecycle state machine
//! (ACTIVE -> INACTIVE on the last decref, INACTIVE -> LINGER once
//! drained, LINGER -> end of life after the linger timeout), the
//! untethered-subscriber protocol and blocked-producer detection.

use std::sync::Arc;

use hermes_core::concurrent::counters::Position;
use hermes_core::logbuffer::descriptor;
use hermes_core::logbuffer::frame_descriptor;
use hermes_core::logbuffer::term_unblocker;
use hermes_core::memory::LogBuffers;

use crate::proxy::ClientProxy;
use crate::subscription::SubscriptionLink;

/// Publication lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicationState {
    Active,
    Inactive,
    Linger,
}

/// Tether state of one attached subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TetherState {
    Active,
    Linger,
    Resting,
}

/// One subscriber position attached to this publication.
#[derive(Debug)]
pub struct SubscriberPosition {
    subscription_registration_id: i64,
    position: Position,
    state: TetherState,
    is_tether: bool,
    time_of_last_update_ns: i64,
}

impl SubscriberPosition {
    #[inline]
    pub fn counter_id(&self) -> i32 {
        self.position.id()
    }

    #[inline]
    pub fn subscription_registration_id(&self) -> i64 {
        self.subscription_registration_id
    }

    #[inline]
    pub fn tether_state(&self) -> TetherState {
        self.state
    }
}

/// Timeouts and sizes resolved from the driver config at creation.
#[derive(Debug, Clone, Copy)]
pub struct PublicationParams {
    pub term_window_length: i64,
    pub unblock_timeout_ns: i64,
    pub untethered_window_limit_timeout_ns: i64,
    pub untethered_resting_timeout_ns: i64,
    pub linger_timeout_ns: i64,
}

/// Conductor services a time-event sweep may call back into.
pub struct TimeEventContext<'a> {
    pub client_proxy: &'a mut ClientProxy,
    pub subscription_links: &'a [SubscriptionLink],
    pub unblocked_publications: &'a Position,
}

/// Driver-owned state for one IPC publication.
pub struct IpcPublication {
    registration_id: i64,
    session_id: i32,
    stream_id: i32,
    channel: String,
    log_buffers: Arc<LogBuffers>,
    pub_pos: Position,
    pub_lmt: Position,
    initial_term_id: i32,
    position_bits_to_shift: u32,
    term_length: usize,
    term_window_length: i64,
    trip_gain: i64,
    trip_limit: i64,
    unblock_timeout_ns: i64,
    untethered_window_limit_timeout_ns: i64,
    untethered_resting_timeout_ns: i64,
    linger_timeout_ns: i64,
    consumer_position: i64,
    last_consumer_position: i64,
    time_of_last_consumer_position_change_ns: i64,
    clean_position: i64,
    state: PublicationState,
    time_of_last_state_change_ns: i64,
    refcnt: i32,
    is_exclusive: bool,
    has_reached_end_of_life: bool,
    subscribers: Vec<SubscriberPosition>,
}

impl IpcPublication {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registration_id: i64,
        session_id: i32,
        stream_id: i32,
        channel: String,
        log_buffers: Arc<LogBuffers>,
        pub_pos: Position,
        pub_lmt: Position,
        params: PublicationParams,
        is_exclusive: bool,
        now_ns: i64,
    ) -> Self {
        let term_length = log_buffers.term_length();
        let meta = log_buffers.meta_buffer();
        let initial_term_id = descriptor::initial_term_id(&meta);

        let mut publication = Self {
            registration_id,
            session_id,
            stream_id,
            channel,
            pub_pos,
            pub_lmt,
            initial_term_id,
            position_bits_to_shift: descriptor::position_bits_to_shift(term_length),
            term_length,
            term_window_length: params.term_window_length,
            trip_gain: params.term_window_length / 8,
            trip_limit: 0,
            unblock_timeout_ns: params.unblock_timeout_ns,
            untethered_window_limit_timeout_ns: params.untethered_window_limit_timeout_ns,
            untethered_resting_timeout_ns: params.untethered_resting_timeout_ns,
            linger_timeout_ns: params.linger_timeout_ns,
            consumer_position: 0,
            last_consumer_position: 0,
            time_of_last_consumer_position_change_ns: now_ns,
            clean_position: 0,
            state: PublicationState::Active,
            time_of_last_state_change_ns: now_ns,
            refcnt: 0,
            is_exclusive,
            has_reached_end_of_life: false,
            subscribers: Vec::new(),
            log_buffers,
        };

        let producer_position = publication.producer_position();
        publication.consumer_position = producer_position;
        publication.last_consumer_position = producer_position;
        publication.clean_position = producer_position;
        publication
    }

    #[inline]
    pub fn registration_id(&self) -> i64 {
        self.registration_id
    }

    #[inline]
    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    #[inline]
    pub fn stream_id(&self) -> i32 {
        self.stream_id
    }

    #[inline]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    #[inline]
    pub fn state(&self) -> PublicationState {
        self.state
    }

    #[inline]
    pub fn is_exclusive(&self) -> bool {
        self.is_exclusive
    }

    #[inline]
    pub fn log_file_name(&self) -> String {
        self.log_buffers.file_name()
    }

    #[inline]
    pub fn log_buffers(&self) -> &Arc<LogBuffers> {
        &self.log_buffers
    }

    #[inline]
    pub fn publisher_limit_counter_id(&self) -> i32 {
        self.pub_lmt.id()
    }

    #[inline]
    pub fn has_reached_end_of_life(&self) -> bool {
        self.has_reached_end_of_life
    }

    #[inline]
    pub fn subscribers(&self) -> &[SubscriberPosition] {
        &self.subscribers
    }

    /// Only shared ACTIVE publications accept further clients/subscribers.
    pub fn is_accepting_links(&self) -> bool {
        self.state == PublicationState::Active
    }

    /// Position the producer has claimed up to, from the active tail.
    pub fn producer_position(&self) -> i64 {
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

    /// Position a new subscriber joins at.
    pub fn joining_position(&self) -> i64 {
        self.consumer_position
    }

    pub fn incref(&mut self) {
        self.refcnt += 1;
    }

    /// Drop one publisher reference. The transition to zero publishes the
    /// end-of-stream position and caps the publisher limit so producers
    /// stop exactly where the stream ends.
    pub fn decref(&mut self, now_ns: i64) {
        debug_assert!(self.refcnt > 0, "publication refcnt underflow");
        self.refcnt -= 1;

        if self.refcnt == 0 {
            let producer_position = self.producer_position();
            self.state = PublicationState::Inactive;
            self.time_of_last_state_change_ns = now_ns;

            if self.pub_lmt.get() > producer_position {
                self.pub_lmt.set_ordered(producer_position);
            }
            descriptor::set_end_of_stream_position(
                &self.log_buffers.meta_buffer(),
                producer_position,
            );
        }
    }

    /// Attach a subscriber position counter.
    pub fn add_subscriber(
        &mut self,
        subscription_registration_id: i64,
        position: Position,
        is_tether: bool,
        now_ns: i64,
    ) {
        position.set_ordered(self.joining_position());
        self.subscribers.push(SubscriberPosition {
            subscription_registration_id,
            position,
            state: TetherState::Active,
            is_tether,
            time_of_last_update_ns: now_ns,
        });
        descriptor::set_is_connected(&self.log_buffers.meta_buffer(), true);
    }

    /// Detach a subscriber by counter id, returning its position handle
    /// so the conductor can free the counter.
    pub fn remove_subscriber(&mut self, counter_id: i32) -> Option<Position> {
        let index = self
            .subscribers
            .iter()
            .position(|s| s.position.id() == counter_id)?;
        let removed = self.subscribers.swap_remove(index);
        if self.subscribers.is_empty() {
            descriptor::set_is_connected(&self.log_buffers.meta_buffer(), false);
        }
        Some(removed.position)
    }

    /// Conductor duty-cycle call: recompute the publisher limit from the
    /// slowest non-resting subscriber and clean the buffer behind it.
    /// Returns the work count.
    pub fn update_publisher_limit(&mut self) -> usize {
        if self.subscribers.is_empty() {
            // No consumers: park the limit so the producer cannot run
            // ahead into buffer that will never be cleaned.
            self.pub_lmt.set_ordered(self.consumer_position);
            self.trip_limit = self.consumer_position;
            return 0;
        }

        let mut min_sub_pos = i64::MAX;
        let mut max_sub_pos = self.consumer_position;
        for subscriber in &self.subscribers {
            if subscriber.state != TetherState::Resting {
                let position = subscriber.position.get_volatile();
                min_sub_pos = min_sub_pos.min(position);
                max_sub_pos = max_sub_pos.max(position);
            }
        }

        if min_sub_pos == i64::MAX {
            // Everyone is resting; hold the line.
            return 0;
        }

        let mut work_count = 0;
        let proposed_limit = min_sub_pos + self.term_window_length;
        if proposed_limit > self.trip_limit {
            self.clean_buffer(min_sub_pos);
            self.pub_lmt.set_ordered(proposed_limit);
            self.trip_limit = proposed_limit + self.trip_gain;
            work_count = 1;
        }

        self.consumer_position = max_sub_pos;
        work_count
    }

    /// Timer sweep: sample the producer position and run the state
    /// machine.
    pub fn on_time_event(&mut self, now_ns: i64, _now_ms: i64, ctx: &mut TimeEventContext<'_>) {
        let producer_position = self.producer_position();
        self.pub_pos.set_ordered(producer_position);

        match self.state {
            PublicationState::Active => {
                self.check_untethered_subscriptions(now_ns, ctx);
                if !self.is_exclusive {
                    self.check_for_blocked_publisher(producer_position, now_ns, ctx);
                }
            }
            PublicationState::Inactive => {
                if self.is_drained(producer_position) {
                    self.state = PublicationState::Linger;
                    self.time_of_last_state_change_ns = now_ns;

                    for link in ctx.subscription_links {
                        if link.is_linked(self.registration_id) {
                            ctx.client_proxy.on_unavailable_image(
                                self.registration_id,
                                link.registration_id(),
                                self.stream_id,
                            );
                        }
                    }
                } else if term_unblocker::unblock_log(
                    &self.log_buffers.term_buffers(),
                    &self.log_buffers.meta_buffer(),
                    self.consumer_position,
                ) {
                    ctx.unblocked_publications.increment_ordered();
                }
            }
            PublicationState::Linger => {
                if now_ns > self.time_of_last_state_change_ns + self.linger_timeout_ns {
                    self.has_reached_end_of_life = true;
                }
            }
        }
    }

    /// All subscribers have consumed up to the producer position.
    pub fn is_drained(&self, producer_position: i64) -> bool {
        self.subscribers
            .iter()
            .all(|s| s.position.get_volatile() >= producer_position)
    }

    /// Release the resources the conductor cannot free for us; may be
    /// retried on a later sweep if it fails.
    pub fn free(&mut self) -> bool {
        true
    }

    /// Counter ids to release on close: positions plus both publisher
    /// counters.
    pub fn counters_to_free(&self) -> Vec<i32> {
        let mut ids = vec![self.pub_pos.id(), self.pub_lmt.id()];
        ids.extend(self.subscribers.iter().map(|s| s.position.id()));
        ids
    }

    /// The untethered subscriber protocol: tethered subscribers are
    /// always refreshed; untethered ones that linger behind the window
    /// limit go LINGER (unavailable image), then RESTING (excluded from
    /// flow control), then are re-admitted at the current consumer
    /// position.
    fn check_untethered_subscriptions(&mut self, now_ns: i64, ctx: &mut TimeEventContext<'_>) {
        let untethered_window_limit = (self.consumer_position - self.term_window_length)
            + (self.term_window_length / 8);
        let window_limit_timeout_ns = self.untethered_window_limit_timeout_ns;
        let resting_timeout_ns = self.untethered_resting_timeout_ns;

        let registration_id = self.registration_id;
        let stream_id = self.stream_id;
        let session_id = self.session_id;
        let consumer_position = self.consumer_position;
        let log_file = self.log_buffers.file_name();

        for subscriber in &mut self.subscribers {
            if subscriber.is_tether {
                subscriber.time_of_last_update_ns = now_ns;
                continue;
            }

            match subscriber.state {
                TetherState::Active => {
                    if subscriber.position.get_volatile() > untethered_window_limit {
                        subscriber.time_of_last_update_ns = now_ns;
                    } else if now_ns
                        > subscriber.time_of_last_update_ns + window_limit_timeout_ns
                    {
                        ctx.client_proxy.on_unavailable_image(
                            registration_id,
                            subscriber.subscription_registration_id,
                            stream_id,
                        );
                        subscriber.state = TetherState::Linger;
                        subscriber.time_of_last_update_ns = now_ns;
                    }
                }
                TetherState::Linger => {
                    if now_ns > subscriber.time_of_last_update_ns + window_limit_timeout_ns {
                        subscriber.state = TetherState::Resting;
                        subscriber.time_of_last_update_ns = now_ns;
                    }
                }
                TetherState::Resting => {
                    if now_ns > subscriber.time_of_last_update_ns + resting_timeout_ns {
                        subscriber.position.set_ordered(consumer_position);
                        ctx.client_proxy.on_available_image(
                            registration_id,
                            subscriber.subscription_registration_id,
                            session_id,
                            stream_id,
                            subscriber.position.id(),
                            &log_file,
                        );
                        subscriber.state = TetherState::Active;
                        subscriber.time_of_last_update_ns = now_ns;
                    }
                }
            }
        }
    }

    /// Shared publications can wedge every consumer on a claim a dead
    /// client never committed; watch the consumer position and unblock
    /// past the dead claim after the timeout.
    fn check_for_blocked_publisher(
        &mut self,
        producer_position: i64,
        now_ns: i64,
        ctx: &mut TimeEventContext<'_>,
    ) {
        if self.consumer_position == self.last_consumer_position
            && self.is_possibly_blocked(producer_position, self.consumer_position)
        {
            if now_ns > self.time_of_last_consumer_position_change_ns + self.unblock_timeout_ns {
                if term_unblocker::unblock_log(
                    &self.log_buffers.term_buffers(),
                    &self.log_buffers.meta_buffer(),
                    self.consumer_position,
                ) {
                    ctx.unblocked_publications.increment_ordered();
                }
            }
        } else {
            self.time_of_last_consumer_position_change_ns = now_ns;
            self.last_consumer_position = self.consumer_position;
        }
    }

    /// A gap between consumer and producer with an uncommitted frame (or
    /// a missed rotation) at the consumer position.
    fn is_possibly_blocked(&self, producer_position: i64, consumer_position: i64) -> bool {
        if producer_position <= consumer_position {
            return false;
        }

        let meta = self.log_buffers.meta_buffer();
        let expected_term_count = (consumer_position >> self.position_bits_to_shift) as i32;
        if descriptor::active_term_count(&meta) != expected_term_count {
            return true;
        }

        let index =
            descriptor::index_by_position(consumer_position, self.position_bits_to_shift);
        let term_offset = descriptor::compute_term_offset_from_position(
            consumer_position,
            self.position_bits_to_shift,
        );
        frame_descriptor::frame_length_volatile(
            &self.log_buffers.term_buffer(index),
            term_offset as usize,
        ) == 0
    }

    /// Incrementally zero consumed buffer behind the slowest subscriber
    /// so the producer can wrap into clean memory. The first word of the
    /// chunk is zeroed last, ordered, so a racing reader never observes a
    /// stale frame length with fresh zeroes behind it.
    fn clean_buffer(&mut self, position: i64) {
        let clean_position = self.clean_position;
        if position <= clean_position {
            return;
        }

        let dirty_index =
            descriptor::index_by_position(clean_position, self.position_bits_to_shift);
        let term_offset = (clean_position & (self.term_length as i64 - 1)) as usize;
        let bytes_left_in_term = self.term_length - term_offset;
        let length = ((position - clean_position) as usize).min(bytes_left_in_term);

        let term = self.log_buffers.term_buffer(dirty_index);
        if length > 8 {
            term.set_memory(term_offset + 8, length - 8, 0);
        }
        if length >= 8 {
            term.put_i64_ordered(term_offset, 0);
            self.clean_position = clean_position + length as i64;
        }
    }
}
