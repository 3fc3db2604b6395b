//! The driver conductor: single-threaded owner of every publication,
//! subscription link and client.
//!
//! All control-plane state lives on this one thread, so none of it is
//! locked. Clients reach the conductor only through the to-driver
//! command ring; the conductor reaches clients only through the
//! broadcast, atomic counters and the mapped logs.
//!
//! Duty cycle (one `do_work`):
//!
//! 1. refresh cached clocks if a millisecond has passed
//! 2. on the timer interval: heartbeat, sweep managed resources, check
//!    for blocked commands
//! 3. drain the command ring (bounded)
//! 4. update the publisher limit of every ACTIVE publication

use std::collections::HashSet;
use std::sync::Arc;

use hermes_core::agent::Agent;
use hermes_core::command::{
    self, decode, CorrelatedMessage, CounterMessage, ErrorCode, PublicationMessage, RemoveMessage,
    SubscriptionMessage,
};
use hermes_core::concurrent::broadcast::BroadcastTransmitter;
use hermes_core::concurrent::counters::CountersManager;
use hermes_core::concurrent::errors::DistinctErrorLog;
use hermes_core::concurrent::ring_buffer::RingBuffer;
use hermes_core::error::{HermesError, HermesResult};
use hermes_core::logbuffer::descriptor;
use hermes_core::memory::{publication_log_path, CncFile, LogBuffers};

use crate::client::ClientSession;
use crate::context::DriverContext;
use crate::ipc_publication::{IpcPublication, PublicationParams, PublicationState, TimeEventContext};
use crate::proxy::ClientProxy;
use crate::subscription::{PublicationLink, SubscriptionLink, SubscriptionParams};
use crate::system_counters::{SystemCounterDescriptor, SystemCounters};

/// Counter type ids in the counters file.
pub const PUBLISHER_POSITION_TYPE_ID: i32 = 1;
pub const PUBLISHER_LIMIT_TYPE_ID: i32 = 2;
pub const SUBSCRIBER_POSITION_TYPE_ID: i32 = 3;

const CLOCK_UPDATE_INTERVAL_NS: i64 = 1_000_000;

/// A client-registered counter.
struct CounterLink {
    registration_id: i64,
    counter_id: i32,
    client_id: i64,
}

/// The conductor agent.
pub struct DriverConductor {
    ctx: DriverContext,
    _cnc: Arc<CncFile>,
    to_driver_ring: RingBuffer,
    client_proxy: ClientProxy,
    counters_manager: CountersManager,
    system_counters: SystemCounters,
    error_log: DistinctErrorLog,

    ipc_publications: Vec<IpcPublication>,
    publication_links: Vec<PublicationLink>,
    subscription_links: Vec<SubscriptionLink>,
    counter_links: Vec<CounterLink>,
    clients: Vec<ClientSession>,
    active_sessions: HashSet<(i32, i32)>,
    next_session_id: i32,

    time_of_last_timer_check_ns: i64,
    clock_update_deadline_ns: i64,
    time_of_last_to_driver_position_change_ns: i64,
    last_consumer_command_position: i64,
    terminate_requested: bool,
}

impl DriverConductor {
    pub fn new(ctx: DriverContext, cnc: Arc<CncFile>) -> HermesResult<Self> {
        let to_driver_ring = RingBuffer::new(cnc.to_driver_buffer())?;
        let transmitter = BroadcastTransmitter::new(cnc.to_clients_buffer())?;
        let mut counters_manager =
            CountersManager::new(cnc.counters_metadata_buffer(), cnc.counters_values_buffer());
        let system_counters = SystemCounters::new(&mut counters_manager)?;
        let error_log = DistinctErrorLog::new(cnc.error_log_buffer());

        let now_ns = (ctx.nano_clock)();
        ctx.cached_nano_clock.update(now_ns);
        ctx.cached_epoch_clock.update((ctx.epoch_clock)());
        to_driver_ring.set_consumer_heartbeat_time(ctx.cached_epoch_clock.time());

        let last_consumer_command_position = to_driver_ring.consumer_position();

        Ok(Self {
            next_session_id: initial_session_id(&ctx),
            client_proxy: ClientProxy::new(transmitter),
            to_driver_ring,
            counters_manager,
            system_counters,
            error_log,
            ipc_publications: Vec::new(),
            publication_links: Vec::new(),
            subscription_links: Vec::new(),
            counter_links: Vec::new(),
            clients: Vec::new(),
            active_sessions: HashSet::new(),
            time_of_last_timer_check_ns: now_ns,
            clock_update_deadline_ns: now_ns,
            time_of_last_to_driver_position_change_ns: now_ns,
            last_consumer_command_position,
            terminate_requested: false,
            _cnc: cnc,
            ctx,
        })
    }

    // === accessors used by launchers and tests ===

    pub fn system_counters(&self) -> &SystemCounters {
        &self.system_counters
    }

    pub fn publication_count(&self) -> usize {
        self.ipc_publications.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscription_links.len()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn find_publication(&self, registration_id: i64) -> Option<&IpcPublication> {
        self.ipc_publications
            .iter()
            .find(|p| p.registration_id() == registration_id)
    }

    // === duty cycle ===

    fn update_clocks(&mut self, now_ns: i64) {
        if now_ns >= self.clock_update_deadline_ns {
            self.clock_update_deadline_ns = now_ns + CLOCK_UPDATE_INTERVAL_NS;
            self.ctx.cached_nano_clock.update(now_ns);
            self.ctx.cached_epoch_clock.update((self.ctx.epoch_clock)());
        }
    }

    fn process_timers(&mut self, now_ns: i64) -> usize {
        if now_ns - self.time_of_last_timer_check_ns >= self.ctx.config.timer_interval_ns {
            self.heartbeat_and_check_timers(now_ns);
            self.check_for_blocked_commands(now_ns);
            self.time_of_last_timer_check_ns = now_ns;
            return 1;
        }
        0
    }

    fn heartbeat_and_check_timers(&mut self, now_ns: i64) {
        let now_ms = self.ctx.cached_epoch_clock.time();
        self.to_driver_ring.set_consumer_heartbeat_time(now_ms);

        self.check_clients(now_ns, now_ms);
        self.check_ipc_publications(now_ns, now_ms);
    }

    fn check_clients(&mut self, now_ns: i64, now_ms: i64) {
        for i in (0..self.clients.len()).rev() {
            self.clients[i].on_time_event(now_ms);
            if self.clients[i].has_reached_end_of_life() {
                let client = self.clients.swap_remove(i);
                self.on_client_removed(client, now_ns);
            }
        }
    }

    fn on_client_removed(&mut self, client: ClientSession, now_ns: i64) {
        let client_id = client.client_id();
        if client.timed_out() {
            log::warn!("client {} missed its liveness window", client_id);
            self.system_counters
                .get(SystemCounterDescriptor::ClientTimeouts)
                .increment_ordered();
            self.client_proxy.on_client_timeout(client_id);
        }

        let mut i = 0;
        while i < self.publication_links.len() {
            if self.publication_links[i].client_id == client_id {
                let link = self.publication_links.swap_remove(i);
                self.decref_publication(link.publication_registration_id, now_ns);
            } else {
                i += 1;
            }
        }

        let mut i = 0;
        while i < self.subscription_links.len() {
            if self.subscription_links[i].client_id() == client_id {
                let link = self.subscription_links.swap_remove(i);
                self.unlink_subscription(link);
            } else {
                i += 1;
            }
        }

        let mut i = 0;
        while i < self.counter_links.len() {
            if self.counter_links[i].client_id == client_id {
                let link = self.counter_links.swap_remove(i);
                self.client_proxy
                    .on_unavailable_counter(link.registration_id, link.counter_id);
                self.counters_manager.free(link.counter_id);
            } else {
                i += 1;
            }
        }
    }

    fn check_ipc_publications(&mut self, now_ns: i64, now_ms: i64) {
        for i in (0..self.ipc_publications.len()).rev() {
            {
                let Self {
                    ipc_publications,
                    subscription_links,
                    client_proxy,
                    system_counters,
                    ..
                } = self;
                let mut ctx = TimeEventContext {
                    client_proxy,
                    subscription_links: subscription_links.as_slice(),
                    unblocked_publications: system_counters
                        .get(SystemCounterDescriptor::UnblockedPublications),
                };
                ipc_publications[i].on_time_event(now_ns, now_ms, &mut ctx);
            }

            if self.ipc_publications[i].has_reached_end_of_life() {
                if self.ipc_publications[i].free() {
                    let publication = self.ipc_publications.swap_remove(i);
                    self.close_publication(publication);
                } else {
                    self.system_counters
                        .get(SystemCounterDescriptor::FreeFails)
                        .increment_ordered();
                }
            }
        }
    }

    fn close_publication(&mut self, publication: IpcPublication) {
        log::info!(
            "closing publication: registration={} session={} stream={}",
            publication.registration_id(),
            publication.session_id(),
            publication.stream_id()
        );
        self.active_sessions
            .remove(&(publication.session_id(), publication.stream_id()));

        for link in &mut self.subscription_links {
            link.unlink(publication.registration_id());
        }
        for counter_id in publication.counters_to_free() {
            self.counters_manager.free(counter_id);
        }
        // Dropping the publication releases its log mapping; the file is
        // unlinked once every client mapping is gone too.
    }

    fn check_for_blocked_commands(&mut self, now_ns: i64) {
        let consumer_position = self.to_driver_ring.consumer_position();

        if consumer_position == self.last_consumer_command_position {
            if self.to_driver_ring.producer_position() > consumer_position
                && now_ns - self.time_of_last_to_driver_position_change_ns
                    >= self.ctx.config.client_liveness_timeout_ns
            {
                if self.to_driver_ring.unblock() {
                    log::warn!("unblocked a stuck command at position {}", consumer_position);
                    self.system_counters
                        .get(SystemCounterDescriptor::UnblockedCommands)
                        .increment_ordered();
                }
            }
        } else {
            self.time_of_last_to_driver_position_change_ns = now_ns;
            self.last_consumer_command_position = consumer_position;
        }
    }

    fn drain_commands(&mut self) -> usize {
        let ring = self.to_driver_ring;
        let limit = self.ctx.config.command_drain_limit;
        ring.read(
            |msg_type, buffer, offset, length| {
                let payload = buffer.as_slice(offset, length);
                if let Err(error) = self.on_command(msg_type, payload) {
                    if let HermesError::Terminated = error {
                        self.terminate_requested = true;
                        return;
                    }
                    self.record_error(msg_type, payload, error);
                }
            },
            limit,
        )
    }

    fn record_error(&mut self, msg_type: i32, payload: &[u8], error: HermesError) {
        let correlation_id = decode::<CorrelatedMessage>(payload)
            .map(|m| m.correlation_id)
            .unwrap_or(-1);
        let message = error.to_string();

        log::warn!("command {} rejected: {}", msg_type, message);
        self.system_counters
            .get(SystemCounterDescriptor::Errors)
            .increment_ordered();
        self.error_log
            .record(&message, self.ctx.cached_epoch_clock.time());
        self.client_proxy
            .on_error(correlation_id, error.error_code(), &message);
    }

    fn on_command(&mut self, msg_type: i32, payload: &[u8]) -> HermesResult<()> {
        match msg_type {
            command::msg_type::ADD_PUBLICATION => {
                let msg: PublicationMessage = decode(payload)?;
                self.on_add_publication(msg)
            }
            command::msg_type::REMOVE_PUBLICATION => {
                let msg: RemoveMessage = decode(payload)?;
                self.on_remove_publication(msg)
            }
            command::msg_type::ADD_SUBSCRIPTION => {
                let msg: SubscriptionMessage = decode(payload)?;
                self.on_add_subscription(msg)
            }
            command::msg_type::REMOVE_SUBSCRIPTION => {
                let msg: RemoveMessage = decode(payload)?;
                self.on_remove_subscription(msg)
            }
            command::msg_type::CLIENT_KEEPALIVE => {
                let msg: CorrelatedMessage = decode(payload)?;
                self.on_client_keepalive(msg.client_id);
                Ok(())
            }
            command::msg_type::CLIENT_CLOSE => {
                let msg: CorrelatedMessage = decode(payload)?;
                self.on_client_close(msg.client_id);
                Ok(())
            }
            command::msg_type::ADD_COUNTER => {
                let msg: CounterMessage = decode(payload)?;
                self.on_add_counter(msg)
            }
            command::msg_type::REMOVE_COUNTER => {
                let msg: RemoveMessage = decode(payload)?;
                self.on_remove_counter(msg)
            }
            command::msg_type::TERMINATE_DRIVER => Err(HermesError::Terminated),
            _ => Err(HermesError::protocol(
                ErrorCode::MalformedCommand,
                format!("unknown command type: {}", msg_type),
            )),
        }
    }

    // === command handlers ===

    fn on_add_publication(&mut self, msg: PublicationMessage) -> HermesResult<()> {
        let channel = msg.channel.as_str().to_string();
        if channel != command::IPC_CHANNEL {
            return Err(HermesError::protocol(
                ErrorCode::InvalidChannel,
                format!("only '{}' is supported: {}", command::IPC_CHANNEL, channel),
            ));
        }

        let correlation_id = msg.correlated.correlation_id;
        let is_exclusive = msg.is_exclusive != 0;
        let now_ns = self.ctx.cached_nano_clock.nano_time();
        self.get_or_add_client(msg.correlated.client_id);

        let existing = if is_exclusive {
            None
        } else {
            self.ipc_publications.iter().position(|p| {
                p.stream_id() == msg.stream_id && !p.is_exclusive() && p.is_accepting_links()
            })
        };

        let pub_index = match existing {
            Some(index) => index,
            None => self.new_ipc_publication(&msg, now_ns)?,
        };

        self.ipc_publications[pub_index].incref();
        self.publication_links.push(PublicationLink {
            registration_id: correlation_id,
            publication_registration_id: self.ipc_publications[pub_index].registration_id(),
            client_id: msg.correlated.client_id,
        });

        let linked = self.link_matching_subscriptions(pub_index, now_ns);

        let publication = &self.ipc_publications[pub_index];
        self.client_proxy.on_publication_ready(
            correlation_id,
            publication.registration_id(),
            publication.session_id(),
            publication.stream_id(),
            publication.publisher_limit_counter_id(),
            &publication.log_file_name(),
            is_exclusive,
        );

        let registration_id = publication.registration_id();
        let session_id = publication.session_id();
        let stream_id = publication.stream_id();
        let log_file = publication.log_file_name();
        for (subscription_registration_id, counter_id) in linked {
            self.client_proxy.on_available_image(
                registration_id,
                subscription_registration_id,
                session_id,
                stream_id,
                counter_id,
                &log_file,
            );
        }

        Ok(())
    }

    fn new_ipc_publication(
        &mut self,
        msg: &PublicationMessage,
        now_ns: i64,
    ) -> HermesResult<usize> {
        let stream_id = msg.stream_id;
        let session_id = if msg.has_explicit_session_id != 0 {
            if self.active_sessions.contains(&(msg.session_id, stream_id)) {
                return Err(HermesError::protocol(
                    ErrorCode::SessionIdClash,
                    format!("existing publication has clashing session id: {}", msg.session_id),
                ));
            }
            msg.session_id
        } else {
            self.next_available_session_id(stream_id)
        };

        let registration_id = msg.correlated.correlation_id;
        let config = self.ctx.config.clone();
        let path = publication_log_path(&self.ctx.hermes_dir, registration_id);

        let log_buffers = LogBuffers::create(&path, config.term_length, config.file_page_size)?;

        let pub_pos_id = self.counters_manager.allocate(
            &format!("pub-pos: {} {} {}", registration_id, session_id, stream_id),
            PUBLISHER_POSITION_TYPE_ID,
        )?;
        let pub_lmt_id = match self.counters_manager.allocate(
            &format!("pub-lmt: {} {} {}", registration_id, session_id, stream_id),
            PUBLISHER_LIMIT_TYPE_ID,
        ) {
            Ok(id) => id,
            Err(e) => {
                self.counters_manager.free(pub_pos_id);
                return Err(e);
            }
        };
        self.counters_manager
            .set_registration_id(pub_pos_id, registration_id);
        self.counters_manager
            .set_registration_id(pub_lmt_id, registration_id);

        let initial_term_id = initial_term_id_for(registration_id);
        descriptor::initialize_log_metadata(
            &log_buffers.meta_buffer(),
            initial_term_id,
            config.term_length,
            config.file_page_size,
            config.mtu_length,
            registration_id,
            session_id,
            stream_id,
        );

        let params = PublicationParams {
            term_window_length: config.producer_window_length(config.term_length),
            unblock_timeout_ns: config.publication_unblock_timeout_ns,
            untethered_window_limit_timeout_ns: config.untethered_window_limit_timeout_ns,
            untethered_resting_timeout_ns: config.untethered_resting_timeout_ns,
            linger_timeout_ns: config.publication_linger_timeout_ns,
        };

        log::info!(
            "new ipc publication: registration={} session={} stream={} exclusive={}",
            registration_id,
            session_id,
            stream_id,
            msg.is_exclusive != 0
        );

        let publication = IpcPublication::new(
            registration_id,
            session_id,
            stream_id,
            msg.channel.as_str().to_string(),
            log_buffers,
            self.counters_manager.position(pub_pos_id),
            self.counters_manager.position(pub_lmt_id),
            params,
            msg.is_exclusive != 0,
            now_ns,
        );

        self.ipc_publications.push(publication);
        self.active_sessions.insert((session_id, stream_id));
        Ok(self.ipc_publications.len() - 1)
    }

    /// Wire every matching subscription to the publication at
    /// `pub_index`; returns `(subscription registration id, counter id)`
    /// per new link.
    fn link_matching_subscriptions(
        &mut self,
        pub_index: usize,
        now_ns: i64,
    ) -> Vec<(i64, i32)> {
        let Self {
            ipc_publications,
            subscription_links,
            counters_manager,
            ..
        } = self;
        let publication = &mut ipc_publications[pub_index];
        let mut linked = Vec::new();

        for link in subscription_links.iter_mut() {
            if link.matches(publication.stream_id(), publication.channel())
                && !link.is_linked(publication.registration_id())
            {
                let label = format!(
                    "sub-pos: {} {} {}",
                    link.registration_id(),
                    publication.session_id(),
                    publication.stream_id()
                );
                match counters_manager.allocate(&label, SUBSCRIBER_POSITION_TYPE_ID) {
                    Ok(counter_id) => {
                        counters_manager.set_registration_id(counter_id, link.registration_id());
                        publication.add_subscriber(
                            link.registration_id(),
                            counters_manager.position(counter_id),
                            link.is_tether(),
                            now_ns,
                        );
                        link.link(publication.registration_id(), counter_id);
                        linked.push((link.registration_id(), counter_id));
                    }
                    Err(e) => {
                        log::error!("could not allocate subscriber position: {}", e);
                    }
                }
            }
        }

        linked
    }

    fn on_remove_publication(&mut self, msg: RemoveMessage) -> HermesResult<()> {
        let index = self
            .publication_links
            .iter()
            .position(|l| l.registration_id == msg.registration_id)
            .ok_or_else(|| {
                HermesError::protocol(
                    ErrorCode::UnknownPublication,
                    format!("unknown publication: {}", msg.registration_id),
                )
            })?;

        let link = self.publication_links.swap_remove(index);
        let now_ns = self.ctx.cached_nano_clock.nano_time();
        self.decref_publication(link.publication_registration_id, now_ns);
        self.client_proxy
            .operation_succeeded(msg.correlated.correlation_id);
        Ok(())
    }

    fn on_add_subscription(&mut self, msg: SubscriptionMessage) -> HermesResult<()> {
        let channel = msg.channel.as_str().to_string();
        if channel != command::IPC_CHANNEL {
            return Err(HermesError::protocol(
                ErrorCode::InvalidChannel,
                format!("only '{}' is supported: {}", command::IPC_CHANNEL, channel),
            ));
        }

        let params = SubscriptionParams {
            is_tether: msg.is_tether != 0,
            is_reliable: msg.is_reliable != 0,
            is_rejoin: msg.is_rejoin != 0,
        };

        if let Some(existing) = self
            .subscription_links
            .iter()
            .find(|l| l.clashes_with(msg.stream_id, &channel, params))
        {
            return Err(HermesError::protocol(
                ErrorCode::ClashingSubscriptionParams,
                format!(
                    "option conflicts with existing subscription {}: reliable/rejoin",
                    existing.registration_id()
                ),
            ));
        }

        let registration_id = msg.correlated.correlation_id;
        let now_ns = self.ctx.cached_nano_clock.nano_time();
        self.get_or_add_client(msg.correlated.client_id);
        self.subscription_links.push(SubscriptionLink::new(
            registration_id,
            msg.stream_id,
            channel,
            msg.correlated.client_id,
            params,
        ));

        self.client_proxy.on_subscription_ready(registration_id);

        // Link to every ACTIVE publication already on the stream.
        let mut announcements = Vec::new();
        for pub_index in 0..self.ipc_publications.len() {
            let matches = {
                let publication = &self.ipc_publications[pub_index];
                publication.state() == PublicationState::Active
                    && publication.stream_id() == msg.stream_id
            };
            if matches {
                for (sub_reg, counter_id) in self.link_matching_subscriptions(pub_index, now_ns) {
                    if sub_reg == registration_id {
                        let publication = &self.ipc_publications[pub_index];
                        announcements.push((
                            publication.registration_id(),
                            publication.session_id(),
                            publication.stream_id(),
                            counter_id,
                            publication.log_file_name(),
                        ));
                    }
                }
            }
        }

        for (pub_reg, session_id, stream_id, counter_id, log_file) in announcements {
            self.client_proxy.on_available_image(
                pub_reg,
                registration_id,
                session_id,
                stream_id,
                counter_id,
                &log_file,
            );
        }

        Ok(())
    }

    fn on_remove_subscription(&mut self, msg: RemoveMessage) -> HermesResult<()> {
        let index = self
            .subscription_links
            .iter()
            .position(|l| l.registration_id() == msg.registration_id)
            .ok_or_else(|| {
                HermesError::protocol(
                    ErrorCode::UnknownSubscription,
                    format!("unknown subscription: {}", msg.registration_id),
                )
            })?;

        let link = self.subscription_links.swap_remove(index);
        self.unlink_subscription(link);
        self.client_proxy
            .operation_succeeded(msg.correlated.correlation_id);
        Ok(())
    }

    fn on_client_keepalive(&mut self, client_id: i64) {
        self.system_counters
            .get(SystemCounterDescriptor::HeartbeatsReceived)
            .increment_ordered();
        let now_ms = self.ctx.cached_epoch_clock.time();
        if let Some(client) = self.clients.iter_mut().find(|c| c.client_id() == client_id) {
            client.on_keepalive(now_ms);
        }
    }

    fn on_client_close(&mut self, client_id: i64) {
        if let Some(client) = self.clients.iter_mut().find(|c| c.client_id() == client_id) {
            client.on_closed_by_command();
        }
    }

    fn on_add_counter(&mut self, msg: CounterMessage) -> HermesResult<()> {
        self.get_or_add_client(msg.correlated.client_id);
        let counter_id = self
            .counters_manager
            .allocate(msg.label.as_str(), msg.type_id)?;
        self.counters_manager
            .set_registration_id(counter_id, msg.correlated.correlation_id);

        self.counter_links.push(CounterLink {
            registration_id: msg.correlated.correlation_id,
            counter_id,
            client_id: msg.correlated.client_id,
        });
        self.client_proxy
            .on_counter_ready(msg.correlated.correlation_id, counter_id);
        Ok(())
    }

    fn on_remove_counter(&mut self, msg: RemoveMessage) -> HermesResult<()> {
        let index = self
            .counter_links
            .iter()
            .position(|l| l.registration_id == msg.registration_id)
            .ok_or_else(|| {
                HermesError::protocol(
                    ErrorCode::UnknownCounter,
                    format!("unknown counter: {}", msg.registration_id),
                )
            })?;

        let link = self.counter_links.swap_remove(index);
        self.client_proxy
            .operation_succeeded(msg.correlated.correlation_id);
        self.client_proxy
            .on_unavailable_counter(link.registration_id, link.counter_id);
        self.counters_manager.free(link.counter_id);
        Ok(())
    }

    // === helpers ===

    fn get_or_add_client(&mut self, client_id: i64) -> &mut ClientSession {
        let now_ms = self.ctx.cached_epoch_clock.time();
        if let Some(index) = self.clients.iter().position(|c| c.client_id() == client_id) {
            return &mut self.clients[index];
        }
        log::debug!("new client: {}", client_id);
        self.clients.push(ClientSession::new(
            client_id,
            now_ms,
            self.ctx.config.client_liveness_timeout_ns,
        ));
        self.clients.last_mut().expect("just pushed")
    }

    fn decref_publication(&mut self, publication_registration_id: i64, now_ns: i64) {
        if let Some(publication) = self
            .ipc_publications
            .iter_mut()
            .find(|p| p.registration_id() == publication_registration_id)
        {
            publication.decref(now_ns);
        }
    }

    fn unlink_subscription(&mut self, link: SubscriptionLink) {
        for position in link.positions() {
            if let Some(publication) = self
                .ipc_publications
                .iter_mut()
                .find(|p| p.registration_id() == position.publication_registration_id)
            {
                if let Some(freed) = publication.remove_subscriber(position.counter_id) {
                    self.counters_manager.free(freed.id());
                }
            }
        }
    }

    /// Allocate a session id, skipping the reserved range and any id
    /// already active on the stream.
    fn next_available_session_id(&mut self, stream_id: i32) -> i32 {
        let low = self.ctx.config.publication_reserved_session_id_low;
        let high = self.ctx.config.publication_reserved_session_id_high;

        loop {
            let mut candidate = self.next_session_id;
            self.next_session_id = self.next_session_id.wrapping_add(1);

            if (low..=high).contains(&candidate) {
                self.next_session_id = high.wrapping_add(1);
                candidate = self.next_session_id;
                self.next_session_id = self.next_session_id.wrapping_add(1);
            }

            if !self.active_sessions.contains(&(candidate, stream_id)) {
                return candidate;
            }
        }
    }
}

impl Agent for DriverConductor {
    fn do_work(&mut self) -> HermesResult<usize> {
        if self.terminate_requested {
            return Err(HermesError::Terminated);
        }

        let now_ns = (self.ctx.nano_clock)();
        self.update_clocks(now_ns);

        let mut work_count = self.process_timers(now_ns);
        work_count += self.drain_commands();

        for publication in &mut self.ipc_publications {
            if publication.state() == PublicationState::Active {
                work_count += publication.update_publisher_limit();
            }
        }

        Ok(work_count)
    }

    fn on_close(&mut self) {
        for i in (0..self.ipc_publications.len()).rev() {
            let publication = self.ipc_publications.swap_remove(i);
            self.close_publication(publication);
        }
        log::info!("driver conductor closed");
    }

    fn role_name(&self) -> &str {
        "driver-conductor"
    }
}

/// Pseudo-random starting session id derived from the driver start time,
/// so session ids differ run to run (splitmix step).
fn initial_session_id(ctx: &DriverContext) -> i32 {
    let seed = ctx.cached_epoch_clock.time() as u64;
    mix(seed) as i32
}

/// Initial term id for a new log, derived from its registration id.
fn initial_term_id_for(registration_id: i64) -> i32 {
    mix(registration_id as u64) as i32
}

fn mix(seed: u64) -> u64 {
    let mut z = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
