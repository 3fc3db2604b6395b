//! Encodes conductor responses onto the to-clients broadcast.

use hermes_core::command::{
    encode, response_type, ClientTimeout, CounterUpdate, ErrorCode, ErrorResponse, ImageMessage,
    ImageReady, OperationSucceeded, PublicationReady, SubscriptionReady,
};
use hermes_core::concurrent::broadcast::BroadcastTransmitter;
use hermes_core::types::FixedString;

/// Conductor-side handle for talking back to clients.
pub struct ClientProxy {
    transmitter: BroadcastTransmitter,
}

impl ClientProxy {
    pub fn new(transmitter: BroadcastTransmitter) -> Self {
        Self { transmitter }
    }

    pub fn on_error(&mut self, offending_correlation_id: i64, code: ErrorCode, message: &str) {
        log::debug!(
            "error response: correlation={} code={:?} {}",
            offending_correlation_id,
            code,
            message
        );
        let response = ErrorResponse {
            offending_correlation_id,
            error_code: code as i32,
            _pad: 0,
            message: FixedString::from_str(message),
        };
        self.transmit(response_type::ON_ERROR, encode(&response));
    }

    #[allow(clippy::too_many_arguments)]
    pub fn on_publication_ready(
        &mut self,
        correlation_id: i64,
        registration_id: i64,
        session_id: i32,
        stream_id: i32,
        publisher_limit_counter_id: i32,
        log_file: &str,
        is_exclusive: bool,
    ) {
        log::debug!(
            "publication ready: registration={} session={} stream={}",
            registration_id,
            session_id,
            stream_id
        );
        let response = PublicationReady {
            correlation_id,
            registration_id,
            session_id,
            stream_id,
            publisher_limit_counter_id,
            is_exclusive: i32::from(is_exclusive),
            log_file: FixedString::from_str(log_file),
        };
        self.transmit(response_type::ON_PUBLICATION_READY, encode(&response));
    }

    pub fn on_subscription_ready(&mut self, correlation_id: i64) {
        let response = SubscriptionReady { correlation_id };
        self.transmit(response_type::ON_SUBSCRIPTION_READY, encode(&response));
    }

    pub fn operation_succeeded(&mut self, correlation_id: i64) {
        let response = OperationSucceeded { correlation_id };
        self.transmit(response_type::ON_OPERATION_SUCCESS, encode(&response));
    }

    pub fn on_available_image(
        &mut self,
        publication_registration_id: i64,
        subscription_registration_id: i64,
        session_id: i32,
        stream_id: i32,
        subscriber_position_counter_id: i32,
        log_file: &str,
    ) {
        log::debug!(
            "available image: publication={} subscription={} session={}",
            publication_registration_id,
            subscription_registration_id,
            session_id
        );
        let response = ImageReady {
            correlation_id: publication_registration_id,
            subscription_registration_id,
            session_id,
            stream_id,
            subscriber_position_counter_id,
            _pad: 0,
            log_file: FixedString::from_str(log_file),
        };
        self.transmit(response_type::ON_AVAILABLE_IMAGE, encode(&response));
    }

    pub fn on_unavailable_image(
        &mut self,
        publication_registration_id: i64,
        subscription_registration_id: i64,
        stream_id: i32,
    ) {
        log::debug!(
            "unavailable image: publication={} subscription={}",
            publication_registration_id,
            subscription_registration_id
        );
        let response = ImageMessage {
            correlation_id: publication_registration_id,
            subscription_registration_id,
            stream_id,
            _pad: 0,
        };
        self.transmit(response_type::ON_UNAVAILABLE_IMAGE, encode(&response));
    }

    pub fn on_counter_ready(&mut self, correlation_id: i64, counter_id: i32) {
        let response = CounterUpdate {
            correlation_id,
            counter_id,
            _pad: 0,
        };
        self.transmit(response_type::ON_COUNTER_READY, encode(&response));
    }

    pub fn on_unavailable_counter(&mut self, registration_id: i64, counter_id: i32) {
        let response = CounterUpdate {
            correlation_id: registration_id,
            counter_id,
            _pad: 0,
        };
        self.transmit(response_type::ON_UNAVAILABLE_COUNTER, encode(&response));
    }

    pub fn on_client_timeout(&mut self, client_id: i64) {
        log::info!("client {} timed out", client_id);
        let response = ClientTimeout { client_id };
        self.transmit(response_type::ON_CLIENT_TIMEOUT, encode(&response));
    }

    fn transmit(&mut self, msg_type: i32, payload: &[u8]) {
        // Receivers are never flow controlled; a failure here is a
        // programming error (bad type or oversized record).
        if let Err(e) = self.transmitter.transmit(msg_type, payload) {
            log::error!("failed to transmit response type {}: {}", msg_type, e);
        }
    }
}
