//! Conductor control-protocol tests: command dispatch over the real
//! ring, responses over the real broadcast.

mod common;

use common::{
    available_image, error_response, publication_ready, small_config, Response, TestDriver,
    CLIENT_ID,
};
use hermes_core::command::{self, ErrorCode};
use hermes_core::concurrent::errors::ErrorLogReader;
use hermes_driver::{PublicationState, SystemCounterDescriptor};

#[test]
fn add_publication_produces_log_and_response() {
    let mut driver = TestDriver::launch(small_config());

    let correlation_id = driver.add_publication(10, false);
    let responses = driver.responses();
    let ready = publication_ready(&responses);

    assert_eq!(ready.correlation_id, correlation_id);
    assert_eq!(ready.stream_id, 10);
    assert!(std::path::Path::new(ready.log_file.as_str()).exists());
    assert_eq!(driver.conductor.publication_count(), 1);
    assert_eq!(driver.conductor.client_count(), 1);

    let publication = driver
        .conductor
        .find_publication(ready.registration_id)
        .unwrap();
    assert_eq!(publication.state(), PublicationState::Active);
}

#[test]
fn shared_publications_share_a_session() {
    let mut driver = TestDriver::launch(small_config());

    driver.add_publication(10, false);
    driver.add_publication(10, false);
    let responses = driver.responses();

    let sessions: Vec<i32> = responses
        .iter()
        .filter_map(|r| match r {
            Response::PublicationReady(ready) => Some(ready.session_id),
            _ => None,
        })
        .collect();

    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0], sessions[1]);
    assert_eq!(driver.conductor.publication_count(), 1);
}

#[test]
fn exclusive_publications_get_distinct_sessions() {
    let mut driver = TestDriver::launch(small_config());

    driver.add_publication(10, true);
    driver.add_publication(10, true);
    let responses = driver.responses();

    let sessions: Vec<i32> = responses
        .iter()
        .filter_map(|r| match r {
            Response::PublicationReady(ready) => Some(ready.session_id),
            _ => None,
        })
        .collect();

    assert_eq!(sessions.len(), 2);
    assert_ne!(sessions[0], sessions[1]);
    assert_eq!(driver.conductor.publication_count(), 2);
}

#[test]
fn explicit_session_id_clash_is_rejected() {
    let mut driver = TestDriver::launch(small_config());

    driver.add_publication_with_session(10, 555);
    let _ = driver.responses();

    driver.add_publication_with_session(10, 555);
    let responses = driver.responses();
    let error = error_response(&responses);

    assert_eq!(
        ErrorCode::from_i32(error.error_code),
        ErrorCode::SessionIdClash
    );
    assert_eq!(
        driver
            .conductor
            .system_counters()
            .value(SystemCounterDescriptor::Errors),
        1
    );
    assert_eq!(driver.conductor.publication_count(), 1);

    // The rejection is in the distinct error log, coalesced on repeats.
    let observations = ErrorLogReader::new(driver.cnc.error_log_buffer()).read();
    assert_eq!(observations.len(), 1);
    assert!(observations[0].message.contains("clashing session id"));

    driver.add_publication_with_session(10, 555);
    let observations = ErrorLogReader::new(driver.cnc.error_log_buffer()).read();
    assert_eq!(observations.len(), 1);
    assert_eq!(observations[0].observation_count, 2);
}

#[test]
fn invalid_channel_is_rejected() {
    let mut driver = TestDriver::launch(small_config());

    let correlation_id = driver.next_correlation_id();
    let msg = hermes_core::command::PublicationMessage {
        correlated: hermes_core::command::CorrelatedMessage {
            client_id: CLIENT_ID,
            correlation_id,
        },
        stream_id: 1,
        is_exclusive: 0,
        session_id: 0,
        has_explicit_session_id: 0,
        channel: hermes_core::types::FixedString::from_str("udp://localhost:4000"),
    };
    driver
        .ring
        .write(command::msg_type::ADD_PUBLICATION, command::encode(&msg))
        .unwrap();
    driver.duty_cycle();

    let responses = driver.responses();
    let error = error_response(&responses);
    assert_eq!(error.offending_correlation_id, correlation_id);
    assert_eq!(
        ErrorCode::from_i32(error.error_code),
        ErrorCode::InvalidChannel
    );
}

#[test]
fn subscription_links_existing_publication() {
    let mut driver = TestDriver::launch(small_config());

    driver.add_publication(42, false);
    let _ = driver.responses();

    let sub_registration = driver.add_subscription(42, true);
    let responses = driver.responses();

    assert!(responses
        .iter()
        .any(|r| matches!(r, Response::SubscriptionReady(ready) if ready.correlation_id == sub_registration)));
    let image = available_image(&responses);
    assert_eq!(image.subscription_registration_id, sub_registration);
    assert_eq!(image.stream_id, 42);
}

#[test]
fn publication_links_existing_subscription() {
    let mut driver = TestDriver::launch(small_config());

    let sub_registration = driver.add_subscription(42, true);
    let _ = driver.responses();

    driver.add_publication(42, false);
    let responses = driver.responses();

    let image = available_image(&responses);
    assert_eq!(image.subscription_registration_id, sub_registration);
}

#[test]
fn clashing_subscription_params_are_rejected() {
    let mut driver = TestDriver::launch(small_config());

    driver.add_subscription_with_params(9, true, true, true);
    let _ = driver.responses();

    driver.add_subscription_with_params(9, true, false, true);
    let responses = driver.responses();
    let error = error_response(&responses);
    assert_eq!(
        ErrorCode::from_i32(error.error_code),
        ErrorCode::ClashingSubscriptionParams
    );
    assert_eq!(driver.conductor.subscription_count(), 1);

    // Matching params join fine.
    driver.add_subscription_with_params(9, true, true, true);
    let responses = driver.responses();
    assert!(responses
        .iter()
        .any(|r| matches!(r, Response::SubscriptionReady(_))));
    assert_eq!(driver.conductor.subscription_count(), 2);
}

#[test]
fn remove_unknown_registrations_fail() {
    let mut driver = TestDriver::launch(small_config());

    driver.remove_registration(command::msg_type::REMOVE_PUBLICATION, 12345);
    let responses = driver.responses();
    assert_eq!(
        ErrorCode::from_i32(error_response(&responses).error_code),
        ErrorCode::UnknownPublication
    );

    driver.remove_registration(command::msg_type::REMOVE_SUBSCRIPTION, 12345);
    let responses = driver.responses();
    assert_eq!(
        ErrorCode::from_i32(error_response(&responses).error_code),
        ErrorCode::UnknownSubscription
    );
}

#[test]
fn malformed_command_is_counted_and_answered() {
    let mut driver = TestDriver::launch(small_config());

    driver.ring.write(999, &[1, 2, 3, 4]).unwrap();
    driver.duty_cycle();

    let responses = driver.responses();
    let error = error_response(&responses);
    assert_eq!(
        ErrorCode::from_i32(error.error_code),
        ErrorCode::MalformedCommand
    );
    assert_eq!(
        driver
            .conductor
            .system_counters()
            .value(SystemCounterDescriptor::Errors),
        1
    );
}

#[test]
fn client_timeout_tears_down_resources() {
    let config = small_config();
    let liveness_ns = config.client_liveness_timeout_ns;
    let mut driver = TestDriver::launch(config);

    let pub_registration = {
        driver.add_publication(10, false);
        let responses = driver.responses();
        publication_ready(&responses).registration_id
    };
    driver.add_subscription(10, true);
    let _ = driver.responses();

    // Keepalives hold the client alive across sweeps.
    driver.timer_sweep(liveness_ns / 2);
    driver.keepalive();
    driver.timer_sweep(liveness_ns / 2);
    assert_eq!(driver.conductor.client_count(), 1);

    // Silence: the client times out, its publication is decref'd.
    driver.timer_sweep(liveness_ns + 1_000_000_000);
    assert_eq!(driver.conductor.client_count(), 0);
    assert_eq!(
        driver
            .conductor
            .system_counters()
            .value(SystemCounterDescriptor::ClientTimeouts),
        1
    );
    let responses = driver.responses();
    assert!(responses
        .iter()
        .any(|r| matches!(r, Response::ClientTimeout(id) if *id == CLIENT_ID)));
    assert_eq!(driver.conductor.subscription_count(), 0);

    let publication = driver.conductor.find_publication(pub_registration).unwrap();
    assert_ne!(publication.state(), PublicationState::Active);
}

#[test]
fn keepalives_are_counted() {
    let mut driver = TestDriver::launch(small_config());
    driver.add_publication(1, false);
    driver.keepalive();
    driver.keepalive();
    assert_eq!(
        driver
            .conductor
            .system_counters()
            .value(SystemCounterDescriptor::HeartbeatsReceived),
        2
    );
}

#[test]
fn terminate_driver_stops_the_agent() {
    use hermes_core::agent::Agent;

    let mut driver = TestDriver::launch(small_config());
    let msg = hermes_core::command::CorrelatedMessage {
        client_id: CLIENT_ID,
        correlation_id: driver.next_correlation_id(),
    };
    driver
        .ring
        .write(command::msg_type::TERMINATE_DRIVER, command::encode(&msg))
        .unwrap();

    driver.duty_cycle();
    assert!(matches!(
        driver.conductor.do_work(),
        Err(hermes_core::HermesError::Terminated)
    ));
}
