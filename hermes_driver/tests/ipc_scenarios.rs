//! End-to-end IPC scenarios: real conductor, real mapped logs, client
//! engines offering and polling against them.

mod common;

use std::path::Path;

use common::{
    available_image, publication_ready, small_config, Response, TestDriver,
};
use hermes_core::logbuffer::{descriptor, frame_descriptor};
use hermes_core::memory::LogBuffers;
use hermes_core::publication::OfferError;
use hermes_driver::{SystemCounterDescriptor, TetherState};

/// Simple IPC round trip: three messages arrive in order and the
/// subscriber position lands exactly past the third frame.
#[test]
fn s1_simple_ipc_round_trip() {
    let mut driver = TestDriver::launch(small_config());

    driver.add_publication(10, false);
    driver.add_subscription(10, true);
    let responses = driver.responses();
    let publication = driver.map_publication(publication_ready(&responses));
    let mut image = driver.map_image(available_image(&responses));

    driver.duty_cycle(); // publish the first publisher limit

    let messages: Vec<Vec<u8>> = (0..3u8).map(|i| vec![i; 96]).collect();
    for msg in &messages {
        publication.offer(msg).unwrap();
    }

    let mut received = Vec::new();
    let fragments = image.poll(
        &mut |body: &[u8], _header: &hermes_core::Header| received.push(body.to_vec()),
        10,
    );

    assert_eq!(fragments, 3);
    assert_eq!(received, messages);
    // 3 x (96 + 32 header) = 3 x 128 aligned bytes.
    assert_eq!(image.position(), 384);
}

/// Back pressure: with a 4096-byte window and a subscriber that never
/// polls, the producer is stopped exactly at the window.
#[test]
fn s2_back_pressure_at_window() {
    let mut config = small_config();
    config.ipc_publication_term_window_length = Some(4096);
    let mut driver = TestDriver::launch(config);

    driver.add_publication(10, false);
    driver.add_subscription(10, true);
    let responses = driver.responses();
    let ready = publication_ready(&responses);
    let log_path = ready.log_file.as_str().to_string();
    let publication = driver.map_publication(ready);

    driver.duty_cycle();

    let msg = vec![0u8; 96]; // 128 aligned bytes per frame
    let mut accepted = 0;
    loop {
        match publication.offer(&msg) {
            Ok(_) => accepted += 1,
            Err(OfferError::BackPressured) => break,
            Err(other) => panic!("unexpected offer outcome: {:?}", other),
        }
        assert!(accepted <= 32, "offer should be stopped at the window");
        driver.duty_cycle();
    }

    assert_eq!(accepted, 32);
    assert_eq!(publication.publisher_limit(), 4096);
    assert_eq!(publication.position(), 4096);

    // No frame beyond the window.
    let log = LogBuffers::map_existing(Path::new(&log_path)).unwrap();
    let active_term = log.term_buffer(0);
    assert_eq!(
        frame_descriptor::frame_length_volatile(&active_term, 4096),
        0
    );
}

/// Partition rotation: the active term count advances as the producer
/// crosses term boundaries, and each completed term ends in padding when
/// a claim would cross the boundary.
#[test]
fn s3_partition_rotation() {
    let mut driver = TestDriver::launch(small_config());

    driver.add_publication(7, false);
    driver.add_subscription(7, true);
    let responses = driver.responses();
    let ready = publication_ready(&responses);
    let registration_id = ready.registration_id;
    let publication = driver.map_publication(ready);
    let mut image = driver.map_image(available_image(&responses));

    driver.duty_cycle();

    let (meta, log) = {
        let record = driver.conductor.find_publication(registration_id).unwrap();
        (record.log_buffers().meta_buffer(), record.log_buffers().clone())
    };
    assert_eq!(descriptor::active_term_count(&meta), 0);

    let term_length = 64 * 1024i64;
    let msg = vec![5u8; 1024]; // 1056 aligned bytes per frame, 62 per term
    let frames_per_term = 62i64;
    let padding_offset = (frames_per_term * 1056) as usize; // 65472

    // Drive the producer across a term boundary while parking the
    // consumer just short of the term's tail padding, so incremental
    // cleaning (which follows the consumer) cannot zero it before the
    // assertion.
    let mut cross_one_term = |park_position: i64, expected_term_count: i32| {
        while descriptor::active_term_count(&meta) < expected_term_count {
            match publication.offer(&msg) {
                Ok(_) | Err(OfferError::AdminAction) | Err(OfferError::BackPressured) => {}
                Err(other) => panic!("unexpected offer outcome: {:?}", other),
            }
            while image.position() < park_position
                && image.poll(&mut |_: &[u8], _: &hermes_core::Header| {}, 1) > 0
            {}
            driver.duty_cycle();
        }
    };

    cross_one_term(frames_per_term * 1056, 1);
    assert_eq!(descriptor::active_term_count(&meta), 1);
    let term0 = log.term_buffer(0);
    assert_eq!(
        frame_descriptor::frame_length_volatile(&term0, padding_offset),
        -64,
        "term 0 should end in a padding frame"
    );
    assert_eq!(
        frame_descriptor::frame_type(&term0, padding_offset),
        frame_descriptor::HDR_TYPE_PAD
    );

    cross_one_term(term_length + frames_per_term * 1056, 2);
    assert_eq!(descriptor::active_term_count(&meta), 2);
    let term1 = log.term_buffer(1);
    assert_eq!(
        frame_descriptor::frame_length_volatile(&term1, padding_offset),
        -64,
        "term 1 should end in a padding frame"
    );
}

/// Unblock: a producer that claims and never commits blocks the stream;
/// after the unblock timeout the conductor pads the dead claim and the
/// consumer advances.
#[test]
fn s4_unblock_dead_claim() {
    let config = small_config();
    let unblock_timeout_ns = config.publication_unblock_timeout_ns;
    let mut driver = TestDriver::launch(config);

    driver.add_publication(3, false); // shared session: unblock applies
    driver.add_subscription(3, true);
    let responses = driver.responses();
    let publication = driver.map_publication(publication_ready(&responses));
    let mut image = driver.map_image(available_image(&responses));

    driver.duty_cycle();

    publication.offer(&[1u8; 96]).unwrap();
    assert_eq!(
        image.poll(&mut |_: &[u8], _: &hermes_core::Header| {}, 10),
        1
    );
    driver.duty_cycle();

    // Producer claims 96 bytes and "crashes" before committing.
    let (_, claim) = publication.try_claim(96).unwrap();
    std::mem::forget(claim);

    // A second producer commits a frame past the dead claim.
    publication.offer(&[2u8; 96]).unwrap();

    // The consumer is stuck at the uncommitted frame.
    assert_eq!(
        image.poll(&mut |_: &[u8], _: &hermes_core::Header| {}, 10),
        0
    );
    assert_eq!(image.position(), 128);

    // First sweep records the stalled consumer position; the second,
    // past the timeout, unblocks.
    driver.timer_sweep(2_000_000_000);
    driver.timer_sweep(unblock_timeout_ns + 2_000_000_000);

    assert_eq!(
        driver
            .conductor
            .system_counters()
            .value(SystemCounterDescriptor::UnblockedPublications),
        1
    );

    let mut received = Vec::new();
    image.poll(
        &mut |body: &[u8], _: &hermes_core::Header| received.push(body[0]),
        10,
    );
    assert_eq!(received, vec![2], "the frame after the padding arrives");
    assert_eq!(image.position(), 384);
}

/// Untethered eviction and re-admission: a lagging untethered subscriber
/// is notified unavailable, rested out of flow control, then re-admitted
/// at the current consumer position.
#[test]
fn s5_untethered_eviction_and_readmission() {
    let config = small_config();
    let window_timeout_ns = config.untethered_window_limit_timeout_ns;
    let resting_timeout_ns = config.untethered_resting_timeout_ns;
    let mut driver = TestDriver::launch(config);

    driver.add_publication(21, false);
    driver.add_subscription(21, true);
    let tethered_responses = driver.responses();
    let untethered_registration = driver.add_subscription(21, false);
    let untethered_responses = driver.responses();

    let ready = publication_ready(&tethered_responses);
    let registration_id = ready.registration_id;
    let publication = driver.map_publication(ready);
    let mut tethered = driver.map_image(available_image(&tethered_responses));
    let untethered_image = available_image(&untethered_responses);
    let untethered_counter_id = untethered_image.subscriber_position_counter_id;

    driver.duty_cycle();

    // Fill the window (half the 64 KiB term) while only the tethered
    // subscriber keeps up.
    let msg = vec![9u8; 96];
    let mut offered = 0i64;
    loop {
        match publication.offer(&msg) {
            Ok(_) => offered += 128,
            Err(OfferError::BackPressured) => break,
            Err(other) => panic!("unexpected offer outcome: {:?}", other),
        }
        while tethered.poll(&mut |_: &[u8], _: &hermes_core::Header| {}, 16) > 0 {}
        driver.duty_cycle();
    }
    assert_eq!(offered, 32 * 1024);
    while tethered.poll(&mut |_: &[u8], _: &hermes_core::Header| {}, 16) > 0 {}
    driver.duty_cycle();

    let tether_state = |driver: &TestDriver| {
        driver
            .conductor
            .find_publication(registration_id)
            .unwrap()
            .subscribers()
            .iter()
            .find(|s| s.counter_id() == untethered_counter_id)
            .map(|s| s.tether_state())
    };

    // Lagging past the window limit for a full timeout: unavailable.
    driver.timer_sweep(window_timeout_ns + 1_000_000_000);
    let responses = driver.responses();
    assert!(responses.iter().any(|r| matches!(
        r,
        Response::UnavailableImage(msg) if msg.subscription_registration_id == untethered_registration
    )));
    assert_eq!(tether_state(&driver), Some(TetherState::Linger));

    // Another timeout: resting, excluded from flow control.
    driver.timer_sweep(window_timeout_ns + 1_000_000_000);
    assert_eq!(tether_state(&driver), Some(TetherState::Resting));

    // After the resting timeout: re-admitted at the consumer position.
    driver.timer_sweep(resting_timeout_ns + 1_000_000_000);
    let responses = driver.responses();
    let image = responses
        .iter()
        .find_map(|r| match r {
            Response::AvailableImage(image)
                if image.subscription_registration_id == untethered_registration =>
            {
                Some(image)
            }
            _ => None,
        })
        .expect("re-admission should announce a fresh image");
    assert_eq!(image.subscriber_position_counter_id, untethered_counter_id);
    assert_eq!(tether_state(&driver), Some(TetherState::Active));
    assert_eq!(
        driver.counters_reader().counter_value(untethered_counter_id),
        32 * 1024,
        "re-admitted position snaps to the consumer position"
    );
}

/// Lifecycle: decref to zero captures end-of-stream, a drained
/// publication lingers, then everything is freed.
#[test]
fn s6_publication_lifecycle() {
    let config = small_config();
    let linger_ns = config.publication_linger_timeout_ns;
    let mut driver = TestDriver::launch(config);

    let pub_correlation = driver.add_publication(5, false);
    driver.add_subscription(5, true);
    let responses = driver.responses();
    let ready = publication_ready(&responses);
    let registration_id = ready.registration_id;
    let log_path = ready.log_file.as_str().to_string();
    let pub_lmt_counter_id = ready.publisher_limit_counter_id;
    let publication = driver.map_publication(ready);
    let mut image = driver.map_image(available_image(&responses));

    driver.duty_cycle();

    for i in 0..5u8 {
        publication.offer(&[i; 96]).unwrap();
    }

    // Last reference released: INACTIVE, end of stream captured.
    driver.remove_registration(
        hermes_core::command::msg_type::REMOVE_PUBLICATION,
        pub_correlation,
    );
    let record = driver.conductor.find_publication(registration_id).unwrap();
    assert_eq!(record.state(), hermes_driver::PublicationState::Inactive);
    assert!(!image.is_end_of_stream());

    // Drain.
    assert_eq!(
        image.poll(&mut |_: &[u8], _: &hermes_core::Header| {}, 16),
        5
    );
    assert_eq!(image.position(), 5 * 128);
    assert!(image.is_end_of_stream());

    // Drained: LINGER plus unavailable-image to the linked subscriber.
    driver.timer_sweep(2_000_000_000);
    let responses = driver.responses();
    assert!(responses
        .iter()
        .any(|r| matches!(r, Response::UnavailableImage(_))));
    assert_eq!(
        driver
            .conductor
            .find_publication(registration_id)
            .unwrap()
            .state(),
        hermes_driver::PublicationState::Linger
    );

    // After the linger timeout the publication is gone: log unmapped and
    // unlinked, counters freed.
    driver.timer_sweep(linger_ns + 2_000_000_000);
    assert!(driver.conductor.find_publication(registration_id).is_none());
    assert_eq!(driver.conductor.publication_count(), 0);
    assert!(
        !Path::new(&log_path).exists(),
        "the driver unlinks the log file"
    );
    assert_eq!(driver.counters_reader().label(pub_lmt_counter_id), None);
}
