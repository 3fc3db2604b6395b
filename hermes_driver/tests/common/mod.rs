#![allow(dead_code)] // each test binary uses a subset of the harness

//! Shared harness for driver integration tests.
//!
//! Runs a real conductor over a real cnc file and real log files, but on
//! the test thread with hand-cranked clocks, so timer-driven behaviour
//! (sweeps, timeouts, linger) is deterministic.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use hermes_core::agent::Agent;
use hermes_core::command::{
    self, decode, encode, CorrelatedMessage, ErrorResponse, ImageMessage, ImageReady,
    PublicationMessage, PublicationReady, RemoveMessage, SubscriptionMessage, SubscriptionReady,
};
use hermes_core::concurrent::broadcast::{BroadcastReceiver, CopyBroadcastReceiver};
use hermes_core::concurrent::counters::CountersReader;
use hermes_core::concurrent::ring_buffer::RingBuffer;
use hermes_core::image::Image;
use hermes_core::memory::cnc_file::{cnc_path, CncFile};
use hermes_core::memory::LogBuffers;
use hermes_core::publication::Publication;
use hermes_core::types::FixedString;
use hermes_driver::conductor::DriverConductor;
use hermes_driver::context::{DriverConfig, DriverContext};

pub const CLIENT_ID: i64 = 777;

/// A decoded response from the driver.
#[derive(Debug)]
pub enum Response {
    PublicationReady(PublicationReady),
    SubscriptionReady(SubscriptionReady),
    OperationSucceeded(i64),
    Error(ErrorResponse),
    AvailableImage(ImageReady),
    UnavailableImage(ImageMessage),
    ClientTimeout(i64),
    Other(i32),
}

pub struct TestDriver {
    pub conductor: DriverConductor,
    pub cnc: Arc<CncFile>,
    pub ring: RingBuffer,
    receiver: CopyBroadcastReceiver,
    nano: Arc<AtomicI64>,
    epoch: Arc<AtomicI64>,
    pub hermes_dir: PathBuf,
}

impl TestDriver {
    pub fn launch(mut config: DriverConfig) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let hermes_dir = unique_dir("driver");
        config.dir = Some(hermes_dir.clone());
        std::fs::create_dir_all(hermes_dir.join("publications")).unwrap();

        let nano = Arc::new(AtomicI64::new(1));
        let epoch = Arc::new(AtomicI64::new(1_000_000));
        let nano_for_clock = Arc::clone(&nano);
        let epoch_for_clock = Arc::clone(&epoch);

        let context = DriverContext::with_clocks(
            config,
            Arc::new(move || nano_for_clock.load(Ordering::Acquire)),
            Arc::new(move || epoch_for_clock.load(Ordering::Acquire)),
        )
        .unwrap();

        let cnc = Arc::new(
            CncFile::create(
                &cnc_path(&context.hermes_dir),
                context.config.cnc_layout(),
                context.config.client_liveness_timeout_ns,
                (context.epoch_clock)(),
            )
            .unwrap(),
        );

        let conductor = DriverConductor::new(context, Arc::clone(&cnc)).unwrap();
        let ring = RingBuffer::new(cnc.to_driver_buffer()).unwrap();
        let receiver =
            CopyBroadcastReceiver::new(BroadcastReceiver::new(cnc.to_clients_buffer()).unwrap());

        Self {
            conductor,
            ring,
            receiver,
            nano,
            epoch,
            hermes_dir,
            cnc,
        }
    }

    /// Advance both clocks by `delta_ns`.
    pub fn advance_time(&self, delta_ns: i64) {
        self.nano.fetch_add(delta_ns, Ordering::AcqRel);
        self.epoch
            .fetch_add((delta_ns / 1_000_000).max(1), Ordering::AcqRel);
    }

    /// One conductor duty cycle.
    pub fn duty_cycle(&mut self) {
        self.conductor.do_work().unwrap();
    }

    /// Several duty cycles (limits drain a bounded batch per cycle).
    pub fn duty_cycles(&mut self, n: usize) {
        for _ in 0..n {
            self.duty_cycle();
        }
    }

    /// Advance past the timer interval and sweep.
    pub fn timer_sweep(&mut self, delta_ns: i64) {
        self.advance_time(delta_ns);
        self.duty_cycle();
    }

    pub fn next_correlation_id(&self) -> i64 {
        self.ring.next_correlation_id()
    }

    pub fn add_publication(&mut self, stream_id: i32, is_exclusive: bool) -> i64 {
        let correlation_id = self.next_correlation_id();
        let msg = PublicationMessage {
            correlated: CorrelatedMessage {
                client_id: CLIENT_ID,
                correlation_id,
            },
            stream_id,
            is_exclusive: i32::from(is_exclusive),
            session_id: 0,
            has_explicit_session_id: 0,
            channel: FixedString::from_str(command::IPC_CHANNEL),
        };
        self.ring
            .write(command::msg_type::ADD_PUBLICATION, encode(&msg))
            .unwrap();
        self.duty_cycle();
        correlation_id
    }

    pub fn add_publication_with_session(&mut self, stream_id: i32, session_id: i32) -> i64 {
        let correlation_id = self.next_correlation_id();
        let msg = PublicationMessage {
            correlated: CorrelatedMessage {
                client_id: CLIENT_ID,
                correlation_id,
            },
            stream_id,
            is_exclusive: 1,
            session_id,
            has_explicit_session_id: 1,
            channel: FixedString::from_str(command::IPC_CHANNEL),
        };
        self.ring
            .write(command::msg_type::ADD_PUBLICATION, encode(&msg))
            .unwrap();
        self.duty_cycle();
        correlation_id
    }

    pub fn add_subscription(&mut self, stream_id: i32, is_tether: bool) -> i64 {
        self.add_subscription_with_params(stream_id, is_tether, true, true)
    }

    pub fn add_subscription_with_params(
        &mut self,
        stream_id: i32,
        is_tether: bool,
        is_reliable: bool,
        is_rejoin: bool,
    ) -> i64 {
        let correlation_id = self.next_correlation_id();
        let msg = SubscriptionMessage {
            correlated: CorrelatedMessage {
                client_id: CLIENT_ID,
                correlation_id,
            },
            stream_id,
            is_tether: i32::from(is_tether),
            is_reliable: i32::from(is_reliable),
            is_rejoin: i32::from(is_rejoin),
            channel: FixedString::from_str(command::IPC_CHANNEL),
        };
        self.ring
            .write(command::msg_type::ADD_SUBSCRIPTION, encode(&msg))
            .unwrap();
        self.duty_cycle();
        correlation_id
    }

    pub fn remove_registration(&mut self, msg_type: i32, registration_id: i64) -> i64 {
        let correlation_id = self.next_correlation_id();
        let msg = RemoveMessage {
            correlated: CorrelatedMessage {
                client_id: CLIENT_ID,
                correlation_id,
            },
            registration_id,
        };
        self.ring.write(msg_type, encode(&msg)).unwrap();
        self.duty_cycle();
        correlation_id
    }

    pub fn keepalive(&mut self) {
        let msg = CorrelatedMessage {
            client_id: CLIENT_ID,
            correlation_id: 0,
        };
        self.ring
            .write(command::msg_type::CLIENT_KEEPALIVE, encode(&msg))
            .unwrap();
        self.duty_cycle();
    }

    /// Drain and decode everything the driver has broadcast.
    pub fn responses(&mut self) -> Vec<Response> {
        let mut responses = Vec::new();
        self.receiver.receive(|msg_type, payload| {
            let response = match msg_type {
                command::response_type::ON_PUBLICATION_READY => {
                    Response::PublicationReady(decode(payload).unwrap())
                }
                command::response_type::ON_SUBSCRIPTION_READY => {
                    Response::SubscriptionReady(decode(payload).unwrap())
                }
                command::response_type::ON_OPERATION_SUCCESS => {
                    let msg: command::OperationSucceeded = decode(payload).unwrap();
                    Response::OperationSucceeded(msg.correlation_id)
                }
                command::response_type::ON_ERROR => Response::Error(decode(payload).unwrap()),
                command::response_type::ON_AVAILABLE_IMAGE => {
                    Response::AvailableImage(decode(payload).unwrap())
                }
                command::response_type::ON_UNAVAILABLE_IMAGE => {
                    Response::UnavailableImage(decode(payload).unwrap())
                }
                command::response_type::ON_CLIENT_TIMEOUT => {
                    let msg: command::ClientTimeout = decode(payload).unwrap();
                    Response::ClientTimeout(msg.client_id)
                }
                other => Response::Other(other),
            };
            responses.push(response);
        });
        responses
    }

    /// Build a client-side producer from a publication-ready response.
    pub fn map_publication(&self, ready: &PublicationReady) -> Publication {
        let log_buffers = LogBuffers::map_existing(Path::new(ready.log_file.as_str())).unwrap();
        let reader = self.counters_reader();
        Publication::new(
            log_buffers,
            reader.position(ready.publisher_limit_counter_id),
            ready.registration_id,
            ready.is_exclusive != 0,
        )
    }

    /// Build a client-side image from an available-image response.
    pub fn map_image(&self, ready: &ImageReady) -> Image {
        let log_buffers = LogBuffers::map_existing(Path::new(ready.log_file.as_str())).unwrap();
        let reader = self.counters_reader();
        Image::new(
            log_buffers,
            reader.position(ready.subscriber_position_counter_id),
            ready.subscription_registration_id,
        )
    }

    pub fn counters_reader(&self) -> CountersReader {
        CountersReader::new(
            self.cnc.counters_metadata_buffer(),
            self.cnc.counters_values_buffer(),
        )
    }
}

impl Drop for TestDriver {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.hermes_dir);
    }
}

/// Small configs keep the scenario tests fast.
pub fn small_config() -> DriverConfig {
    DriverConfig {
        term_length: 64 * 1024,
        to_driver_buffer_length: 64 * 1024,
        to_clients_buffer_length: 64 * 1024,
        counters_max: 128,
        ..Default::default()
    }
}

pub fn unique_dir(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "hermes_{}_{}_{}",
        prefix,
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ))
}

/// First publication-ready in a response batch.
pub fn publication_ready(responses: &[Response]) -> &PublicationReady {
    responses
        .iter()
        .find_map(|r| match r {
            Response::PublicationReady(ready) => Some(ready),
            _ => None,
        })
        .expect("expected a publication-ready response")
}

/// First available-image in a response batch.
pub fn available_image(responses: &[Response]) -> &ImageReady {
    responses
        .iter()
        .find_map(|r| match r {
            Response::AvailableImage(ready) => Some(ready),
            _ => None,
        })
        .expect("expected an available-image response")
}

/// First error in a response batch.
pub fn error_response(responses: &[Response]) -> &ErrorResponse {
    responses
        .iter()
        .find_map(|r| match r {
            Response::Error(error) => Some(error),
            _ => None,
        })
        .expect("expected an error response")
}
