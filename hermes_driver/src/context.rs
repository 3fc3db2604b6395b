//! Driver configuration and context.
//!
//! `DriverConfig` carries every knob the core recognises, with defaults
//! and `HERMES_*` environment overrides. `DriverContext` is the resolved
//! runtime context handed to the conductor at construction: directories,
//! clock hooks and their cached snapshots. No process-wide singletons;
//! tests inject their own clocks.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use hermes_core::concurrent::clock::{
    default_epoch_clock, default_nano_clock, CachedEpochClock, CachedNanoClock, EpochClock,
    NanoClock,
};
use hermes_core::concurrent::{broadcast, ring_buffer};
use hermes_core::error::{HermesError, HermesResult};
use hermes_core::logbuffer::descriptor;
use hermes_core::memory::CncLayout;

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Tunable knobs for the driver.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Directory holding the cnc file and publication logs. Defaults to a
    /// tmpfs path on Linux.
    pub dir: Option<PathBuf>,

    /// Per-partition term byte size (power of two).
    pub term_length: usize,

    /// Producer flow-control window; defaults to half the term length.
    pub ipc_publication_term_window_length: Option<usize>,

    /// Maximum fragment size including the frame header.
    pub mtu_length: usize,

    /// Page size for log mapping.
    pub file_page_size: usize,

    /// Threshold for suspecting a stuck producer.
    pub publication_unblock_timeout_ns: i64,

    /// How long a drained publication lingers before teardown.
    pub publication_linger_timeout_ns: i64,

    /// Grace period on client heartbeats.
    pub client_liveness_timeout_ns: i64,

    /// Untethered subscriber lag tolerance.
    pub untethered_window_limit_timeout_ns: i64,

    /// Duration a rested subscriber waits before re-admission.
    pub untethered_resting_timeout_ns: i64,

    /// Conductor timer sweep cadence.
    pub timer_interval_ns: i64,

    /// Session ids in `[low, high]` are never generated.
    pub publication_reserved_session_id_low: i32,
    pub publication_reserved_session_id_high: i32,

    /// To-driver command ring data capacity (power of two).
    pub to_driver_buffer_length: usize,

    /// To-clients broadcast data capacity (power of two).
    pub to_clients_buffer_length: usize,

    /// Number of counters the counters file can hold.
    pub counters_max: usize,

    /// Distinct error log capacity in bytes.
    pub error_buffer_length: usize,

    /// Commands drained from the ring per duty cycle.
    pub command_drain_limit: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            dir: None,
            term_length: 4 * 1024 * 1024,
            ipc_publication_term_window_length: None,
            mtu_length: 4096,
            file_page_size: 4096,
            publication_unblock_timeout_ns: 15 * NANOS_PER_SECOND,
            publication_linger_timeout_ns: 5 * NANOS_PER_SECOND,
            client_liveness_timeout_ns: 10 * NANOS_PER_SECOND,
            untethered_window_limit_timeout_ns: 10 * NANOS_PER_SECOND,
            untethered_resting_timeout_ns: 10 * NANOS_PER_SECOND,
            timer_interval_ns: NANOS_PER_SECOND,
            publication_reserved_session_id_low: -1,
            publication_reserved_session_id_high: 1000,
            to_driver_buffer_length: 1024 * 1024,
            to_clients_buffer_length: 1024 * 1024,
            counters_max: 1024,
            error_buffer_length: 64 * 1024,
            command_drain_limit: 10,
        }
    }
}

impl DriverConfig {
    /// Defaults overridden by `HERMES_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("HERMES_DIR") {
            config.dir = Some(PathBuf::from(dir));
        }
        env_usize("HERMES_TERM_LENGTH", &mut config.term_length);
        if let Some(window) = env_usize_opt("HERMES_IPC_PUBLICATION_TERM_WINDOW_LENGTH") {
            config.ipc_publication_term_window_length = Some(window);
        }
        env_usize("HERMES_MTU_LENGTH", &mut config.mtu_length);
        env_usize("HERMES_FILE_PAGE_SIZE", &mut config.file_page_size);
        env_i64(
            "HERMES_PUBLICATION_UNBLOCK_TIMEOUT_NS",
            &mut config.publication_unblock_timeout_ns,
        );
        env_i64(
            "HERMES_PUBLICATION_LINGER_TIMEOUT_NS",
            &mut config.publication_linger_timeout_ns,
        );
        env_i64(
            "HERMES_CLIENT_LIVENESS_TIMEOUT_NS",
            &mut config.client_liveness_timeout_ns,
        );
        env_i64(
            "HERMES_UNTETHERED_WINDOW_LIMIT_TIMEOUT_NS",
            &mut config.untethered_window_limit_timeout_ns,
        );
        env_i64(
            "HERMES_UNTETHERED_RESTING_TIMEOUT_NS",
            &mut config.untethered_resting_timeout_ns,
        );
        env_i64("HERMES_TIMER_INTERVAL_NS", &mut config.timer_interval_ns);

        config
    }

    /// Validate every knob that has a hard constraint.
    pub fn validate(&self) -> HermesResult<()> {
        descriptor::check_term_length(self.term_length)?;
        descriptor::check_page_size(self.file_page_size)?;
        if self.mtu_length < hermes_core::logbuffer::frame_descriptor::HEADER_LENGTH * 2
            || self.mtu_length % 32 != 0
        {
            return Err(HermesError::config(format!(
                "mtu length {} must be a multiple of 32 and at least 64",
                self.mtu_length
            )));
        }
        if !self.to_driver_buffer_length.is_power_of_two()
            || !self.to_clients_buffer_length.is_power_of_two()
        {
            return Err(HermesError::config(
                "control buffer lengths must be powers of two".to_string(),
            ));
        }
        if self.publication_reserved_session_id_low > self.publication_reserved_session_id_high {
            return Err(HermesError::config(format!(
                "reserved session id range inverted: [{}, {}]",
                self.publication_reserved_session_id_low,
                self.publication_reserved_session_id_high
            )));
        }
        if let Some(window) = self.ipc_publication_term_window_length {
            if window == 0 || window > self.term_length {
                return Err(HermesError::config(format!(
                    "publication window {} outside (0, term_length]",
                    window
                )));
            }
        }
        Ok(())
    }

    /// Producer window: configured value capped at half the term.
    pub fn producer_window_length(&self, term_length: usize) -> i64 {
        let half_term = term_length / 2;
        self.ipc_publication_term_window_length
            .map_or(half_term, |window| window.min(half_term))
            .max(1) as i64
    }

    /// Region lengths for the cnc file.
    pub fn cnc_layout(&self) -> CncLayout {
        CncLayout {
            to_driver_length: self.to_driver_buffer_length + ring_buffer::TRAILER_LENGTH,
            to_clients_length: self.to_clients_buffer_length + broadcast::TRAILER_LENGTH,
            counters_metadata_length: self.counters_max
                * hermes_core::concurrent::counters::METADATA_LENGTH,
            counters_values_length: self.counters_max
                * hermes_core::concurrent::counters::COUNTER_LENGTH,
            error_log_length: self.error_buffer_length,
        }
    }
}

fn env_usize(name: &str, value: &mut usize) {
    if let Some(parsed) = env_usize_opt(name) {
        *value = parsed;
    }
}

fn env_usize_opt(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|raw| match raw.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            log::warn!("ignoring unparseable {}={}", name, raw);
            None
        }
    })
}

fn env_i64(name: &str, value: &mut i64) {
    if let Ok(raw) = std::env::var(name) {
        match raw.parse() {
            Ok(parsed) => *value = parsed,
            Err(_) => log::warn!("ignoring unparseable {}={}", name, raw),
        }
    }
}

/// Default directory: tmpfs when available so logs are RAM-backed.
pub fn default_hermes_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        let shm = PathBuf::from("/dev/shm");
        if shm.is_dir() {
            return shm.join("hermes");
        }
    }
    std::env::temp_dir().join("hermes")
}

/// Resolved runtime context handed to the conductor.
#[derive(Clone)]
pub struct DriverContext {
    pub config: DriverConfig,
    pub hermes_dir: PathBuf,
    pub nano_clock: NanoClock,
    pub epoch_clock: EpochClock,
    pub cached_nano_clock: Arc<CachedNanoClock>,
    pub cached_epoch_clock: Arc<CachedEpochClock>,
}

impl DriverContext {
    pub fn new(config: DriverConfig) -> HermesResult<Self> {
        Self::with_clocks(config, default_nano_clock(), default_epoch_clock())
    }

    /// Construct with explicit clock hooks (tests drive time by hand).
    pub fn with_clocks(
        config: DriverConfig,
        nano_clock: NanoClock,
        epoch_clock: EpochClock,
    ) -> HermesResult<Self> {
        config.validate()?;
        let hermes_dir = config.dir.clone().unwrap_or_else(default_hermes_dir);

        let context = Self {
            config,
            hermes_dir,
            nano_clock,
            epoch_clock,
            cached_nano_clock: Arc::new(CachedNanoClock::default()),
            cached_epoch_clock: Arc::new(CachedEpochClock::default()),
        };
        context.cached_nano_clock.update((context.nano_clock)());
        context.cached_epoch_clock.update((context.epoch_clock)());
        Ok(context)
    }
}
