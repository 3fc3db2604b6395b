//! The command-and-control file (`cnc.dat`).
//!
//! One mapping shared by the driver and every client, carrying the
//! control-plane buffers:
//!
//! 1. to-driver command ring (clients -> conductor)
//! 2. to-clients broadcast (conductor -> clients)
//! 3. counters metadata
//! 4. counters values
//! 5. distinct error log
//!
//! A versioned header records each region's length. The version field is
//! written last with Release ordering, so a client that observes it sees
//! a fully initialised file; zero means the driver is still setting up.

use std::path::{Path, PathBuf};

use crate::concurrent::atomic_buffer::AtomicBuffer;
use crate::error::{HermesError, HermesResult};
use crate::memory::mapped_file::MappedFile;
use crate::util::{align, CACHE_LINE_LENGTH};

/// Current layout version.
pub const CNC_VERSION: i32 = 1;

/// File name under the hermes directory.
pub const CNC_FILE_NAME: &str = "cnc.dat";

const VERSION_OFFSET: usize = 0;
const TO_DRIVER_LENGTH_OFFSET: usize = 4;
const TO_CLIENTS_LENGTH_OFFSET: usize = 8;
const COUNTERS_METADATA_LENGTH_OFFSET: usize = 12;
const COUNTERS_VALUES_LENGTH_OFFSET: usize = 16;
const ERROR_LOG_LENGTH_OFFSET: usize = 20;
const CLIENT_LIVENESS_TIMEOUT_OFFSET: usize = 24;
const START_TIMESTAMP_OFFSET: usize = 32;
const PID_OFFSET: usize = 40;

/// Header length (one cache line).
pub const CNC_HEADER_LENGTH: usize = CACHE_LINE_LENGTH;

/// Region lengths used to create a cnc file.
#[derive(Debug, Clone, Copy)]
pub struct CncLayout {
    pub to_driver_length: usize,
    pub to_clients_length: usize,
    pub counters_metadata_length: usize,
    pub counters_values_length: usize,
    pub error_log_length: usize,
}

impl CncLayout {
    fn total_length(&self) -> usize {
        CNC_HEADER_LENGTH
            + align(self.to_driver_length, CACHE_LINE_LENGTH)
            + align(self.to_clients_length, CACHE_LINE_LENGTH)
            + align(self.counters_metadata_length, CACHE_LINE_LENGTH)
            + align(self.counters_values_length, CACHE_LINE_LENGTH)
            + align(self.error_log_length, CACHE_LINE_LENGTH)
    }
}

pub fn cnc_path(hermes_dir: &Path) -> PathBuf {
    hermes_dir.join(CNC_FILE_NAME)
}

/// The mapped cnc file.
#[derive(Debug)]
pub struct CncFile {
    mapped: MappedFile,
    layout: CncLayout,
}

impl CncFile {
    /// Create and initialise the file (driver side).
    pub fn create(
        path: &Path,
        layout: CncLayout,
        client_liveness_timeout_ns: i64,
        start_timestamp_ms: i64,
    ) -> HermesResult<Self> {
        let mapped = MappedFile::create(path, layout.total_length())?;
        let buffer = mapped.atomic_buffer();

        buffer.put_i32(TO_DRIVER_LENGTH_OFFSET, layout.to_driver_length as i32);
        buffer.put_i32(TO_CLIENTS_LENGTH_OFFSET, layout.to_clients_length as i32);
        buffer.put_i32(
            COUNTERS_METADATA_LENGTH_OFFSET,
            layout.counters_metadata_length as i32,
        );
        buffer.put_i32(
            COUNTERS_VALUES_LENGTH_OFFSET,
            layout.counters_values_length as i32,
        );
        buffer.put_i32(ERROR_LOG_LENGTH_OFFSET, layout.error_log_length as i32);
        buffer.put_i64(CLIENT_LIVENESS_TIMEOUT_OFFSET, client_liveness_timeout_ns);
        buffer.put_i64(START_TIMESTAMP_OFFSET, start_timestamp_ms);
        buffer.put_i64(PID_OFFSET, std::process::id() as i64);

        // Version last: observers of CNC_VERSION see a complete header.
        buffer.put_i32_ordered(VERSION_OFFSET, CNC_VERSION);

        Ok(Self { mapped, layout })
    }

    /// Map an existing file (client side).
    pub fn map_existing(path: &Path) -> HermesResult<Self> {
        let mapped = MappedFile::open(path)?;
        if mapped.len() < CNC_HEADER_LENGTH {
            return Err(HermesError::memory(format!(
                "cnc file too small: {}",
                path.display()
            )));
        }
        let buffer = mapped.atomic_buffer();

        let version = buffer.get_i32_volatile(VERSION_OFFSET);
        if version != CNC_VERSION {
            return Err(HermesError::memory(format!(
                "cnc version mismatch: found {} expected {} (driver still starting or incompatible)",
                version, CNC_VERSION
            )));
        }

        let layout = CncLayout {
            to_driver_length: buffer.get_i32(TO_DRIVER_LENGTH_OFFSET) as usize,
            to_clients_length: buffer.get_i32(TO_CLIENTS_LENGTH_OFFSET) as usize,
            counters_metadata_length: buffer.get_i32(COUNTERS_METADATA_LENGTH_OFFSET) as usize,
            counters_values_length: buffer.get_i32(COUNTERS_VALUES_LENGTH_OFFSET) as usize,
            error_log_length: buffer.get_i32(ERROR_LOG_LENGTH_OFFSET) as usize,
        };
        if layout.total_length() > mapped.len() {
            return Err(HermesError::memory(format!(
                "cnc file {} shorter than its recorded layout",
                path.display()
            )));
        }

        Ok(Self { mapped, layout })
    }

    pub fn client_liveness_timeout_ns(&self) -> i64 {
        self.mapped
            .atomic_buffer()
            .get_i64(CLIENT_LIVENESS_TIMEOUT_OFFSET)
    }

    pub fn driver_pid(&self) -> i64 {
        self.mapped.atomic_buffer().get_i64(PID_OFFSET)
    }

    pub fn to_driver_buffer(&self) -> AtomicBuffer {
        self.region(0)
    }

    pub fn to_clients_buffer(&self) -> AtomicBuffer {
        self.region(1)
    }

    pub fn counters_metadata_buffer(&self) -> AtomicBuffer {
        self.region(2)
    }

    pub fn counters_values_buffer(&self) -> AtomicBuffer {
        self.region(3)
    }

    pub fn error_log_buffer(&self) -> AtomicBuffer {
        self.region(4)
    }

    fn region(&self, index: usize) -> AtomicBuffer {
        let lengths = [
            self.layout.to_driver_length,
            self.layout.to_clients_length,
            self.layout.counters_metadata_length,
            self.layout.counters_values_length,
            self.layout.error_log_length,
        ];
        let mut offset = CNC_HEADER_LENGTH;
        for length in &lengths[..index] {
            offset += align(*length, CACHE_LINE_LENGTH);
        }
        self.mapped
            .atomic_buffer_slice(offset, lengths[index])
            .expect("region within mapping")
    }
}
