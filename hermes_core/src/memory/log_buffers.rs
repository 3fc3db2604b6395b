//! The mapped log file: three term partitions plus the metadata page.
//!
//! Layout: `[term 0][term 1][term 2][reserved page(s), last 4 KiB = metadata]`.
//! The metadata section sits in the final `LOG_META_DATA_LENGTH` bytes so
//! a mapper can locate it from the file length alone, read the term
//! length out of it, and derive the partition layout.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::concurrent::atomic_buffer::AtomicBuffer;
use crate::error::{HermesError, HermesResult};
use crate::logbuffer::descriptor::{
    self, LOG_META_DATA_LENGTH, PARTITION_COUNT,
};
use crate::memory::mapped_file::{usable_fs_space, MappedFile};

/// File name of a publication log under `<hermes_dir>/publications/`.
pub fn publication_log_path(hermes_dir: &Path, correlation_id: i64) -> PathBuf {
    hermes_dir
        .join("publications")
        .join(format!("{}.logbuffer", correlation_id))
}

/// A mapped log and its partition views.
#[derive(Debug)]
pub struct LogBuffers {
    mapped: MappedFile,
    term_length: usize,
}

impl LogBuffers {
    /// Create a fresh log file. The metadata is left zeroed; the driver
    /// initialises it via [`descriptor::initialize_log_metadata`].
    pub fn create(path: &Path, term_length: usize, page_size: usize) -> HermesResult<Arc<Self>> {
        descriptor::check_term_length(term_length)?;
        descriptor::check_page_size(page_size)?;
        if page_size > term_length {
            return Err(HermesError::config(format!(
                "page size {} exceeds term length {}",
                page_size, term_length
            )));
        }

        let log_length = descriptor::compute_log_length(term_length, page_size);
        let dir = path.parent().unwrap_or(Path::new("."));
        if dir.exists() {
            let available = usable_fs_space(dir);
            if available < log_length as u64 {
                return Err(HermesError::storage(format!(
                    "insufficient usable storage for new log of length={} in {} (available={})",
                    log_length,
                    dir.display(),
                    available
                )));
            }
        }

        let mapped = MappedFile::create(path, log_length)?;
        Ok(Arc::new(Self {
            mapped,
            term_length,
        }))
    }

    /// Map an existing log created by the driver.
    pub fn map_existing(path: &Path) -> HermesResult<Arc<Self>> {
        let mapped = MappedFile::open(path)?;
        if mapped.len() <= LOG_META_DATA_LENGTH {
            return Err(HermesError::memory(format!(
                "log file too small: {} ({} bytes)",
                path.display(),
                mapped.len()
            )));
        }

        let meta = mapped
            .atomic_buffer_slice(mapped.len() - LOG_META_DATA_LENGTH, LOG_META_DATA_LENGTH)?;
        let term_length = descriptor::term_length(&meta);
        descriptor::check_term_length(term_length)?;
        if PARTITION_COUNT * term_length > mapped.len() {
            return Err(HermesError::memory(format!(
                "log file {} inconsistent: term length {} does not fit file of {} bytes",
                path.display(),
                term_length,
                mapped.len()
            )));
        }

        Ok(Arc::new(Self {
            mapped,
            term_length,
        }))
    }

    #[inline]
    pub fn term_length(&self) -> usize {
        self.term_length
    }

    #[inline]
    pub fn file_name(&self) -> String {
        self.mapped.path().display().to_string()
    }

    /// View over one term partition.
    pub fn term_buffer(&self, index: usize) -> AtomicBuffer {
        debug_assert!(index < PARTITION_COUNT);
        self.mapped
            .atomic_buffer_slice(index * self.term_length, self.term_length)
            .expect("partition within mapping")
    }

    /// All three term partitions.
    pub fn term_buffers(&self) -> [AtomicBuffer; PARTITION_COUNT] {
        [
            self.term_buffer(0),
            self.term_buffer(1),
            self.term_buffer(2),
        ]
    }

    /// View over the metadata section.
    pub fn meta_buffer(&self) -> AtomicBuffer {
        self.mapped
            .atomic_buffer_slice(
                self.mapped.len() - LOG_META_DATA_LENGTH,
                LOG_META_DATA_LENGTH,
            )
            .expect("metadata within mapping")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logbuffer::descriptor::{PAGE_MIN_SIZE, TERM_MIN_LENGTH};

    fn unique_dir(prefix: &str) -> PathBuf {
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

    #[test]
    fn create_initialise_and_remap() {
        let dir = unique_dir("log");
        let path = publication_log_path(&dir, 42);

        let log = LogBuffers::create(&path, TERM_MIN_LENGTH, PAGE_MIN_SIZE).unwrap();
        let meta = log.meta_buffer();
        descriptor::initialize_log_metadata(
            &meta,
            3,
            TERM_MIN_LENGTH,
            PAGE_MIN_SIZE,
            4096,
            42,
            7,
            11,
        );

        let remapped = LogBuffers::map_existing(&path).unwrap();
        assert_eq!(remapped.term_length(), TERM_MIN_LENGTH);
        let remeta = remapped.meta_buffer();
        assert_eq!(descriptor::initial_term_id(&remeta), 3);
        assert_eq!(descriptor::correlation_id(&remeta), 42);

        // Writes through one mapping are visible through the other.
        log.term_buffer(0).put_i32_ordered(0, 99);
        assert_eq!(remapped.term_buffer(0).get_i32_volatile(0), 99);

        drop(remapped);
        drop(log);
        assert!(!path.exists(), "creator unlinks the log");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn rejects_bad_term_length() {
        let dir = unique_dir("badterm");
        let path = publication_log_path(&dir, 1);
        assert!(LogBuffers::create(&path, 1000, PAGE_MIN_SIZE).is_err());
        assert!(LogBuffers::create(&path, 1024, PAGE_MIN_SIZE).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
