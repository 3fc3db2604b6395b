//! Memory-mapped files backing logs, counters and the command channel.
//!
//! Files live under the hermes directory (on Linux typically a tmpfs path
//! so the "file" is RAM). The creator owns the file and unlinks it on
//! drop; openers map the existing bytes and leave the file alone.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};

use crate::concurrent::atomic_buffer::AtomicBuffer;
use crate::error::{HermesError, HermesResult};

/// A mapped file plus its ownership flag.
#[derive(Debug)]
pub struct MappedFile {
    mmap: MmapMut,
    _file: File,
    path: PathBuf,
    owner: bool,
}

impl MappedFile {
    /// Create a new file of `size` bytes, zero-filled, and map it.
    /// Fails if the file already exists.
    pub fn create(path: &Path, size: usize) -> HermesResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.set_len(size as u64)?;

        // SAFETY: file is a valid open file with its length set above;
        // len(size) matches the file size.
        let mut mmap = unsafe { MmapOptions::new().len(size).map_mut(&file)? };
        mmap.fill(0);

        Ok(Self {
            mmap,
            _file: file,
            path: path.to_path_buf(),
            owner: true,
        })
    }

    /// Map an existing file read-write without taking ownership.
    pub fn open(path: &Path) -> HermesResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let size = file.metadata()?.len() as usize;
        if size == 0 {
            return Err(HermesError::memory(format!(
                "file is empty: {}",
                path.display()
            )));
        }

        // SAFETY: file is a valid open file; len(size) matches its size.
        let mmap = unsafe { MmapOptions::new().len(size).map_mut(&file)? };

        Ok(Self {
            mmap,
            _file: file,
            path: path.to_path_buf(),
            owner: false,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.len() == 0
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// View over the whole mapping.
    pub fn atomic_buffer(&self) -> AtomicBuffer {
        // SAFETY: the mapping is page-aligned, valid for its whole length,
        // and outlives the view as long as this MappedFile is alive; the
        // owners of MappedFile (LogBuffers, CncFile) keep it alive for as
        // long as views circulate.
        unsafe { AtomicBuffer::new(self.mmap.as_ptr() as *mut u8, self.mmap.len()) }
    }

    /// View over a sub-range of the mapping.
    pub fn atomic_buffer_slice(&self, offset: usize, length: usize) -> HermesResult<AtomicBuffer> {
        self.atomic_buffer().view(offset, length)
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        if self.owner && self.path.exists() {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Usable filesystem space at `path` in bytes.
///
/// Used to reject new logs with a storage error before mapping would fail
/// half way through.
#[cfg(unix)]
pub fn usable_fs_space(path: &Path) -> u64 {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return 0;
    };

    // SAFETY: c_path is a valid null-terminated CString and statvfs is
    // given a zeroed out-parameter to fill.
    unsafe {
        let mut stat: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
            return 0;
        }
        stat.f_bavail as u64 * stat.f_bsize as u64
    }
}

#[cfg(not(unix))]
pub fn usable_fs_space(_path: &Path) -> u64 {
    u64::MAX
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_path(prefix: &str) -> PathBuf {
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
    fn create_map_and_cleanup() {
        let path = unique_path("create");
        {
            let mapped = MappedFile::create(&path, 8192).unwrap();
            assert_eq!(mapped.len(), 8192);
            let buffer = mapped.atomic_buffer();
            buffer.put_i64(0, 77);
            assert_eq!(buffer.get_i64(0), 77);
            assert!(path.exists());
        }
        assert!(!path.exists(), "owner removes the file on drop");
    }

    #[test]
    fn open_sees_creator_writes_and_preserves_file() {
        let path = unique_path("open");
        let created = MappedFile::create(&path, 4096).unwrap();
        created.atomic_buffer().put_i64_ordered(64, 123);

        {
            let opened = MappedFile::open(&path).unwrap();
            assert_eq!(opened.atomic_buffer().get_i64_volatile(64), 123);
        }
        assert!(path.exists(), "non-owner leaves the file in place");
        drop(created);
        assert!(!path.exists());
    }

    #[test]
    fn create_rejects_existing_file() {
        let path = unique_path("exists");
        let _first = MappedFile::create(&path, 4096).unwrap();
        assert!(MappedFile::create(&path, 4096).is_err());
    }

    #[test]
    fn fs_space_probe_reports_something() {
        let space = usable_fs_space(&std::env::temp_dir());
        assert!(space > 0);
    }
}
