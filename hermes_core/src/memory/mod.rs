//! Memory-mapped files: raw mappings, the log file layout and the
//! command-and-control file.

pub mod cnc_file;
pub mod log_buffers;
pub mod mapped_file;

pub use cnc_file::{CncFile, CncLayout};
pub use log_buffers::{publication_log_path, LogBuffers};
pub use mapped_file::{usable_fs_space, MappedFile};
