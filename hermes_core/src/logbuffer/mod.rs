//! The log-buffer protocol: term partitions, frame layout, position
//! algebra, the producer claim/commit discipline, the consumer scan and
//! the unblocker.

pub mod buffer_claim;
pub mod descriptor;
pub mod frame_descriptor;
pub mod header;
pub mod term_appender;
pub mod term_reader;
pub mod term_unblocker;

pub use buffer_claim::BufferClaim;
pub use header::Header;
pub use term_appender::{AppendOutcome, ClaimOutcome, TermAppender};
pub use term_unblocker::{unblock_log, UnblockStatus};
