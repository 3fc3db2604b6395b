//! # HERMES Core
//!
//! The core of the HERMES shared-memory publish/subscribe transport.
//!
//! Publishers append framed fragments of application messages into a
//! memory-mapped log of three rotating term partitions; subscribers poll
//! the same mapping directly. The driver (see `hermes_driver`) owns every
//! lifecycle but stays off the data path entirely.
//!
//! This crate provides the building blocks:
//!
//! - **logbuffer**: frame layout, position algebra, the single-writer
//!   claim/commit protocol, reader scan and unblock recovery
//! - **concurrent**: atomic buffer views, counters, the many-to-one
//!   command ring, the response broadcast, clocks, the distinct error log
//! - **memory**: mapped files, the log file layout, the cnc file
//! - **command**: the fixed-layout control protocol
//! - **publication / image**: the client-side producer and consumer
//!   engines
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use hermes_core::{Image, Publication};
//!
//! fn pump(publication: &Publication, image: &mut Image) {
//!     let _ = publication.offer(b"hello hermes");
//!     image.poll(&mut |body, _header| println!("{}", body.len()), 10);
//! }
//! ```

pub mod agent;
pub mod command;
pub mod concurrent;
pub mod error;
pub mod fragment_assembler;
pub mod image;
pub mod logbuffer;
pub mod memory;
pub mod publication;
pub mod types;
pub mod util;

// Re-export commonly used types for easy access
pub use agent::{Agent, AgentRunner, IdleStrategy, Idler};
pub use concurrent::{
    AtomicBuffer, BroadcastReceiver, BroadcastTransmitter, CachedEpochClock, CachedNanoClock,
    CopyBroadcastReceiver, CountersManager, CountersReader, DistinctErrorLog, EpochClock,
    ErrorLogReader, NanoClock, Position, RingBuffer,
};
pub use error::{HermesError, HermesResult};
pub use fragment_assembler::FragmentAssembler;
pub use image::Image;
pub use logbuffer::{BufferClaim, Header};
pub use memory::{CncFile, CncLayout, LogBuffers};
pub use publication::{OfferError, Publication};
pub use types::FixedString;

// Re-export bytemuck for consistent Pod trait usage by downstream crates
pub use bytemuck;
