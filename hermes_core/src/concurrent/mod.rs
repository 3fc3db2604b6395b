//! Concurrent primitives shared by the driver and clients.
//!
//! Everything here operates over [`AtomicBuffer`] views of memory-mapped
//! files; synchronisation is release/acquire publication plus CAS claim
//! protocols, never locks.

pub mod atomic_buffer;
pub mod broadcast;
pub mod clock;
pub mod counters;
pub mod errors;
pub mod ring_buffer;

pub use atomic_buffer::AtomicBuffer;
pub use broadcast::{BroadcastReceiver, BroadcastTransmitter, CopyBroadcastReceiver};
pub use clock::{CachedEpochClock, CachedNanoClock, EpochClock, NanoClock};
pub use counters::{CountersManager, CountersReader, Position};
pub use errors::{DistinctErrorLog, ErrorLogReader};
pub use ring_buffer::RingBuffer;
