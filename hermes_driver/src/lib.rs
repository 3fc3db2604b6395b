//! # HERMES Media Driver
//!
//! The control plane of the HERMES transport: a single-threaded
//! conductor that owns every publication, subscription link, counter and
//! client. Clients talk to it over a shared-memory command ring; it
//! answers over a broadcast; the data path (offer/poll against the
//! mapped logs) never enters the driver.
//!
//! ```rust,no_run
//! use hermes_driver::{DriverConfig, DriverContext, MediaDriver};
//!
//! let context = DriverContext::new(DriverConfig::from_env()).unwrap();
//! let mut driver = MediaDriver::launch(context).unwrap();
//! // ... clients map <dir>/cnc.dat and go ...
//! driver.shutdown();
//! ```

pub mod client;
pub mod conductor;
pub mod context;
pub mod ipc_publication;
pub mod media_driver;
pub mod proxy;
pub mod subscription;
pub mod system_counters;

pub use conductor::DriverConductor;
pub use context::{default_hermes_dir, DriverConfig, DriverContext};
pub use ipc_publication::{IpcPublication, PublicationState, TetherState};
pub use media_driver::MediaDriver;
pub use system_counters::{SystemCounterDescriptor, SystemCounters};
