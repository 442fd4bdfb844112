//! zkfleet: session, download and scheduling core for fleets of networked
//! biometric attendance terminals.
//!
//! # Architecture
//!
//! - **Sessions**: [`session::SessionRegistry`] owns at most one open
//!   connection per terminal endpoint
//! - **Executor**: [`executor::TaskExecutor`] runs blocking device work on a
//!   bounded pool of workers and reports progress over channels
//! - **Pipeline**: [`pipeline::DownloadPipeline`] drives
//!   connect → disable → fetch → purge → enable → disconnect with a
//!   guaranteed enable/disconnect epilogue
//! - **Sync**: [`sync`] computes incremental deltas and persists per-endpoint
//!   cursors only after the caller commits
//! - **Schedule**: [`schedule::ScheduleEngine`] fires daily downloads on
//!   selected weekdays
//!
//! Device protocol and record storage are collaborators behind the
//! [`device::DeviceDriver`] and [`store::RecordSink`] traits.

pub mod config;
pub mod device;
pub mod error;
pub mod executor;
pub mod fleet_dirs;
pub mod logging;
pub mod pipeline;
pub mod schedule;
pub mod session;
pub mod store;
pub mod sync;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::FleetConfig;
pub use device::{DeviceDriver, DriverFactory, Endpoint};
pub use error::{FleetError, Result};
pub use executor::{TaskEvent, TaskExecutor, TaskHandle};
pub use pipeline::{DownloadPipeline, DownloadService, Stage};
pub use schedule::{ScheduleConfig, ScheduleEngine, ScheduleHandle};
pub use session::SessionRegistry;
pub use store::{DeviceRecord, MemoryStore, RecordSink};
pub use sync::SyncCursorStore;
