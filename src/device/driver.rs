//! Device driver capability consumed by the core.
//!
//! The wire protocol lives outside this crate. Anything that can speak to a
//! terminal plugs in by implementing [`DeviceDriver`] and handing the
//! [`SessionRegistry`](crate::session::SessionRegistry) a [`DriverFactory`].
//!
//! All methods block. Callers run them on the
//! [`TaskExecutor`](crate::executor::TaskExecutor), never on an async
//! reactor thread.

use crate::device::types::{AttendanceRecord, CapacityCounters, Endpoint, UserRecord};
use crate::error::Result;
use chrono::NaiveDateTime;
use std::time::Duration;

/// Blocking protocol connection to one terminal.
///
/// Implementations report network failures as
/// [`FleetError::Connection`](crate::FleetError::Connection) and rejected or
/// malformed replies as [`FleetError::Protocol`](crate::FleetError::Protocol).
pub trait DeviceDriver: Send {
    /// Open and authenticate the connection.
    fn connect(&mut self, endpoint: &Endpoint, password: u32, timeout: Duration) -> Result<()>;

    /// Close the connection.
    fn disconnect(&mut self) -> Result<()>;

    /// Whether the underlying connection still answers.
    fn is_alive(&self) -> bool;

    fn serial_number(&mut self) -> Result<String>;
    fn device_name(&mut self) -> Result<String>;
    fn firmware_version(&mut self) -> Result<String>;
    fn platform(&mut self) -> Result<String>;
    fn mac(&mut self) -> Result<String>;

    /// Read the terminal clock.
    fn time(&mut self) -> Result<NaiveDateTime>;

    /// Set the terminal clock.
    fn set_time(&mut self, time: NaiveDateTime) -> Result<()>;

    fn read_capacity_counters(&mut self) -> Result<CapacityCounters>;

    /// Full enrolled user list.
    fn users(&mut self) -> Result<Vec<UserRecord>>;

    /// Create or overwrite the user in slot `user.uid`.
    fn set_user(&mut self, user: &UserRecord) -> Result<()>;

    /// Full on-board attendance log, in whatever order the terminal sends it.
    fn attendance(&mut self) -> Result<Vec<AttendanceRecord>>;

    /// Wipe the on-board attendance log.
    fn clear_attendance(&mut self) -> Result<()>;

    /// Leave maintenance mode; the keypad and sensors accept punches again.
    fn enable_device(&mut self) -> Result<()>;

    /// Enter maintenance mode; no new punches are recorded.
    fn disable_device(&mut self) -> Result<()>;

    fn restart(&mut self) -> Result<()>;
    fn power_off(&mut self) -> Result<()>;
}

/// Creates unconnected drivers for endpoints.
pub trait DriverFactory: Send + Sync {
    fn create(&self, endpoint: &Endpoint) -> Box<dyn DeviceDriver>;
}

impl<F> DriverFactory for F
where
    F: Fn(&Endpoint) -> Box<dyn DeviceDriver> + Send + Sync,
{
    fn create(&self, endpoint: &Endpoint) -> Box<dyn DeviceDriver> {
        self(endpoint)
    }
}
