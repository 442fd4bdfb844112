//! Terminal-facing types, the driver capability, and operator commands.

pub mod commands;
pub mod driver;
pub mod types;

pub use commands::{DeviceAction, DeviceCommands};
pub use driver::{DeviceDriver, DriverFactory};
pub use types::{
    AttendanceRecord, CapacityCounters, DEFAULT_DEVICE_PORT, DeviceInfo, Endpoint,
    PRIVILEGE_ADMIN, PRIVILEGE_DEFAULT, UserRecord,
};
