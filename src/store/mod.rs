//! Persistence collaborator.
//!
//! The core never decides how records are stored. Downloads hand their
//! results to a [`RecordSink`] and only advance sync cursors after it
//! reports success.

pub mod memory;

use crate::device::{AttendanceRecord, Endpoint, UserRecord};
use crate::error::Result;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub use memory::MemoryStore;

/// Row id of a registered terminal.
pub type DeviceId = u64;

/// A registered terminal as the rest of the application sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub name: String,
    pub endpoint: Endpoint,
    /// Numeric comm key; 0 when the terminal has none.
    #[serde(default)]
    pub password: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub serial_number: String,
    #[serde(default)]
    pub last_download: Option<NaiveDateTime>,
    #[serde(default)]
    pub last_sync: Option<NaiveDateTime>,
    #[serde(default)]
    pub last_error: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl DeviceRecord {
    pub fn new(id: DeviceId, name: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            id,
            name: name.into(),
            endpoint,
            password: 0,
            enabled: true,
            zone: String::new(),
            serial_number: String::new(),
            last_download: None,
            last_sync: None,
            last_error: None,
        }
    }
}

/// Partial update of a [`DeviceRecord`]. `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DevicePatch {
    pub last_download: Option<NaiveDateTime>,
    pub last_sync: Option<NaiveDateTime>,
    /// `Some(None)` clears the stored error.
    pub last_error: Option<Option<String>>,
    pub serial_number: Option<String>,
    pub enabled: Option<bool>,
}

impl DevicePatch {
    pub fn downloaded_at(at: NaiveDateTime) -> Self {
        Self {
            last_download: Some(at),
            last_error: Some(None),
            ..Self::default()
        }
    }

    pub fn synced_at(at: NaiveDateTime) -> Self {
        Self {
            last_sync: Some(at),
            last_error: Some(None),
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            last_error: Some(Some(message.into())),
            ..Self::default()
        }
    }

    pub fn apply(self, record: &mut DeviceRecord) {
        if let Some(at) = self.last_download {
            record.last_download = Some(at);
        }
        if let Some(at) = self.last_sync {
            record.last_sync = Some(at);
        }
        if let Some(error) = self.last_error {
            record.last_error = error;
        }
        if let Some(serial) = self.serial_number {
            record.serial_number = serial;
        }
        if let Some(enabled) = self.enabled {
            record.enabled = enabled;
        }
    }
}

/// Where downloaded records go, and where terminals are registered.
///
/// Implementations are called from blocking workers and must be
/// thread-safe.
pub trait RecordSink: Send + Sync {
    /// Store attendance fetched from `endpoint`. Returns the number stored.
    fn persist_attendance(&self, endpoint: &Endpoint, records: &[AttendanceRecord]) -> Result<usize>;

    /// Insert or update users by `user_id`. Returns the number written.
    fn persist_users(&self, users: &[UserRecord]) -> Result<usize>;

    fn list_devices(&self) -> Result<Vec<DeviceRecord>>;

    fn get_device(&self, id: DeviceId) -> Result<Option<DeviceRecord>>;

    /// Apply `patch` to the device; unknown ids are a no-op returning `false`.
    fn update_device(&self, id: DeviceId, patch: DevicePatch) -> Result<bool>;

    /// Registered device for `endpoint`, if any.
    fn find_device(&self, endpoint: &Endpoint) -> Result<Option<DeviceRecord>> {
        Ok(self
            .list_devices()?
            .into_iter()
            .find(|d| &d.endpoint == endpoint))
    }

    /// Devices the scheduler should visit.
    fn enabled_devices(&self) -> Result<Vec<DeviceRecord>> {
        Ok(self
            .list_devices()?
            .into_iter()
            .filter(|d| d.enabled)
            .collect())
    }
}
