//! In-process [`RecordSink`].

use crate::device::{AttendanceRecord, Endpoint, UserRecord};
use crate::error::{FleetError, Result};
use crate::store::{DeviceId, DevicePatch, DeviceRecord, RecordSink};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct MemoryState {
    next_id: DeviceId,
    devices: BTreeMap<DeviceId, DeviceRecord>,
    attendance: Vec<(Endpoint, AttendanceRecord)>,
    users: BTreeMap<String, UserRecord>,
}

/// Keeps everything in memory behind one mutex.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|e| FleetError::Persistence(format!("store lock poisoned: {e}")))
    }

    /// Register a terminal and return its record.
    pub fn add_device(&self, name: &str, endpoint: Endpoint) -> Result<DeviceRecord> {
        let mut state = self.lock()?;
        state.next_id += 1;
        let record = DeviceRecord::new(state.next_id, name, endpoint);
        state.devices.insert(record.id, record.clone());
        Ok(record)
    }

    /// Replace or insert a full device record.
    pub fn put_device(&self, record: DeviceRecord) -> Result<()> {
        let mut state = self.lock()?;
        state.next_id = state.next_id.max(record.id);
        state.devices.insert(record.id, record);
        Ok(())
    }

    /// Attendance stored for `endpoint`, in insertion order.
    pub fn attendance(&self, endpoint: &Endpoint) -> Result<Vec<AttendanceRecord>> {
        Ok(self
            .lock()?
            .attendance
            .iter()
            .filter(|(e, _)| e == endpoint)
            .map(|(_, r)| r.clone())
            .collect())
    }

    /// All stored users, ordered by `user_id`.
    pub fn users(&self) -> Result<Vec<UserRecord>> {
        Ok(self.lock()?.users.values().cloned().collect())
    }
}

impl RecordSink for MemoryStore {
    fn persist_attendance(&self, endpoint: &Endpoint, records: &[AttendanceRecord]) -> Result<usize> {
        let mut state = self.lock()?;
        state
            .attendance
            .extend(records.iter().map(|r| (endpoint.clone(), r.clone())));
        Ok(records.len())
    }

    fn persist_users(&self, users: &[UserRecord]) -> Result<usize> {
        let mut state = self.lock()?;
        for user in users {
            state.users.insert(user.user_id.clone(), user.clone());
        }
        Ok(users.len())
    }

    fn list_devices(&self) -> Result<Vec<DeviceRecord>> {
        Ok(self.lock()?.devices.values().cloned().collect())
    }

    fn get_device(&self, id: DeviceId) -> Result<Option<DeviceRecord>> {
        Ok(self.lock()?.devices.get(&id).cloned())
    }

    fn update_device(&self, id: DeviceId, patch: DevicePatch) -> Result<bool> {
        let mut state = self.lock()?;
        match state.devices.get_mut(&id) {
            Some(record) => {
                patch.apply(record);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
