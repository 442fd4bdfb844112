//! Shared test utilities used across module tests.
//!
//! [`FakeFleet`] hands out scripted in-memory drivers that record every
//! call, so tests can assert on the exact protocol sequence a component
//! produced.

use crate::device::{
    AttendanceRecord, CapacityCounters, DeviceDriver, DriverFactory, Endpoint, UserRecord,
};
use crate::error::{FleetError, Result};
use crate::store::{DeviceId, DevicePatch, DeviceRecord, MemoryStore, RecordSink};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Build a timestamp on 2024-03-06 (a Wednesday).
pub fn ts(hour: u32, min: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 6)
        .and_then(|d| d.and_hms_opt(hour, min, 0))
        .expect("valid test timestamp")
}

pub fn punch(user_id: &str, at: NaiveDateTime) -> AttendanceRecord {
    AttendanceRecord {
        user_id: user_id.to_owned(),
        timestamp: at,
        status: 1,
        punch_code: 0,
        raw: serde_json::Value::Null,
    }
}

pub fn user(user_id: &str, uid: u32) -> UserRecord {
    UserRecord {
        user_id: user_id.to_owned(),
        uid,
        name: format!("User {user_id}"),
        privilege: 0,
        group_id: String::new(),
        card: String::new(),
        password: String::new(),
    }
}

#[derive(Default)]
struct FakeState {
    attendance: Vec<AttendanceRecord>,
    users: Vec<UserRecord>,
    calls: Vec<&'static str>,
    fail_on: HashSet<&'static str>,
    panic_on: HashSet<&'static str>,
    /// Open connections; drivers share one device.
    connections: u32,
    enabled: bool,
    clock: Option<NaiveDateTime>,
    connect_delay: Duration,
}

/// One scripted terminal. Clones share state.
#[derive(Clone, Default)]
pub struct FakeDevice {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDevice {
    pub fn new() -> Self {
        let device = Self::default();
        device.lock().enabled = true;
        device
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_attendance(self, records: Vec<AttendanceRecord>) -> Self {
        self.lock().attendance = records;
        self
    }

    pub fn with_users(self, users: Vec<UserRecord>) -> Self {
        self.lock().users = users;
        self
    }

    /// Make the named operation fail with a protocol error.
    pub fn fail_on(self, op: &'static str) -> Self {
        self.lock().fail_on.insert(op);
        self
    }

    /// Make the named operation panic, as a driver bug would.
    pub fn panic_on(self, op: &'static str) -> Self {
        self.lock().panic_on.insert(op);
        self
    }

    /// Slow down `connect` to widen race windows.
    pub fn with_connect_delay(self, delay: Duration) -> Self {
        self.lock().connect_delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.lock().calls.iter().filter(|c| **c == op).count()
    }

    pub fn attendance_len(&self) -> usize {
        self.lock().attendance.len()
    }

    pub fn users(&self) -> Vec<UserRecord> {
        self.lock().users.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connections > 0
    }

    pub fn clock(&self) -> Option<NaiveDateTime> {
        self.lock().clock
    }

    /// Simulate the link dropping without a clean disconnect.
    pub fn drop_link(&self) {
        self.lock().connections = 0;
    }
}

struct FakeDriver {
    endpoint: Endpoint,
    device: FakeDevice,
}

impl FakeDriver {
    fn step(&self, op: &'static str) -> Result<std::sync::MutexGuard<'_, FakeState>> {
        let mut state = self.device.lock();
        state.calls.push(op);
        if state.panic_on.contains(op) {
            drop(state);
            panic!("scripted panic in {op}");
        }
        if state.fail_on.contains(op) {
            return Err(FleetError::Protocol {
                endpoint: self.endpoint.clone(),
                message: format!("scripted failure in {op}"),
            });
        }
        Ok(state)
    }
}

impl DeviceDriver for FakeDriver {
    fn connect(&mut self, endpoint: &Endpoint, _password: u32, _timeout: Duration) -> Result<()> {
        let delay = self.device.lock().connect_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let mut state = self.device.lock();
        state.calls.push("connect");
        if state.fail_on.contains("connect") {
            return Err(FleetError::Connection {
                endpoint: endpoint.clone(),
                message: "scripted timeout".to_owned(),
            });
        }
        state.connections += 1;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        let mut state = self.step("disconnect")?;
        state.connections = state.connections.saturating_sub(1);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.device.lock().connections > 0
    }

    fn serial_number(&mut self) -> Result<String> {
        self.step("serial_number").map(|_| "SN-0001".to_owned())
    }

    fn device_name(&mut self) -> Result<String> {
        self.step("device_name").map(|_| "Lobby".to_owned())
    }

    fn firmware_version(&mut self) -> Result<String> {
        self.step("firmware_version").map(|_| "Ver 6.60".to_owned())
    }

    fn platform(&mut self) -> Result<String> {
        self.step("platform").map(|_| "ZEM560".to_owned())
    }

    fn mac(&mut self) -> Result<String> {
        self.step("mac").map(|_| "00:17:61:00:00:01".to_owned())
    }

    fn time(&mut self) -> Result<NaiveDateTime> {
        let state = self.step("time")?;
        Ok(state.clock.unwrap_or_else(|| ts(8, 0)))
    }

    fn set_time(&mut self, time: NaiveDateTime) -> Result<()> {
        let mut state = self.step("set_time")?;
        state.clock = Some(time);
        Ok(())
    }

    fn read_capacity_counters(&mut self) -> Result<CapacityCounters> {
        let state = self.step("read_capacity_counters")?;
        Ok(CapacityCounters {
            users: state.users.len() as u32,
            fingers: 0,
            records: state.attendance.len() as u32,
        })
    }

    fn users(&mut self) -> Result<Vec<UserRecord>> {
        self.step("users").map(|s| s.users.clone())
    }

    fn set_user(&mut self, user: &UserRecord) -> Result<()> {
        let mut state = self.step("set_user")?;
        state.users.retain(|u| u.uid != user.uid);
        state.users.push(user.clone());
        Ok(())
    }

    fn attendance(&mut self) -> Result<Vec<AttendanceRecord>> {
        self.step("attendance").map(|s| s.attendance.clone())
    }

    fn clear_attendance(&mut self) -> Result<()> {
        let mut state = self.step("clear_attendance")?;
        state.attendance.clear();
        Ok(())
    }

    fn enable_device(&mut self) -> Result<()> {
        let mut state = self.step("enable_device")?;
        state.enabled = true;
        Ok(())
    }

    fn disable_device(&mut self) -> Result<()> {
        let mut state = self.step("disable_device")?;
        state.enabled = false;
        Ok(())
    }

    fn restart(&mut self) -> Result<()> {
        let mut state = self.step("restart")?;
        state.connections = 0;
        Ok(())
    }

    fn power_off(&mut self) -> Result<()> {
        let mut state = self.step("power_off")?;
        state.connections = 0;
        Ok(())
    }
}

/// A set of fake terminals keyed by endpoint. Unknown endpoints refuse to
/// connect.
#[derive(Clone, Default)]
pub struct FakeFleet {
    devices: Arc<Mutex<HashMap<Endpoint, FakeDevice>>>,
}

impl FakeFleet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, endpoint: &Endpoint, device: FakeDevice) -> FakeDevice {
        self.devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(endpoint.clone(), device.clone());
        device
    }

    pub fn factory(&self) -> Arc<dyn DriverFactory> {
        Arc::new(self.clone())
    }
}

impl DriverFactory for FakeFleet {
    fn create(&self, endpoint: &Endpoint) -> Box<dyn DeviceDriver> {
        let device = self
            .devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(endpoint)
            .cloned()
            .unwrap_or_else(|| FakeDevice::new().fail_on("connect"));
        Box::new(FakeDriver {
            endpoint: endpoint.clone(),
            device,
        })
    }
}

/// Sink whose persistence calls fail while device bookkeeping still goes to
/// the wrapped store.
pub struct FailingSink<'a> {
    inner: &'a MemoryStore,
}

impl<'a> FailingSink<'a> {
    pub fn wrap(inner: &'a MemoryStore) -> Self {
        Self { inner }
    }
}

impl RecordSink for FailingSink<'_> {
    fn persist_attendance(&self, _endpoint: &Endpoint, _records: &[AttendanceRecord]) -> Result<usize> {
        Err(FleetError::Persistence("disk full".to_owned()))
    }

    fn persist_users(&self, _users: &[UserRecord]) -> Result<usize> {
        Err(FleetError::Persistence("disk full".to_owned()))
    }

    fn list_devices(&self) -> Result<Vec<DeviceRecord>> {
        self.inner.list_devices()
    }

    fn get_device(&self, id: DeviceId) -> Result<Option<DeviceRecord>> {
        self.inner.get_device(id)
    }

    fn update_device(&self, id: DeviceId, patch: DevicePatch) -> Result<bool> {
        self.inner.update_device(id, patch)
    }
}

/// Sink that is entirely unreachable.
pub struct DownSink;

impl RecordSink for DownSink {
    fn persist_attendance(&self, _endpoint: &Endpoint, _records: &[AttendanceRecord]) -> Result<usize> {
        Err(FleetError::Persistence("store offline".to_owned()))
    }

    fn persist_users(&self, _users: &[UserRecord]) -> Result<usize> {
        Err(FleetError::Persistence("store offline".to_owned()))
    }

    fn list_devices(&self) -> Result<Vec<DeviceRecord>> {
        Err(FleetError::Persistence("store offline".to_owned()))
    }

    fn get_device(&self, _id: DeviceId) -> Result<Option<DeviceRecord>> {
        Err(FleetError::Persistence("store offline".to_owned()))
    }

    fn update_device(&self, _id: DeviceId, _patch: DevicePatch) -> Result<bool> {
        Err(FleetError::Persistence("store offline".to_owned()))
    }
}
