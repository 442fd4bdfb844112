//! Shared helpers for integration tests.

use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use zkfleet::device::{AttendanceRecord, CapacityCounters, UserRecord};
use zkfleet::executor::TaskExecutor;
use zkfleet::pipeline::{DownloadPipeline, DownloadService};
use zkfleet::store::MemoryStore;
use zkfleet::sync::SyncCursorStore;
use zkfleet::{DeviceDriver, DriverFactory, Endpoint, FleetError, SessionRegistry};

/// Timestamp on 2024-03-06 (a Wednesday).
pub(crate) fn at(hour: u32, min: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 6)
        .and_then(|d| d.and_hms_opt(hour, min, 0))
        .expect("valid timestamp")
}

pub(crate) fn punch(user_id: &str, ts: NaiveDateTime) -> AttendanceRecord {
    AttendanceRecord {
        user_id: user_id.to_owned(),
        timestamp: ts,
        status: 0,
        punch_code: 1,
        raw: serde_json::json!({ "user_id": user_id }),
    }
}

pub(crate) fn enrolled(user_id: &str, uid: u32) -> UserRecord {
    UserRecord {
        user_id: user_id.to_owned(),
        uid,
        name: format!("Employee {user_id}"),
        privilege: 0,
        group_id: String::new(),
        card: "0".to_owned(),
        password: String::new(),
    }
}

/// Shared state of one simulated terminal.
#[derive(Default)]
pub(crate) struct TerminalState {
    pub attendance: Vec<AttendanceRecord>,
    pub users: Vec<UserRecord>,
    pub log: Vec<String>,
    pub failing: Vec<&'static str>,
    pub open: u32,
    pub disabled: bool,
}

/// A simulated terminal. Clones share state.
#[derive(Clone, Default)]
pub(crate) struct Terminal(Arc<Mutex<TerminalState>>);

impl Terminal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, TerminalState> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn with_attendance(self, records: Vec<AttendanceRecord>) -> Self {
        self.state().attendance = records;
        self
    }

    pub(crate) fn with_users(self, users: Vec<UserRecord>) -> Self {
        self.state().users = users;
        self
    }

    pub(crate) fn failing(self, op: &'static str) -> Self {
        self.state().failing.push(op);
        self
    }

    pub(crate) fn log(&self) -> Vec<String> {
        self.state().log.clone()
    }
}

struct TerminalDriver {
    endpoint: Endpoint,
    terminal: Terminal,
}

impl TerminalDriver {
    fn op(&self, name: &'static str) -> zkfleet::Result<MutexGuard<'_, TerminalState>> {
        let mut state = self.terminal.state();
        state.log.push(name.to_owned());
        if state.failing.contains(&name) {
            let endpoint = self.endpoint.clone();
            return Err(if name == "connect" {
                FleetError::Connection {
                    endpoint,
                    message: "no route to host".to_owned(),
                }
            } else {
                FleetError::Protocol {
                    endpoint,
                    message: format!("{name} rejected"),
                }
            });
        }
        Ok(state)
    }
}

impl DeviceDriver for TerminalDriver {
    fn connect(&mut self, _endpoint: &Endpoint, _password: u32, _timeout: Duration) -> zkfleet::Result<()> {
        self.op("connect")?.open += 1;
        Ok(())
    }

    fn disconnect(&mut self) -> zkfleet::Result<()> {
        let mut state = self.op("disconnect")?;
        state.open = state.open.saturating_sub(1);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.terminal.state().open > 0
    }

    fn serial_number(&mut self) -> zkfleet::Result<String> {
        self.op("serial_number").map(|_| "A8N5201060001".to_owned())
    }

    fn device_name(&mut self) -> zkfleet::Result<String> {
        self.op("device_name").map(|_| "K40".to_owned())
    }

    fn firmware_version(&mut self) -> zkfleet::Result<String> {
        self.op("firmware_version").map(|_| "Ver 6.60 Apr 28 2017".to_owned())
    }

    fn platform(&mut self) -> zkfleet::Result<String> {
        self.op("platform").map(|_| "ZLM60_TFT".to_owned())
    }

    fn mac(&mut self) -> zkfleet::Result<String> {
        self.op("mac").map(|_| "00:17:61:12:34:56".to_owned())
    }

    fn time(&mut self) -> zkfleet::Result<NaiveDateTime> {
        self.op("time").map(|_| at(12, 0))
    }

    fn set_time(&mut self, _time: NaiveDateTime) -> zkfleet::Result<()> {
        self.op("set_time").map(|_| ())
    }

    fn read_capacity_counters(&mut self) -> zkfleet::Result<CapacityCounters> {
        let state = self.op("read_capacity_counters")?;
        Ok(CapacityCounters {
            users: state.users.len() as u32,
            fingers: 0,
            records: state.attendance.len() as u32,
        })
    }

    fn users(&mut self) -> zkfleet::Result<Vec<UserRecord>> {
        self.op("users").map(|s| s.users.clone())
    }

    fn set_user(&mut self, user: &UserRecord) -> zkfleet::Result<()> {
        let mut state = self.op("set_user")?;
        state.users.retain(|u| u.uid != user.uid);
        state.users.push(user.clone());
        Ok(())
    }

    fn attendance(&mut self) -> zkfleet::Result<Vec<AttendanceRecord>> {
        self.op("attendance").map(|s| s.attendance.clone())
    }

    fn clear_attendance(&mut self) -> zkfleet::Result<()> {
        self.op("clear_attendance")?.attendance.clear();
        Ok(())
    }

    fn enable_device(&mut self) -> zkfleet::Result<()> {
        self.op("enable_device")?.disabled = false;
        Ok(())
    }

    fn disable_device(&mut self) -> zkfleet::Result<()> {
        self.op("disable_device")?.disabled = true;
        Ok(())
    }

    fn restart(&mut self) -> zkfleet::Result<()> {
        self.op("restart")?.open = 0;
        Ok(())
    }

    fn power_off(&mut self) -> zkfleet::Result<()> {
        self.op("power_off")?.open = 0;
        Ok(())
    }
}

/// A set of simulated terminals plus the factory the registry uses.
#[derive(Clone, Default)]
pub(crate) struct Site {
    terminals: Arc<Mutex<HashMap<Endpoint, Terminal>>>,
}

impl Site {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn install(&self, endpoint: &Endpoint, terminal: Terminal) -> Terminal {
        self.terminals
            .lock()
            .unwrap()
            .insert(endpoint.clone(), terminal.clone());
        terminal
    }

    /// Factory built from a closure; unknown endpoints refuse connections.
    pub(crate) fn factory(&self) -> Arc<dyn DriverFactory> {
        let terminals = Arc::clone(&self.terminals);
        Arc::new(move |endpoint: &Endpoint| -> Box<dyn DeviceDriver> {
            let terminal = terminals
                .lock()
                .unwrap()
                .get(endpoint)
                .cloned()
                .unwrap_or_else(|| Terminal::new().failing("connect"));
            Box::new(TerminalDriver {
                endpoint: endpoint.clone(),
                terminal,
            })
        })
    }
}

/// Everything a download test needs, wired together.
pub(crate) struct Harness {
    pub registry: Arc<SessionRegistry>,
    pub service: DownloadService,
    pub store: Arc<MemoryStore>,
    pub cursors: Arc<SyncCursorStore>,
    pub _dir: tempfile::TempDir,
}

/// Must be called inside a Tokio runtime.
pub(crate) fn harness(site: &Site) -> Harness {
    let dir = tempfile::tempdir().expect("create temp dir");
    let registry = Arc::new(SessionRegistry::new(site.factory()));
    let pipeline = Arc::new(DownloadPipeline::new(
        Arc::clone(&registry),
        Duration::from_secs(1),
    ));
    let cursors = Arc::new(SyncCursorStore::new(dir.path().join("sync_state.json")));
    let executor = TaskExecutor::from_current(4).expect("runtime");
    Harness {
        registry,
        service: DownloadService::new(pipeline, executor, Arc::clone(&cursors)),
        store: Arc::new(MemoryStore::new()),
        cursors,
        _dir: dir,
    }
}
