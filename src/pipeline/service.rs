//! Preview-then-commit downloads.
//!
//! A fetch produces a pending batch holding the full fetched set, the delta
//! against the sync cursor, and the cursor value that committing would
//! store. Nothing is persisted and no cursor moves until
//! [`PendingAttendance::commit`] / [`PendingUsers::commit`] succeed.

use crate::device::{AttendanceRecord, Endpoint, UserRecord};
use crate::error::{FleetError, Result};
use crate::executor::{TaskExecutor, TaskHandle};
use crate::pipeline::DownloadPipeline;
use crate::store::{DeviceId, DevicePatch, DeviceRecord, RecordSink};
use crate::sync::{AttendanceDelta, SyncCursorStore, UserDelta, attendance_delta, user_delta};
use chrono::NaiveDateTime;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Which terminal to download from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub endpoint: Endpoint,
    pub password: u32,
    /// Registered device row to stamp, when known.
    pub device_id: Option<DeviceId>,
}

impl DownloadTarget {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            password: 0,
            device_id: None,
        }
    }
}

impl From<&DeviceRecord> for DownloadTarget {
    fn from(device: &DeviceRecord) -> Self {
        Self {
            endpoint: device.endpoint.clone(),
            password: device.password,
            device_id: Some(device.id),
        }
    }
}

/// Outcome of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReport {
    pub endpoint: Endpoint,
    /// Rows handed to the sink.
    pub stored: usize,
    /// Records that were new relative to the cursor.
    pub new_records: usize,
}

/// Runs downloads on the executor and diffs them against stored cursors.
#[derive(Clone)]
pub struct DownloadService {
    pipeline: Arc<DownloadPipeline>,
    executor: TaskExecutor,
    cursors: Arc<SyncCursorStore>,
}

impl DownloadService {
    pub fn new(
        pipeline: Arc<DownloadPipeline>,
        executor: TaskExecutor,
        cursors: Arc<SyncCursorStore>,
    ) -> Self {
        Self {
            pipeline,
            executor,
            cursors,
        }
    }

    pub fn cursors(&self) -> &Arc<SyncCursorStore> {
        &self.cursors
    }

    /// Download attendance in the background. `purge` clears the terminal
    /// after a successful fetch.
    pub fn fetch_attendance(&self, target: DownloadTarget, purge: bool) -> TaskHandle<PendingAttendance> {
        let pipeline = Arc::clone(&self.pipeline);
        let cursors = Arc::clone(&self.cursors);
        let label = format!("attendance {}", target.endpoint);
        self.executor.submit(label, move |log| {
            // Read the cursor before any device I/O: a purge must never run
            // for a download that cannot be diffed.
            let previous = cursors.load(&target.endpoint)?.last_attendance_ts;
            let fetched = pipeline.fetch_attendance(&target.endpoint, target.password, purge, log)?;
            let delta = attendance_delta(&fetched, previous);
            log.info(format!(
                "{} of {} records are new",
                delta.new_records.len(),
                fetched.len()
            ));
            Ok(PendingAttendance {
                target,
                fetched,
                delta,
                cursors,
            })
        })
    }

    /// Download the enrolled user list in the background.
    pub fn fetch_users(&self, target: DownloadTarget) -> TaskHandle<PendingUsers> {
        let pipeline = Arc::clone(&self.pipeline);
        let cursors = Arc::clone(&self.cursors);
        let label = format!("users {}", target.endpoint);
        self.executor.submit(label, move |log| {
            let known = cursors.load(&target.endpoint)?.known_user_ids;
            let fetched = pipeline.fetch_users(&target.endpoint, target.password, log)?;
            let delta = user_delta(&fetched, &known);
            log.info(format!(
                "{} of {} users are new",
                delta.new_users.len(),
                fetched.len()
            ));
            Ok(PendingUsers {
                target,
                fetched,
                delta,
                cursors,
            })
        })
    }
}

/// Fetched attendance awaiting confirmation.
///
/// Dropping it without committing is the same as [`decline`](Self::decline).
#[must_use = "pending downloads must be committed or declined"]
pub struct PendingAttendance {
    target: DownloadTarget,
    fetched: Vec<AttendanceRecord>,
    delta: AttendanceDelta,
    cursors: Arc<SyncCursorStore>,
}

impl std::fmt::Debug for PendingAttendance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingAttendance")
            .field("endpoint", &self.target.endpoint)
            .field("fetched", &self.fetched.len())
            .field("new", &self.delta.new_records.len())
            .finish_non_exhaustive()
    }
}

impl PendingAttendance {
    pub fn endpoint(&self) -> &Endpoint {
        &self.target.endpoint
    }

    /// Full set returned by the terminal.
    pub fn fetched(&self) -> &[AttendanceRecord] {
        &self.fetched
    }

    /// Records newer than the stored cursor.
    pub fn new_records(&self) -> &[AttendanceRecord] {
        &self.delta.new_records
    }

    /// Cursor value a commit would store.
    pub fn candidate_cursor(&self) -> Option<NaiveDateTime> {
        self.delta.new_cursor
    }

    /// Persist the new records, then advance the cursor, then stamp
    /// `last_download` on the device record.
    ///
    /// # Errors
    ///
    /// [`FleetError::Persistence`] when the sink fails; the cursor is left
    /// untouched and `last_error` is recorded on the device.
    pub fn commit(self, sink: &dyn RecordSink) -> Result<CommitReport> {
        let endpoint = &self.target.endpoint;
        let stored = sink
            .persist_attendance(endpoint, &self.delta.new_records)
            .map_err(|e| persistence_failed(sink, &self.target, e))?;

        if let Some(cursor) = self.delta.new_cursor {
            self.cursors.commit_attendance(endpoint, cursor)?;
        }
        stamp(sink, &self.target, DevicePatch::downloaded_at(now()));
        info!(endpoint = %endpoint, stored, "attendance committed");

        Ok(CommitReport {
            endpoint: endpoint.clone(),
            stored,
            new_records: self.delta.new_records.len(),
        })
    }

    /// Discard the batch. The cursor is not touched.
    pub fn decline(self) {
        info!(endpoint = %self.target.endpoint, "attendance download declined");
    }
}

/// Fetched users awaiting confirmation.
#[must_use = "pending downloads must be committed or declined"]
pub struct PendingUsers {
    target: DownloadTarget,
    fetched: Vec<UserRecord>,
    delta: UserDelta,
    cursors: Arc<SyncCursorStore>,
}

impl std::fmt::Debug for PendingUsers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingUsers")
            .field("endpoint", &self.target.endpoint)
            .field("fetched", &self.fetched.len())
            .field("new", &self.delta.new_users.len())
            .finish_non_exhaustive()
    }
}

impl PendingUsers {
    pub fn endpoint(&self) -> &Endpoint {
        &self.target.endpoint
    }

    pub fn fetched(&self) -> &[UserRecord] {
        &self.fetched
    }

    /// Users whose id was not known before this fetch.
    pub fn new_users(&self) -> &[UserRecord] {
        &self.delta.new_users
    }

    /// Known-id set a commit would store.
    pub fn candidate_known_ids(&self) -> &BTreeSet<String> {
        &self.delta.known_ids
    }

    /// Upsert the full fetched list, then record the ids as known, then
    /// stamp `last_sync`.
    ///
    /// # Errors
    ///
    /// Same as [`PendingAttendance::commit`].
    pub fn commit(self, sink: &dyn RecordSink) -> Result<CommitReport> {
        let endpoint = &self.target.endpoint;
        let stored = sink
            .persist_users(&self.fetched)
            .map_err(|e| persistence_failed(sink, &self.target, e))?;

        self.cursors.commit_users(endpoint, &self.delta.known_ids)?;
        stamp(sink, &self.target, DevicePatch::synced_at(now()));
        info!(endpoint = %endpoint, stored, "users committed");

        Ok(CommitReport {
            endpoint: endpoint.clone(),
            stored,
            new_records: self.delta.new_users.len(),
        })
    }

    pub fn decline(self) {
        info!(endpoint = %self.target.endpoint, "user download declined");
    }
}

fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

fn persistence_failed(sink: &dyn RecordSink, target: &DownloadTarget, err: FleetError) -> FleetError {
    let err = match err {
        FleetError::Persistence(_) => err,
        other => FleetError::Persistence(other.to_string()),
    };
    warn!(endpoint = %target.endpoint, "{err}");
    stamp(sink, target, DevicePatch::failed(err.to_string()));
    err
}

/// Best-effort device record update.
pub(crate) fn stamp(sink: &dyn RecordSink, target: &DownloadTarget, patch: DevicePatch) {
    let Some(id) = target.device_id else {
        return;
    };
    match sink.update_device(id, patch) {
        Ok(true) => {}
        Ok(false) => warn!(endpoint = %target.endpoint, "device record {id} not found"),
        Err(e) => warn!(endpoint = %target.endpoint, "could not update device record: {e}"),
    }
}
