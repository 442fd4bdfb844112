//! File-backed per-endpoint sync cursors.

use crate::device::Endpoint;
use crate::error::{FleetError, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// High-water marks for one endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    #[serde(default, alias = "att_last_ts")]
    pub last_attendance_ts: Option<NaiveDateTime>,
    #[serde(default, alias = "user_ids")]
    pub known_user_ids: BTreeSet<String>,
}

impl SyncCursor {
    pub fn is_empty(&self) -> bool {
        self.last_attendance_ts.is_none() && self.known_user_ids.is_empty()
    }
}

/// On-disk layout.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CursorFile {
    #[serde(default = "default_cursor_version")]
    version: u8,
    /// Keyed by `host:port`.
    #[serde(default)]
    endpoints: BTreeMap<String, SyncCursor>,
}

fn default_cursor_version() -> u8 {
    1
}

/// JSON store of [`SyncCursor`]s keyed by `host:port`.
///
/// Every mutation is a read-modify-write under an in-process lock, and the
/// file is replaced atomically (write to a sibling temp file, then rename)
/// so a crash mid-write leaves the previous state intact.
pub struct SyncCursorStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SyncCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Store at [`fleet_dirs::cursor_file`](crate::fleet_dirs::cursor_file).
    pub fn in_default_location() -> Self {
        Self::new(crate::fleet_dirs::cursor_file())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> Result<MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|e| FleetError::Cursor(format!("cursor lock poisoned: {e}")))
    }

    /// Cursor for `endpoint`; empty when nothing has been committed.
    pub fn load(&self, endpoint: &Endpoint) -> Result<SyncCursor> {
        let _guard = self.guard()?;
        Ok(self
            .read_file()?
            .endpoints
            .remove(&endpoint.key())
            .unwrap_or_default())
    }

    /// Every endpoint key with stored state, sorted.
    pub fn endpoints(&self) -> Result<Vec<String>> {
        let _guard = self.guard()?;
        Ok(self.read_file()?.endpoints.into_keys().collect())
    }

    /// Advance the attendance cursor. The stored value becomes the max of
    /// the old and new timestamps, so it never moves backward.
    pub fn commit_attendance(&self, endpoint: &Endpoint, ts: NaiveDateTime) -> Result<SyncCursor> {
        self.update(endpoint, |cursor| {
            let merged = cursor.last_attendance_ts.map_or(ts, |prev| prev.max(ts));
            cursor.last_attendance_ts = Some(merged);
        })
    }

    /// Add `ids` to the known user set.
    pub fn commit_users(&self, endpoint: &Endpoint, ids: &BTreeSet<String>) -> Result<SyncCursor> {
        self.update(endpoint, |cursor| {
            cursor.known_user_ids.extend(ids.iter().cloned());
        })
    }

    /// Forget all state for `endpoint`. Returns `true` if anything was stored.
    pub fn reset(&self, endpoint: &Endpoint) -> Result<bool> {
        let _guard = self.guard()?;
        let mut file = self.read_file()?;
        let removed = file.endpoints.remove(&endpoint.key()).is_some();
        if removed {
            self.write_file(&file)?;
            info!(endpoint = %endpoint, "sync cursor reset");
        }
        Ok(removed)
    }

    fn update(&self, endpoint: &Endpoint, apply: impl FnOnce(&mut SyncCursor)) -> Result<SyncCursor> {
        let _guard = self.guard()?;
        let mut file = self.read_file()?;
        let cursor = file.endpoints.entry(endpoint.key()).or_default();
        apply(cursor);
        let updated = cursor.clone();
        self.write_file(&file)?;
        debug!(endpoint = %endpoint, "sync cursor committed");
        Ok(updated)
    }

    fn read_file(&self) -> Result<CursorFile> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CursorFile::default());
            }
            Err(e) => {
                return Err(FleetError::Cursor(format!(
                    "cannot read {}: {e}",
                    self.path.display()
                )));
            }
        };
        serde_json::from_slice(&bytes).map_err(|e| {
            FleetError::Cursor(format!("cannot parse {}: {e}", self.path.display()))
        })
    }

    fn write_file(&self, file: &CursorFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| FleetError::Cursor(format!("cannot create cursor dir: {e}")))?;
        }
        let state = CursorFile {
            version: default_cursor_version(),
            endpoints: file.endpoints.clone(),
        };
        let json = serde_json::to_string_pretty(&state)
            .map_err(|e| FleetError::Cursor(format!("cannot serialize cursors: {e}")))?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| FleetError::Cursor(format!("cannot write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            FleetError::Cursor(format!("cannot replace {}: {e}", self.path.display()))
        })
    }
}
