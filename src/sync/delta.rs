//! Client-side incremental diffing.
//!
//! Terminals have no incremental query, so every fetch returns the full
//! on-board set and the new part is computed here against the cursor.

use crate::device::{AttendanceRecord, UserRecord};
use chrono::NaiveDateTime;
use std::collections::BTreeSet;

/// Result of diffing a fetched attendance set against a cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceDelta {
    /// Records strictly newer than the previous cursor, oldest first.
    pub new_records: Vec<AttendanceRecord>,
    /// Maximum timestamp over the whole fetched set, merged with the
    /// previous cursor. `None` only when both are absent.
    pub new_cursor: Option<NaiveDateTime>,
}

/// Result of diffing a fetched user list against known ids.
#[derive(Debug, Clone, PartialEq)]
pub struct UserDelta {
    /// Users whose `user_id` was not known before.
    pub new_users: Vec<UserRecord>,
    /// Previous ids plus every fetched id.
    pub known_ids: BTreeSet<String>,
}

/// Diff `records` against the previous attendance cursor.
pub fn attendance_delta(
    records: &[AttendanceRecord],
    previous: Option<NaiveDateTime>,
) -> AttendanceDelta {
    let mut new_records: Vec<AttendanceRecord> = records
        .iter()
        .filter(|r| previous.is_none_or(|cursor| r.timestamp > cursor))
        .cloned()
        .collect();
    new_records.sort_by_key(|r| r.timestamp);

    let fetched_max = records.iter().map(|r| r.timestamp).max();
    let new_cursor = match (previous, fetched_max) {
        (Some(prev), Some(max)) => Some(prev.max(max)),
        (prev, max) => prev.or(max),
    };

    AttendanceDelta {
        new_records,
        new_cursor,
    }
}

/// Diff `users` against the previously known id set.
pub fn user_delta(users: &[UserRecord], known: &BTreeSet<String>) -> UserDelta {
    let new_users = users
        .iter()
        .filter(|u| !known.contains(&u.user_id))
        .cloned()
        .collect();

    let mut known_ids = known.clone();
    known_ids.extend(users.iter().map(|u| u.user_id.clone()));

    UserDelta {
        new_users,
        known_ids,
    }
}
