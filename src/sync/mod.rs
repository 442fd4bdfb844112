//! Incremental sync: delta computation and persisted cursors.

pub mod cursor;
pub mod delta;

pub use cursor::{SyncCursor, SyncCursorStore};
pub use delta::{AttendanceDelta, UserDelta, attendance_delta, user_delta};
