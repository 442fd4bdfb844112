//! Download orchestration.
//!
//! [`DownloadPipeline`] drives one terminal through the
//! connect/disable/fetch/purge/enable/disconnect sequence. [`DownloadService`]
//! runs it on the [`TaskExecutor`](crate::executor::TaskExecutor), diffs the
//! result against the sync cursor, and hands back a pending batch that the
//! caller commits or declines.

pub mod download;
pub mod service;

use serde::{Deserialize, Serialize};

pub use download::DownloadPipeline;
pub use service::{
    CommitReport, DownloadService, DownloadTarget, PendingAttendance, PendingUsers,
};

/// Position of a pipeline run in its state machine.
///
/// `Idle → Connecting → Disabling → Fetching → (Purging) → Enabling →
/// Disconnecting → Done`; `Failed` is reachable from any non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Connecting,
    Disabling,
    Fetching,
    Purging,
    Enabling,
    Disconnecting,
    Done,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Disabling => "disabling",
            Self::Fetching => "fetching",
            Self::Purging => "purging",
            Self::Enabling => "enabling",
            Self::Disconnecting => "disconnecting",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}
