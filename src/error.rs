//! Error types for the terminal fleet core.

use crate::device::Endpoint;
use crate::pipeline::Stage;

/// Top-level error type for sessions, downloads and scheduling.
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    /// Device unreachable or connect timed out. Transient; the device is
    /// presumed offline.
    #[error("connection error ({endpoint}): {message}")]
    Connection { endpoint: Endpoint, message: String },

    /// Malformed or rejected device response (wrong password, firmware
    /// mismatch, unexpected reply).
    #[error("protocol error ({endpoint}): {message}")]
    Protocol { endpoint: Endpoint, message: String },

    /// Caller-supplied data rejected.
    #[error("validation error: {0}")]
    Validation(String),

    /// The persistence collaborator failed to store results.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// No live session is registered for the endpoint.
    #[error("not connected to {0}")]
    NotConnected(Endpoint),

    /// Another download is already in flight for the endpoint.
    #[error("download already running for {0}")]
    Busy(Endpoint),

    /// A download pipeline failed; carries the stage that was reached.
    #[error("download from {endpoint} failed at {stage}: {source}")]
    Pipeline {
        endpoint: Endpoint,
        stage: Stage,
        #[source]
        source: Box<FleetError>,
    },

    /// Background worker panicked or vanished before signaling.
    #[error("task error: {0}")]
    Task(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Sync cursor state could not be read or written.
    #[error("cursor error: {0}")]
    Cursor(String),

    /// Schedule engine error.
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FleetError {
    /// Returns `true` when retrying later can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Busy(_) => true,
            Self::Pipeline { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Innermost error, unwrapping pipeline context.
    pub fn root(&self) -> &FleetError {
        match self {
            Self::Pipeline { source, .. } => source.root(),
            other => other,
        }
    }

    /// Stage reached when this error came out of a download pipeline.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Pipeline { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, FleetError>;
