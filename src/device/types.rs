//! Value types exchanged with terminals.

use crate::error::{FleetError, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default TCP/UDP port spoken by the terminals.
pub const DEFAULT_DEVICE_PORT: u16 = 4370;

/// Regular user privilege level.
pub const PRIVILEGE_DEFAULT: u8 = 0;

/// Administrator privilege level.
pub const PRIVILEGE_ADMIN: u8 = 14;

/// Network identity of a terminal. Keys sessions and sync cursors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    /// Hostname or IP address.
    pub host: String,
    /// Port number.
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint from host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The `"host:port"` key used for persisted cursor state.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = FleetError;

    /// Parses `host:port`, or a bare host with the default port.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(FleetError::Validation("empty endpoint".to_owned()));
        }
        match s.rsplit_once(':') {
            Some((host, port)) => {
                if host.is_empty() {
                    return Err(FleetError::Validation(format!("missing host in `{s}`")));
                }
                let port = port
                    .parse::<u16>()
                    .map_err(|e| FleetError::Validation(format!("invalid port in `{s}`: {e}")))?;
                Ok(Self::new(host, port))
            }
            None => Ok(Self::new(s, DEFAULT_DEVICE_PORT)),
        }
    }
}

/// One punch read from a terminal's on-board log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    /// Personnel identifier as enrolled on the terminal.
    pub user_id: String,
    /// Device-local wall-clock time of the punch.
    pub timestamp: NaiveDateTime,
    /// Verification status reported by the terminal.
    pub status: i32,
    /// Punch code (check-in, check-out, break...).
    pub punch_code: i32,
    /// Untouched driver payload.
    #[serde(default)]
    pub raw: serde_json::Value,
}

/// A user enrolled on a terminal.
///
/// `user_id` is the identity key; `uid` is a device-local slot number and
/// may be reused after deletions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    pub uid: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub privilege: u8,
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub card: String,
    #[serde(default)]
    pub password: String,
}

/// Storage counters reported by a terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityCounters {
    pub users: u32,
    pub fingers: u32,
    pub records: u32,
}

/// Identity and status snapshot of a terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub serial_number: String,
    pub device_name: String,
    pub firmware_version: String,
    pub platform: String,
    pub mac: String,
    pub time: NaiveDateTime,
    pub counters: CapacityCounters,
}
