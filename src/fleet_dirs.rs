//! Application directory paths.
//!
//! Uses the [`dirs`] crate for platform-appropriate resolution.
//!
//! | Purpose | Linux | macOS |
//! |---------|-------|-------|
//! | Data | `~/.local/share/zkfleet/` | `~/Library/Application Support/zkfleet/` |
//! | Config | `~/.config/zkfleet/` | `~/Library/Application Support/zkfleet/` |
//!
//! # Environment Overrides
//!
//! - `ZKFLEET_DATA_DIR` overrides [`data_dir`]
//! - `ZKFLEET_CONFIG_DIR` overrides [`config_dir`]

use std::path::PathBuf;

/// Persistent state root: sync cursors and logs.
///
/// Resolves to `dirs::data_dir()/zkfleet/` unless `ZKFLEET_DATA_DIR` is set.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("ZKFLEET_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("zkfleet"))
        .unwrap_or_else(|| std::env::temp_dir().join("zkfleet-data"))
}

/// Directory holding `config.toml`.
///
/// Resolves to `dirs::config_dir()/zkfleet/` unless `ZKFLEET_CONFIG_DIR`
/// is set.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("ZKFLEET_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("zkfleet"))
        .unwrap_or_else(|| std::env::temp_dir().join("zkfleet-config"))
}

/// Rolling log files (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Default config file (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Default sync cursor file (`data_dir()/sync_state.json`).
#[must_use]
pub fn cursor_file() -> PathBuf {
    data_dir().join("sync_state.json")
}
