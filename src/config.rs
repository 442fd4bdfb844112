//! Configuration for the fleet core.

use crate::schedule::{ClockDisplay, ScheduleConfig, TimeOfDay, WeekdayMask};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Legacy settings keys, as stored by the desktop application.
pub mod keys {
    pub const DELETE_AFTER_DOWNLOAD: &str = "delete_after_download";
    pub const AUTO_DOWNLOAD_ENABLED: &str = "auto_download_daily_enabled";
    pub const AUTO_DOWNLOAD_TIME: &str = "auto_download_daily_time";
    pub const AUTO_DOWNLOAD_DAYS: &str = "auto_download_days";
    pub const CLOCK_FORMAT: &str = "clock_format";
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// What a download does to the terminal.
    pub download: DownloadConfig,
    /// Automatic daily download.
    pub schedule: ScheduleConfig,
    /// Terminal connection defaults.
    pub session: SessionConfig,
    /// Background worker pool.
    pub executor: ExecutorConfig,
    /// Sync cursor persistence.
    pub sync: SyncConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

/// Download behavior.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Clear the terminal's attendance log after a successful fetch.
    pub delete_after_download: bool,
}

/// Terminal connection defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Port used when an address has none.
    pub default_port: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            default_port: crate::device::DEFAULT_DEVICE_PORT,
        }
    }
}

impl SessionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

/// Worker pool sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Upper bound on concurrently running device tasks.
    pub max_concurrent_tasks: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: crate::executor::DEFAULT_MAX_CONCURRENT_TASKS,
        }
    }
}

/// Where sync cursors live.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Cursor file. `None` uses `fleet_dirs::cursor_file()`.
    pub cursor_file: Option<PathBuf>,
}

impl SyncConfig {
    pub fn cursor_path(&self) -> PathBuf {
        self.cursor_file
            .clone()
            .unwrap_or_else(crate::fleet_dirs::cursor_file)
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Also write a daily-rolling file under `fleet_dirs::logs_dir()`.
    pub file_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "zkfleet=info".to_owned(),
            file_enabled: false,
        }
    }
}

impl FleetConfig {
    /// Load configuration from a TOML file, falling back to defaults for
    /// missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::FleetError::Config(e.to_string()))
    }

    /// Load `path` if it exists, defaults otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> crate::error::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file, creating parent directories as
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot
    /// be serialized.
    pub fn save_to_file(&self, path: &Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::FleetError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path (`fleet_dirs::config_file()`).
    pub fn default_config_path() -> PathBuf {
        crate::fleet_dirs::config_file()
    }

    /// Read the desktop application's key/value settings.
    ///
    /// Missing keys keep their defaults. A malformed time falls back to
    /// 02:00 and out-of-range weekdays are dropped.
    pub fn from_settings(settings: &HashMap<String, String>) -> Self {
        let mut config = Self::default();
        let get = |key: &str| settings.get(key).map(|v| v.trim());

        if let Some(v) = get(keys::DELETE_AFTER_DOWNLOAD) {
            config.download.delete_after_download = parse_flag(v);
        }
        if let Some(v) = get(keys::AUTO_DOWNLOAD_ENABLED) {
            config.schedule.enabled = parse_flag(v);
        }
        if let Some(v) = get(keys::AUTO_DOWNLOAD_TIME) {
            config.schedule.time_of_day = v.parse().unwrap_or_else(|e| {
                warn!("ignoring {}: {e}", keys::AUTO_DOWNLOAD_TIME);
                TimeOfDay::default()
            });
        }
        if let Some(v) = get(keys::AUTO_DOWNLOAD_DAYS) {
            config.schedule.weekdays = WeekdayMask::parse_csv(v);
        }
        if let Some(v) = get(keys::CLOCK_FORMAT) {
            config.schedule.clock_display = ClockDisplay::from_setting(v);
        }
        config
    }

    /// The key/value form understood by [`from_settings`](Self::from_settings).
    pub fn to_settings(&self) -> HashMap<String, String> {
        let flag = |b: bool| (if b { "1" } else { "0" }).to_owned();
        HashMap::from([
            (
                keys::DELETE_AFTER_DOWNLOAD.to_owned(),
                flag(self.download.delete_after_download),
            ),
            (
                keys::AUTO_DOWNLOAD_ENABLED.to_owned(),
                flag(self.schedule.enabled),
            ),
            (
                keys::AUTO_DOWNLOAD_TIME.to_owned(),
                self.schedule.time_of_day.to_string(),
            ),
            (
                keys::AUTO_DOWNLOAD_DAYS.to_owned(),
                self.schedule.weekdays.to_csv(),
            ),
            (
                keys::CLOCK_FORMAT.to_owned(),
                self.schedule.clock_display.as_setting().to_owned(),
            ),
        ])
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
