//! Daily download schedule: time of day, weekday mask, and next-fire math.

use crate::error::{FleetError, Result};
use chrono::{Datelike, Days, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Days scanned forward when looking for the next fire time.
const MAX_SCAN_DAYS: u64 = 8;

/// Wall-clock time of the daily run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    /// # Errors
    ///
    /// [`FleetError::Config`] when hour or minute is out of range.
    pub fn new(hour: u8, minute: u8) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(FleetError::Config(format!(
                "time of day out of range: {hour:02}:{minute:02}"
            )));
        }
        Ok(Self { hour, minute })
    }

    pub fn hour(self) -> u8 {
        self.hour
    }

    pub fn minute(self) -> u8 {
        self.minute
    }

    pub fn as_naive(self) -> NaiveTime {
        NaiveTime::from_hms_opt(u32::from(self.hour), u32::from(self.minute), 0)
            .unwrap_or(NaiveTime::MIN)
    }
}

impl Default for TimeOfDay {
    /// 02:00, outside working hours.
    fn default() -> Self {
        Self { hour: 2, minute: 0 }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self> {
        let (h, m) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| FleetError::Config(format!("expected HH:MM, got `{s}`")))?;
        let hour = h
            .parse::<u8>()
            .map_err(|_| FleetError::Config(format!("bad hour in `{s}`")))?;
        let minute = m
            .parse::<u8>()
            .map_err(|_| FleetError::Config(format!("bad minute in `{s}`")))?;
        Self::new(hour, minute)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = FleetError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

/// Set of weekdays, numbered 1 = Monday .. 7 = Sunday.
///
/// An empty mask means every day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<u8>", into = "Vec<u8>")]
pub struct WeekdayMask(u8);

impl WeekdayMask {
    pub const EVERY_DAY: Self = Self(0);

    /// Build from day numbers, ignoring anything outside 1..=7.
    pub fn from_days(days: impl IntoIterator<Item = u8>) -> Self {
        let bits = days
            .into_iter()
            .filter(|d| (1..=7).contains(d))
            .fold(0u8, |acc, d| acc | (1 << (d - 1)));
        Self(bits)
    }

    /// Parse a comma-separated list such as `"1,3,5"`. Unparseable and
    /// out-of-range entries are dropped.
    pub fn parse_csv(csv: &str) -> Self {
        Self::from_days(csv.split(',').filter_map(|d| d.trim().parse::<u8>().ok()))
    }

    pub fn to_csv(self) -> String {
        self.days()
            .iter()
            .map(u8::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Day numbers in the mask, ascending.
    pub fn days(self) -> Vec<u8> {
        (1..=7u8).filter(|d| self.0 & (1 << (d - 1)) != 0).collect()
    }

    /// Whether a run is allowed on `day`. Always true for an empty mask.
    pub fn allows(self, day: Weekday) -> bool {
        self.is_empty() || self.0 & (1 << day.num_days_from_monday()) != 0
    }
}

impl From<Vec<u8>> for WeekdayMask {
    fn from(days: Vec<u8>) -> Self {
        Self::from_days(days)
    }
}

impl From<WeekdayMask> for Vec<u8> {
    fn from(mask: WeekdayMask) -> Self {
        mask.days()
    }
}

/// How times are shown to operators. Never affects stored values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockDisplay {
    #[default]
    #[serde(rename = "24")]
    H24,
    #[serde(rename = "12")]
    H12,
}

impl ClockDisplay {
    /// `"24"` or `"12"`; anything else falls back to 24h.
    pub fn from_setting(value: &str) -> Self {
        match value.trim() {
            "12" => Self::H12,
            _ => Self::H24,
        }
    }

    pub fn as_setting(self) -> &'static str {
        match self {
            Self::H24 => "24",
            Self::H12 => "12",
        }
    }

    pub fn format_time(self, time: NaiveTime) -> String {
        match self {
            Self::H24 => time.format("%H:%M").to_string(),
            Self::H12 => time.format("%I:%M %p").to_string(),
        }
    }

    pub fn format_datetime(self, at: NaiveDateTime) -> String {
        format!(
            "{} {}",
            at.format("%a %Y-%m-%d"),
            self.format_time(at.time())
        )
    }
}

/// When automatic downloads run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub enabled: bool,
    #[serde(rename = "time")]
    pub time_of_day: TimeOfDay,
    #[serde(rename = "days")]
    pub weekdays: WeekdayMask,
    #[serde(rename = "clock_format")]
    pub clock_display: ClockDisplay,
}

impl ScheduleConfig {
    /// Earliest instant strictly after `now` that falls on `time_of_day`
    /// and an allowed weekday.
    pub fn next_fire_at(&self, now: NaiveDateTime) -> NaiveDateTime {
        let time = self.time_of_day.as_naive();
        (0..MAX_SCAN_DAYS)
            .filter_map(|offset| now.date().checked_add_days(Days::new(offset)))
            .map(|date| date.and_time(time))
            .find(|candidate| *candidate > now && self.weekdays.allows(candidate.weekday()))
            // Unreachable with a 7-day week; keep the loop alive regardless.
            .unwrap_or(now + chrono::Duration::days(1))
    }

    /// Delay from `now` until [`next_fire_at`](Self::next_fire_at).
    pub fn next_fire_delay(&self, now: NaiveDateTime) -> Duration {
        (self.next_fire_at(now) - now).to_std().unwrap_or_default()
    }

    /// Human-readable summary, e.g. `"02:00 on Mon, Fri"`.
    pub fn describe(&self) -> String {
        let time = self.clock_display.format_time(self.time_of_day.as_naive());
        if self.weekdays.is_empty() {
            return format!("{time} every day");
        }
        let days: Vec<String> = self
            .weekdays
            .days()
            .into_iter()
            .filter_map(|d| Weekday::try_from(d - 1).ok())
            .map(|d| d.to_string())
            .collect();
        format!("{time} on {}", days.join(", "))
    }
}
