//! Automatic daily downloads.

pub mod calendar;
pub mod engine;

pub use calendar::{ClockDisplay, ScheduleConfig, TimeOfDay, WeekdayMask};
pub use engine::{
    Clock, DeviceOutcome, EngineSettings, FireReport, LocalClock, ScheduleEngine, ScheduleHandle,
};
