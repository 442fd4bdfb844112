//! Config file and legacy settings interplay.

use std::collections::HashMap;
use zkfleet::FleetConfig;
use zkfleet::schedule::ClockDisplay;

#[test]
fn legacy_settings_survive_a_toml_round_trip() {
    let legacy: HashMap<String, String> = [
        ("delete_after_download", "1"),
        ("auto_download_daily_enabled", "1"),
        ("auto_download_daily_time", "01:30"),
        ("auto_download_days", "1,2,3,4,5"),
        ("clock_format", "12"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_owned(), v.to_owned()))
    .collect();

    let config = FleetConfig::from_settings(&legacy);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    config.save_to_file(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("[schedule]"), "{text}");
    assert!(text.contains("clock_format = \"12\""), "{text}");

    let loaded = FleetConfig::from_file(&path).unwrap();
    assert_eq!(loaded, config);
    assert_eq!(loaded.to_settings(), config.to_settings());
    assert_eq!(loaded.to_settings()["auto_download_days"], "1,2,3,4,5");
}

#[test]
fn next_run_from_loaded_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[schedule]\nenabled = true\ntime = \"02:00\"\ndays = [1]\nclock_format = \"12\"\n",
    )
    .unwrap();

    let config = FleetConfig::from_file(&path).unwrap();
    let wednesday = crate::helpers::at(10, 0);
    let fire = config.schedule.next_fire_at(wednesday);

    assert_eq!(fire.format("%Y-%m-%d %H:%M").to_string(), "2024-03-11 02:00");
    assert_eq!(config.schedule.clock_display, ClockDisplay::H12);
    assert_eq!(
        config.schedule.clock_display.format_datetime(fire),
        "Mon 2024-03-11 02:00 AM"
    );
}
