//! Automatic download firings across a mixed fleet.

use crate::helpers::{Site, Terminal, at, harness, punch};
use std::sync::Arc;
use std::time::Duration;
use zkfleet::schedule::{EngineSettings, ScheduleEngine};
use zkfleet::{Endpoint, RecordSink};

#[tokio::test]
async fn firing_visits_enabled_devices_independently() {
    let site = Site::new();
    let healthy = Endpoint::new("172.16.0.10", 4370);
    let offline = Endpoint::new("172.16.0.11", 4370);
    let retired = Endpoint::new("172.16.0.12", 4370);
    let healthy_terminal = site.install(
        &healthy,
        Terminal::new().with_attendance(vec![punch("1", at(6, 0)), punch("2", at(6, 5))]),
    );
    site.install(&offline, Terminal::new().failing("connect"));
    let retired_terminal = site.install(&retired, Terminal::new());

    let h = harness(&site);
    h.store.add_device("Warehouse", healthy.clone()).unwrap();
    h.store.add_device("Yard", offline.clone()).unwrap();
    let mut record = h.store.add_device("Old lobby", retired.clone()).unwrap();
    record.enabled = false;
    h.store.put_device(record).unwrap();

    let settings = EngineSettings {
        delete_after_download: true,
        ..EngineSettings::default()
    };
    let mut handle = ScheduleEngine::new(h.service.clone(), h.store.clone(), settings).start();
    handle.trigger_now();

    let report = tokio::time::timeout(Duration::from_secs(10), handle.next_report())
        .await
        .expect("firing finished")
        .expect("engine running");

    assert_eq!(report.outcomes.len(), 2);
    let warehouse = &report.outcomes[0];
    assert_eq!(warehouse.name, "Warehouse");
    assert_eq!(warehouse.result.as_ref().unwrap().stored, 2);
    let yard = &report.outcomes[1];
    assert!(yard.result.as_ref().unwrap_err().is_transient());

    assert!(healthy_terminal.state().attendance.is_empty());
    assert!(retired_terminal.log().is_empty());
    assert_eq!(h.store.attendance(&healthy).unwrap().len(), 2);
    assert_eq!(
        h.cursors.load(&healthy).unwrap().last_attendance_ts,
        Some(at(6, 5))
    );

    let devices = h.store.list_devices().unwrap();
    assert!(devices[0].last_download.is_some());
    assert!(devices[1].last_error.as_deref().unwrap().contains("172.16.0.11"));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_stops_a_parked_engine() {
    let site = Site::new();
    let h = harness(&site);
    let sink: Arc<dyn RecordSink> = h.store.clone();
    let handle = ScheduleEngine::new(h.service.clone(), sink, EngineSettings::default()).start();

    assert!(!handle.settings().schedule.enabled);
    tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
        .await
        .expect("loop exits promptly")
        .unwrap();
}
