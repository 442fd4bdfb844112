//! Registry and single-flight behavior under concurrent callers.

use crate::helpers::{Site, Terminal, at, harness, punch};
use std::sync::Arc;
use std::time::Duration;
use zkfleet::pipeline::DownloadTarget;
use zkfleet::{Endpoint, FleetError};

#[tokio::test]
async fn overlapping_download_on_same_terminal_is_busy() {
    let site = Site::new();
    let endpoint = Endpoint::new("10.1.0.1", 4370);
    let terminal = site.install(&endpoint, Terminal::new());
    let h = harness(&site);

    // A manual download currently holds the terminal.
    let manual = h.registry.begin_flight(&endpoint).unwrap();
    assert!(h.registry.is_busy(&endpoint));

    let err = h
        .service
        .fetch_users(DownloadTarget::new(endpoint.clone()))
        .join()
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::Busy(_)));
    assert!(err.is_transient());
    assert!(terminal.log().is_empty());

    drop(manual);
    let pending = h
        .service
        .fetch_users(DownloadTarget::new(endpoint))
        .join()
        .await
        .unwrap();
    pending.decline();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_terminals_download_in_parallel() {
    let site = Site::new();
    let h = {
        let endpoints: Vec<Endpoint> = (1..=6)
            .map(|i| Endpoint::new(format!("10.1.1.{i}"), 4370))
            .collect();
        for endpoint in &endpoints {
            site.install(
                endpoint,
                Terminal::new().with_attendance(vec![punch("1", at(8, 0))]),
            );
        }
        let h = harness(&site);
        let handles: Vec<_> = endpoints
            .iter()
            .map(|e| h.service.fetch_attendance(DownloadTarget::new(e.clone()), false))
            .collect();
        for handle in handles {
            let pending = handle.join().await.unwrap();
            assert_eq!(pending.new_records().len(), 1);
            pending.commit(h.store.as_ref()).unwrap();
        }
        h
    };

    assert!(h.registry.connected_endpoints().is_empty());
    assert_eq!(h.cursors.endpoints().unwrap().len(), 6);
}

#[test]
fn concurrent_connects_share_one_session() {
    let site = Site::new();
    let endpoint = Endpoint::new("10.1.2.1", 4370);
    let terminal = site.install(&endpoint, Terminal::new());
    let registry = Arc::new(zkfleet::SessionRegistry::new(site.factory()));

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let endpoint = endpoint.clone();
            std::thread::spawn(move || {
                registry
                    .connect(&endpoint, 0, Duration::from_secs(1))
                    .unwrap()
                    .id()
            })
        })
        .collect();
    let ids: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();

    assert!(ids.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(registry.connected_endpoints(), vec![endpoint.clone()]);
    // Race losers closed their duplicate connections.
    assert_eq!(terminal.state().open, 1);

    assert!(registry.disconnect(&endpoint));
    assert!(!registry.disconnect(&endpoint));
    assert_eq!(terminal.state().open, 0);
}
