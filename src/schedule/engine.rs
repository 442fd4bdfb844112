//! Recurring automatic downloads.
//!
//! The engine sleeps until the next allowed fire time, re-arms, and then
//! runs one download per enabled device. Device jobs run independently, so
//! an offline terminal only shows up as a failed entry in the
//! [`FireReport`].

use crate::error::{FleetError, Result};
use crate::pipeline::service::stamp;
use crate::pipeline::{CommitReport, DownloadService, DownloadTarget};
use crate::schedule::ScheduleConfig;
use crate::store::{DeviceId, DevicePatch, RecordSink};
use chrono::NaiveDateTime;
use std::sync::Arc;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Source of local wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// The host's local time.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Settings the engine re-reads on every arm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineSettings {
    pub schedule: ScheduleConfig,
    /// Clear terminal logs after a successful fetch.
    pub delete_after_download: bool,
}

/// Outcome for one device in a firing.
#[derive(Debug)]
pub struct DeviceOutcome {
    pub device_id: DeviceId,
    pub name: String,
    pub result: Result<CommitReport>,
}

/// Everything that happened in one firing.
#[derive(Debug)]
pub struct FireReport {
    pub fired_at: NaiveDateTime,
    /// Set when the device list could not be read; `outcomes` is then empty
    /// because no device was attempted.
    pub listing_error: Option<FleetError>,
    pub outcomes: Vec<DeviceOutcome>,
}

impl FireReport {
    /// The firing reached the device list and every device succeeded.
    pub fn is_clean(&self) -> bool {
        self.listing_error.is_none() && self.failed() == 0
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Builds and starts the engine.
pub struct ScheduleEngine {
    service: DownloadService,
    sink: Arc<dyn RecordSink>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

impl ScheduleEngine {
    pub fn new(service: DownloadService, sink: Arc<dyn RecordSink>, settings: EngineSettings) -> Self {
        Self {
            service,
            sink,
            clock: Arc::new(LocalClock),
            settings,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Spawn the engine loop on the current runtime.
    pub fn start(self) -> ScheduleHandle {
        let (settings_tx, settings_rx) = watch::channel(self.settings);
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let trigger = Arc::new(Notify::new());

        let job = FireJob {
            service: self.service,
            sink: self.sink,
            clock: Arc::clone(&self.clock),
        };
        let task = tokio::spawn(run_loop(
            job,
            self.clock,
            settings_rx,
            report_tx,
            cancel.clone(),
            Arc::clone(&trigger),
        ));

        ScheduleHandle {
            settings: settings_tx,
            reports: report_rx,
            cancel,
            trigger,
            task,
        }
    }
}

/// Control surface of a running engine.
pub struct ScheduleHandle {
    settings: watch::Sender<EngineSettings>,
    reports: mpsc::UnboundedReceiver<FireReport>,
    cancel: CancellationToken,
    trigger: Arc<Notify>,
    task: JoinHandle<()>,
}

impl ScheduleHandle {
    /// Replace the schedule. The engine re-arms immediately; disabling
    /// parks it until re-enabled.
    pub fn reconfigure(&self, schedule: ScheduleConfig) {
        self.settings.send_modify(|s| s.schedule = schedule);
    }

    pub fn set_delete_after_download(&self, enabled: bool) {
        self.settings
            .send_modify(|s| s.delete_after_download = enabled);
    }

    pub fn settings(&self) -> EngineSettings {
        *self.settings.borrow()
    }

    /// Run a firing now without changing the schedule.
    pub fn trigger_now(&self) {
        self.trigger.notify_one();
    }

    /// Next completed firing, or `None` after shutdown.
    pub async fn next_report(&mut self) -> Option<FireReport> {
        self.reports.recv().await
    }

    /// Stop the loop. Firings already in progress finish in the background.
    ///
    /// # Errors
    ///
    /// [`FleetError::Scheduler`] if the loop task panicked.
    pub async fn shutdown(self) -> Result<()> {
        self.cancel.cancel();
        self.task
            .await
            .map_err(|e| FleetError::Scheduler(format!("schedule loop ended abnormally: {e}")))
    }
}

async fn run_loop(
    job: FireJob,
    clock: Arc<dyn Clock>,
    mut settings_rx: watch::Receiver<EngineSettings>,
    report_tx: mpsc::UnboundedSender<FireReport>,
    cancel: CancellationToken,
    trigger: Arc<Notify>,
) {
    let job = Arc::new(job);
    let mut last_fire: Option<NaiveDateTime> = None;

    loop {
        let schedule = settings_rx.borrow_and_update().schedule;

        let sleep = if schedule.enabled {
            let now = clock.now();
            // Wall clock and timer may disagree by a few ms; never re-fire
            // the slot that just ran.
            let from = last_fire.map_or(now, |last| last.max(now));
            let fire_at = schedule.next_fire_at(from);
            let delay = (fire_at - now).to_std().unwrap_or_default();
            info!(
                "next automatic download {}",
                schedule.clock_display.format_datetime(fire_at)
            );
            Some((fire_at, delay))
        } else {
            debug!("automatic download disabled");
            None
        };

        let fire_at = tokio::select! {
            () = cancel.cancelled() => break,
            changed = settings_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                debug!("schedule changed, re-arming");
                continue;
            }
            () = trigger.notified() => clock.now(),
            Some(fire_at) = sleep_until(sleep) => {
                last_fire = Some(fire_at);
                fire_at
            }
        };

        // Re-armed on the next iteration before this firing completes.
        let job = Arc::clone(&job);
        let report_tx = report_tx.clone();
        let purge = settings_rx.borrow().delete_after_download;
        tokio::spawn(async move {
            let report = job.fire(fire_at, purge).await;
            match &report.listing_error {
                Some(e) => warn!("automatic download aborted, no devices attempted: {e}"),
                None => info!(
                    "automatic download finished: {} ok, {} failed",
                    report.succeeded(),
                    report.failed()
                ),
            }
            let _ = report_tx.send(report);
        });
    }
    debug!("schedule loop stopped");
}

/// Sleep for the armed delay; pending forever when disarmed.
async fn sleep_until(armed: Option<(NaiveDateTime, std::time::Duration)>) -> Option<NaiveDateTime> {
    match armed {
        Some((fire_at, delay)) => {
            tokio::time::sleep(delay).await;
            Some(fire_at)
        }
        None => std::future::pending().await,
    }
}

struct FireJob {
    service: DownloadService,
    sink: Arc<dyn RecordSink>,
    clock: Arc<dyn Clock>,
}

impl FireJob {
    async fn fire(&self, scheduled_for: NaiveDateTime, purge: bool) -> FireReport {
        let fired_at = self.clock.now();
        debug!("firing slot scheduled for {scheduled_for}");

        let sink = Arc::clone(&self.sink);
        let listed = tokio::task::spawn_blocking(move || sink.enabled_devices())
            .await
            .map_err(|e| FleetError::Task(format!("device listing task failed: {e}")))
            .and_then(|listed| listed);
        let devices = match listed {
            Ok(devices) => devices,
            Err(e) => {
                return FireReport {
                    fired_at,
                    listing_error: Some(e),
                    outcomes: Vec::new(),
                };
            }
        };

        let mut jobs = JoinSet::new();
        for device in devices {
            let service = self.service.clone();
            let sink = Arc::clone(&self.sink);
            jobs.spawn(async move {
                let target = DownloadTarget::from(&device);
                let result = download_one(&service, Arc::clone(&sink), target.clone(), purge).await;
                if let Err(e) = &result {
                    warn!(endpoint = %target.endpoint, "automatic download failed: {e}");
                    if !matches!(e, FleetError::Persistence(_)) {
                        let message = e.to_string();
                        let _ = tokio::task::spawn_blocking(move || {
                            stamp(sink.as_ref(), &target, DevicePatch::failed(message));
                        })
                        .await;
                    }
                }
                DeviceOutcome {
                    device_id: device.id,
                    name: device.name,
                    result,
                }
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!("device job ended abnormally: {e}"),
            }
        }
        outcomes.sort_by_key(|o| o.device_id);

        FireReport {
            fired_at,
            listing_error: None,
            outcomes,
        }
    }
}

async fn download_one(
    service: &DownloadService,
    sink: Arc<dyn RecordSink>,
    target: DownloadTarget,
    purge: bool,
) -> Result<CommitReport> {
    let pending = service.fetch_attendance(target, purge).join().await?;
    tokio::task::spawn_blocking(move || pending.commit(sink.as_ref()))
        .await
        .map_err(|e| FleetError::Task(format!("commit task failed: {e}")))?
}
