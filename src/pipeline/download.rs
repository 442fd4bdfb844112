//! The per-terminal download state machine.

use crate::device::{AttendanceRecord, DeviceDriver, Endpoint, UserRecord};
use crate::error::{FleetError, Result};
use crate::executor::TaskLog;
use crate::pipeline::Stage;
use crate::session::{Session, SessionRegistry};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Runs one download against one terminal.
///
/// Blocking; call it from a [`TaskExecutor`](crate::executor::TaskExecutor)
/// worker. Once a session is open, enable and disconnect run on every exit
/// path, including an unwinding panic in the driver.
pub struct DownloadPipeline {
    registry: Arc<SessionRegistry>,
    connect_timeout: Duration,
}

impl DownloadPipeline {
    pub fn new(registry: Arc<SessionRegistry>, connect_timeout: Duration) -> Self {
        Self {
            registry,
            connect_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Fetch the full attendance set, optionally clearing the terminal's
    /// log afterwards.
    ///
    /// # Errors
    ///
    /// [`FleetError::Busy`] when another download holds the endpoint;
    /// otherwise failures are wrapped in [`FleetError::Pipeline`] with the
    /// stage they occurred in.
    pub fn fetch_attendance(
        &self,
        endpoint: &Endpoint,
        password: u32,
        purge: bool,
        log: &TaskLog,
    ) -> Result<Vec<AttendanceRecord>> {
        self.run(endpoint, password, log, |driver, stage, log| {
            let records = driver.attendance()?;
            log.info(format!("fetched {} attendance records", records.len()));
            if purge {
                *stage = Stage::Purging;
                driver.clear_attendance()?;
                log.info("device attendance log cleared");
            }
            Ok(records)
        })
    }

    /// Fetch the full enrolled user list.
    ///
    /// # Errors
    ///
    /// Same as [`fetch_attendance`](Self::fetch_attendance).
    pub fn fetch_users(&self, endpoint: &Endpoint, password: u32, log: &TaskLog) -> Result<Vec<UserRecord>> {
        self.run(endpoint, password, log, |driver, _stage, log| {
            let users = driver.users()?;
            log.info(format!("fetched {} users", users.len()));
            Ok(users)
        })
    }

    fn run<T>(
        &self,
        endpoint: &Endpoint,
        password: u32,
        log: &TaskLog,
        fetch: impl FnOnce(&mut dyn DeviceDriver, &mut Stage, &TaskLog) -> Result<T>,
    ) -> Result<T> {
        let _flight = self.registry.begin_flight(endpoint)?;

        log.info(format!("connecting to {endpoint}"));
        let session = self
            .registry
            .connect(endpoint, password, self.connect_timeout)
            .map_err(|e| failed(endpoint, Stage::Connecting, e))?;

        let mut epilogue = Epilogue::new(&self.registry, session);
        let mut stage = Stage::Disabling;
        let body = epilogue.session.with_driver(|driver| {
            driver.disable_device()?;
            stage = Stage::Fetching;
            fetch(driver, &mut stage, log)
        });

        let body_stage = stage;
        for problem in epilogue.finish() {
            log.warn(problem);
        }

        match body {
            Ok(records) => {
                debug!(endpoint = %endpoint, "download pipeline reached {}", Stage::Done);
                Ok(records)
            }
            Err(e) => {
                log.error(format!("failed while {body_stage}: {e}"));
                Err(failed(endpoint, body_stage, e))
            }
        }
    }
}

fn failed(endpoint: &Endpoint, stage: Stage, source: FleetError) -> FleetError {
    FleetError::Pipeline {
        endpoint: endpoint.clone(),
        stage,
        source: Box::new(source),
    }
}

/// Re-enables the terminal and closes the session exactly once, either
/// through [`finish`](Self::finish) or on drop.
struct Epilogue<'a> {
    registry: &'a SessionRegistry,
    session: Arc<Session>,
    done: bool,
}

impl<'a> Epilogue<'a> {
    fn new(registry: &'a SessionRegistry, session: Arc<Session>) -> Self {
        Self {
            registry,
            session,
            done: false,
        }
    }

    /// Run enable + disconnect. Returns problems encountered; they are
    /// never escalated over the primary outcome.
    fn finish(&mut self) -> Vec<String> {
        if self.done {
            return Vec::new();
        }
        self.done = true;

        let mut problems = Vec::new();
        debug!(endpoint = %self.session.endpoint(), "pipeline {}", Stage::Enabling);
        if let Err(e) = self
            .session
            .with_driver_recovering(|driver| driver.enable_device())
        {
            warn!(endpoint = %self.session.endpoint(), "could not re-enable device: {e}");
            problems.push(format!("could not re-enable device: {e}"));
        }
        debug!(endpoint = %self.session.endpoint(), "pipeline {}", Stage::Disconnecting);
        if let Err(e) = self.registry.release(&self.session) {
            warn!(endpoint = %self.session.endpoint(), "could not disconnect cleanly: {e}");
            problems.push(format!("could not disconnect cleanly: {e}"));
        }
        problems
    }
}

impl Drop for Epilogue<'_> {
    fn drop(&mut self) {
        if !self.done {
            warn!(endpoint = %self.session.endpoint(), "download interrupted, restoring device");
            self.finish();
        }
    }
}
