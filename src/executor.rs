//! Background execution of blocking device work.
//!
//! [`TaskExecutor`] runs each submission on a dedicated blocking worker,
//! never on the caller's thread, behind a fixed number of permits so a
//! scheduled download across many terminals cannot spawn unbounded threads.
//!
//! Every submission produces, in order:
//! - zero or more [`TaskEvent::Log`] notifications, then
//! - exactly one of [`TaskEvent::Completed`] or [`TaskEvent::Failed`].
//!
//! A panicking work item is reported as [`FleetError::Task`]. The permit is
//! returned to the pool after the terminal signal has been handed off.
//! In-flight work cannot be cancelled.

use crate::error::{FleetError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default number of concurrently running tasks.
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 4;

/// Severity of a progress notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => f.write_str("INFO"),
            Self::Warn => f.write_str("WARN"),
            Self::Error => f.write_str("ERROR"),
        }
    }
}

/// A progress notification emitted by running work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub message: String,
    pub level: LogLevel,
}

/// Signals delivered for one submission.
#[derive(Debug)]
pub enum TaskEvent<T> {
    /// Progress narration (connecting, counts fetched...).
    Log(LogLine),
    /// Terminal success signal.
    Completed(T),
    /// Terminal failure signal.
    Failed(FleetError),
}

/// Progress sink handed to running work.
///
/// Lines are forwarded to the task's [`TaskHandle`] and mirrored into
/// `tracing` at the matching level.
pub struct TaskLog {
    task_id: Uuid,
    label: String,
    tx: mpsc::UnboundedSender<LogLine>,
}

impl TaskLog {
    pub fn emit(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info => info!(task = %self.task_id, "{}: {message}", self.label),
            LogLevel::Warn => warn!(task = %self.task_id, "{}: {message}", self.label),
            LogLevel::Error => error!(task = %self.task_id, "{}: {message}", self.label),
        }
        // The handle may already be gone; narration is best-effort.
        let _ = self.tx.send(LogLine { message, level });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(LogLevel::Error, message);
    }

    /// A sink that only mirrors into `tracing`, for running work inline.
    pub fn detached(label: impl Into<String>) -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self {
            task_id: Uuid::new_v4(),
            label: label.into(),
            tx,
        }
    }
}

/// Receiving side of one submission.
pub struct TaskHandle<T> {
    id: Uuid,
    label: String,
    logs: mpsc::UnboundedReceiver<LogLine>,
    outcome: Option<oneshot::Receiver<Result<T>>>,
}

impl<T> TaskHandle<T> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Next signal, or `None` once the terminal signal has been delivered.
    ///
    /// All log lines are yielded before the terminal signal.
    pub async fn next_event(&mut self) -> Option<TaskEvent<T>> {
        if let Some(line) = self.logs.recv().await {
            return Some(TaskEvent::Log(line));
        }
        let outcome = self.outcome.take()?;
        Some(match outcome.await {
            Ok(Ok(value)) => TaskEvent::Completed(value),
            Ok(Err(e)) => TaskEvent::Failed(e),
            Err(_) => TaskEvent::Failed(FleetError::Task(format!(
                "task '{}' ended without a result",
                self.label
            ))),
        })
    }

    /// Wait for the terminal signal, discarding log lines.
    pub async fn join(mut self) -> Result<T> {
        loop {
            match self.next_event().await {
                Some(TaskEvent::Log(_)) => continue,
                Some(TaskEvent::Completed(value)) => return Ok(value),
                Some(TaskEvent::Failed(e)) => return Err(e),
                None => {
                    return Err(FleetError::Task(format!(
                        "task '{}' already delivered its result",
                        self.label
                    )));
                }
            }
        }
    }

    /// Drive the handle to completion on the runtime, invoking callbacks.
    pub fn dispatch(mut self, mut callbacks: TaskCallbacks<T>) -> JoinHandle<()>
    where
        T: Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(event) = self.next_event().await {
                match event {
                    TaskEvent::Log(line) => (callbacks.on_log)(line),
                    TaskEvent::Completed(value) => {
                        (callbacks.on_result)(value);
                        return;
                    }
                    TaskEvent::Failed(e) => {
                        (callbacks.on_error)(e);
                        return;
                    }
                }
            }
        })
    }
}

/// Callback form of the task signals. `on_result` and `on_error` are
/// `FnOnce`; only one of them is ever called.
pub struct TaskCallbacks<T> {
    pub on_log: Box<dyn FnMut(LogLine) + Send>,
    pub on_result: Box<dyn FnOnce(T) + Send>,
    pub on_error: Box<dyn FnOnce(FleetError) + Send>,
}

impl<T> TaskCallbacks<T> {
    pub fn new(
        on_result: impl FnOnce(T) + Send + 'static,
        on_error: impl FnOnce(FleetError) + Send + 'static,
    ) -> Self {
        Self {
            on_log: Box::new(|_| {}),
            on_result: Box::new(on_result),
            on_error: Box::new(on_error),
        }
    }

    pub fn with_log(mut self, on_log: impl FnMut(LogLine) + Send + 'static) -> Self {
        self.on_log = Box::new(on_log);
        self
    }
}

/// Bounded pool of blocking workers.
#[derive(Clone)]
pub struct TaskExecutor {
    runtime: Handle,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
}

impl TaskExecutor {
    /// Create an executor that spawns onto `runtime`.
    pub fn new(runtime: Handle, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            runtime,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Create an executor on the current runtime.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::Task`] when called outside a Tokio runtime.
    pub fn from_current(max_concurrent: usize) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| FleetError::Task(format!("no async runtime available: {e}")))?;
        Ok(Self::new(runtime, max_concurrent))
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Number of submissions currently holding a worker.
    pub fn running(&self) -> usize {
        self.max_concurrent
            .saturating_sub(self.permits.available_permits())
    }

    /// Run `work` on a blocking worker once a permit is free.
    pub fn submit<T, F>(&self, label: impl Into<String>, work: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&TaskLog) -> Result<T> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let label = label.into();
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();
        let permits = Arc::clone(&self.permits);
        let task_log = TaskLog {
            task_id: id,
            label: label.clone(),
            tx: log_tx,
        };
        let worker_label = label.clone();

        self.runtime.spawn(async move {
            let permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    let _ = done_tx.send(Err(FleetError::Task(format!(
                        "worker pool closed: {e}"
                    ))));
                    return;
                }
            };
            debug!(task = %id, "starting '{worker_label}'");

            // The log sink is moved into the worker so the log channel closes
            // exactly when the work returns or unwinds.
            let joined = tokio::task::spawn_blocking(move || work(&task_log)).await;
            let outcome = match joined {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(FleetError::Task(format!(
                    "task '{worker_label}' panicked: {}",
                    panic_message(e.into_panic())
                ))),
                Err(e) => Err(FleetError::Task(format!(
                    "task '{worker_label}' was cancelled: {e}"
                ))),
            };

            match &outcome {
                Ok(_) => debug!(task = %id, "'{worker_label}' completed"),
                Err(e) => warn!(task = %id, "'{worker_label}' failed: {e}"),
            }
            if done_tx.send(outcome).is_err() {
                debug!(task = %id, "result receiver dropped for '{worker_label}'");
            }
            drop(permit);
        });

        TaskHandle {
            id,
            label,
            logs: log_rx,
            outcome: Some(done_rx),
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_owned();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "unknown panic payload".to_owned()
}
