//! Background job scheduling
//!
//! Each registered job gets its own tokio task that sleeps until the next
//! fire time of its schedule (wall clock, configured timezone), runs the
//! handler and goes back to sleep. Runs are fire-and-forget: a failed run is
//! logged and the job stays scheduled for its next tick.

use crate::alerts::AlertDispatcher;
use crate::logger::Logger;
use crate::purge::PurgeJob;
use crate::record::LogData;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use futures::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Body of a scheduled job
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Every n minutes on the minute, aligned to the hour
    EveryMinutes(u32),
    /// Once a day at the given local time
    DailyAt { hour: u32, minute: u32 },
    /// Fixed interval from the previous tick
    Every(std::time::Duration),
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::EveryMinutes(n) => write!(f, "0 */{} * * * *", n),
            Schedule::DailyAt { hour, minute } => write!(f, "0 {} {} * * *", minute, hour),
            Schedule::Every(interval) => write!(f, "@every {}ms", interval.as_millis()),
        }
    }
}

impl Schedule {
    /// First fire time strictly after `now`
    pub fn next_after(&self, now: DateTime<Tz>) -> DateTime<Tz> {
        match *self {
            Schedule::EveryMinutes(n) => {
                let n = n.max(1);
                let mut candidate = now
                    - Duration::seconds(i64::from(now.second()))
                    - Duration::nanoseconds(i64::from(now.nanosecond()));
                // Offsets are whole minutes, so one local hour always holds a match.
                for _ in 0..=60 {
                    candidate += Duration::minutes(1);
                    if candidate.minute() % n == 0 {
                        return candidate;
                    }
                }
                candidate
            }
            Schedule::DailyAt { hour, minute } => {
                let tz = now.timezone();
                let mut date = now.date_naive();
                // A local time skipped by a DST jump moves to the next day.
                for _ in 0..3 {
                    let candidate = date
                        .and_hms_opt(hour, minute, 0)
                        .and_then(|naive| tz.from_local_datetime(&naive).earliest());
                    if let Some(candidate) = candidate {
                        if candidate > now {
                            return candidate;
                        }
                    }
                    match date.succ_opt() {
                        Some(next) => date = next,
                        None => break,
                    }
                }
                now + Duration::days(1)
            }
            Schedule::Every(interval) => {
                now + Duration::from_std(interval).unwrap_or_else(|_| Duration::days(1))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    Scheduled = 0,
    Running = 1,
    /// Terminal
    Destroyed = 2,
}

impl TaskState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskState::Scheduled,
            1 => TaskState::Running,
            _ => TaskState::Destroyed,
        }
    }
}

/// Registered job and the handle of its task loop
pub struct ScheduledTask {
    name: String,
    schedule: Schedule,
    state: Arc<AtomicU8>,
    cancel: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::SeqCst))
    }
}

pub struct ScheduledTaskCoordinator {
    timezone: Tz,
    logger: Logger,
    tasks: Vec<ScheduledTask>,
}

struct TaskLoop {
    name: String,
    schedule: Schedule,
    timezone: Tz,
    handler: Arc<dyn TaskHandler>,
    state: Arc<AtomicU8>,
    logger: Logger,
}

impl TaskLoop {
    fn transition(&self, from: TaskState, to: TaskState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    async fn run(self, mut cancel: watch::Receiver<bool>) {
        loop {
            if *cancel.borrow() {
                break;
            }

            let now = Utc::now().with_timezone(&self.timezone);
            let next = self.schedule.next_after(now);
            let delay = (next - now).to_std().unwrap_or_default();

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.changed() => break,
            }

            // Fails once teardown has marked the task destroyed.
            if !self.transition(TaskState::Scheduled, TaskState::Running) {
                break;
            }

            self.tick().await;

            if !self.transition(TaskState::Running, TaskState::Scheduled) {
                break;
            }
        }

        tracing::debug!(task = %self.name, "Task loop stopped");
    }

    async fn tick(&self) {
        tracing::debug!(task = %self.name, "started");
        self.logger
            .debug(LogData::new(self.name.as_str()).with_message("started"))
            .await;

        let result = AssertUnwindSafe(self.handler.run()).catch_unwind().await;
        let failure = match result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{:#}", e)),
            Err(_) => Some("task handler panicked".to_string()),
        };

        match failure {
            None => {
                tracing::debug!(task = %self.name, "completed");
                self.logger
                    .debug(LogData::new(self.name.as_str()).with_message("completed"))
                    .await;
            }
            Some(message) => {
                tracing::error!(task = %self.name, error = %message, "Scheduled task failed");
                self.logger
                    .error(LogData::new(self.name.as_str()).with_message(message))
                    .await;
            }
        }
    }
}

impl ScheduledTaskCoordinator {
    pub fn new(timezone: Tz, logger: Logger) -> Self {
        Self {
            timezone,
            logger,
            tasks: Vec::new(),
        }
    }

    /// Coordinator with the monitor and purge jobs registered. A disabled
    /// logger has no engine to run them against, so nothing is scheduled.
    pub fn with_default_jobs(logger: Logger) -> Self {
        let Some(engine) = logger.engine().cloned() else {
            tracing::warn!("Logger is disabled, no background jobs scheduled");
            return Self::new(Tz::UTC, logger);
        };

        let settings = engine.settings().clone();
        let mut coordinator = Self::new(settings.timezone, logger);

        coordinator.schedule(
            "monitor",
            Schedule::EveryMinutes(settings.monitor_interval_minutes),
            Arc::new(AlertDispatcher::new(engine.clone())),
        );
        coordinator.schedule(
            "purge",
            Schedule::DailyAt {
                hour: settings.purge_hour,
                minute: settings.purge_minute,
            },
            Arc::new(PurgeJob::new(engine)),
        );

        coordinator
    }

    /// Register a job and start its task loop
    pub fn schedule(&mut self, name: &str, schedule: Schedule, handler: Arc<dyn TaskHandler>) {
        let state = Arc::new(AtomicU8::new(TaskState::Scheduled as u8));
        let (cancel, cancel_rx) = watch::channel(false);

        let task_loop = TaskLoop {
            name: name.to_string(),
            schedule,
            timezone: self.timezone,
            handler,
            state: state.clone(),
            logger: self.logger.clone(),
        };
        let handle = tokio::spawn(task_loop.run(cancel_rx));

        tracing::info!(task = %name, schedule = %schedule, timezone = %self.timezone, "Task scheduled");

        self.tasks.push(ScheduledTask {
            name: name.to_string(),
            schedule,
            state,
            cancel,
            handle: Some(handle),
        });
    }

    pub fn tasks(&self) -> &[ScheduledTask] {
        &self.tasks
    }

    pub fn state(&self, name: &str) -> Option<TaskState> {
        self.tasks.iter().find(|t| t.name == name).map(|t| t.state())
    }

    /// Destroy every task and wait for the loops to exit. A run already in
    /// progress finishes; no new run starts.
    pub async fn shutdown(&mut self) {
        tracing::debug!(tasks = self.tasks.len(), "Terminating pending tasks");
        // Cancel before any await so a slow log write can't let a tick fire.
        for task in &self.tasks {
            task.state.store(TaskState::Destroyed as u8, Ordering::SeqCst);
            let _ = task.cancel.send(true);
        }
        self.logger
            .debug(LogData::new("shutdown").with_message("terminating pending tasks"))
            .await;

        for task in &mut self.tasks {
            if let Some(handle) = task.handle.take() {
                if let Err(e) = handle.await {
                    tracing::error!(task = %task.name, error = %e, "Task loop ended abnormally");
                }
            }
        }
    }
}
