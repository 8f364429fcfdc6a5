//! Periodic execution of crawl job templates
//!
//! This module handles:
//! - Task registration, activation and removal
//! - A fixed-tick loop that launches due tasks under a concurrency ceiling
//! - Per-run completion bookkeeping (execution history, next run time)
//! - Heartbeat-based health reporting
//!
//! The task map is the only shared state. It lives behind a `std::sync::Mutex` that
//! is never held across an await: each tick decides what to launch under the lock
//! and spawns the runs after releasing it.

mod launcher;
mod task;

pub use launcher::{JobLauncher, JobOutcome};
pub use task::{ExecutionRecord, ScheduledTask, TaskRunStatus, HISTORY_LIMIT};

use crate::clock::SharedClock;
use crate::config::SchedulerConfig;
use crate::model::JobTemplate;
use crate::storage::{StorageError, TaskStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Shortest interval a task may be scheduled with
pub const MIN_INTERVAL_SECS: u64 = 5;

/// Errors returned by scheduler operations
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Interval must be at least {min} seconds, got {actual}")]
    InvalidInterval { min: u64, actual: u64 },

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task is currently running: {0}")]
    TaskRunning(String),

    #[error("Task is inactive: {0}")]
    TaskInactive(String),

    #[error("Task store error: {0}")]
    Store(#[from] StorageError),
}

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Snapshot of the scheduler's liveness
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerHealth {
    /// Whether the loop task is alive
    pub running: bool,
    /// Loop alive and heartbeat fresh
    pub healthy: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub total_tasks: usize,
    pub active_tasks: usize,
    pub running_tasks: usize,
}

/// What a single tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub launched: Vec<String>,
    pub deferred: Vec<String>,
}

struct RunHandle {
    cancel: CancellationToken,
    /// Set right after the run is spawned; `None` only in that short window or
    /// once `stop` has taken it
    handle: Option<JoinHandle<()>>,
}

struct LoopHandle {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct State {
    tasks: HashMap<String, ScheduledTask>,
    runs: HashMap<String, RunHandle>,
    heartbeat: Option<DateTime<Utc>>,
    loop_task: Option<LoopHandle>,
}

struct Inner {
    config: SchedulerConfig,
    launcher: Arc<dyn JobLauncher>,
    store: Option<Arc<dyn TaskStore>>,
    clock: SharedClock,
    state: Mutex<State>,
}

/// Runs job templates on fixed intervals
///
/// Cloning yields another handle to the same scheduler.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<Inner>,
}

impl TaskScheduler {
    pub fn new(
        config: SchedulerConfig,
        launcher: Arc<dyn JobLauncher>,
        store: Option<Arc<dyn TaskStore>>,
        clock: SharedClock,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                launcher,
                store,
                clock,
                state: Mutex::new(State::default()),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a task; its first run is one interval from now
    pub fn add_task(
        &self,
        name: &str,
        template: JobTemplate,
        interval_secs: u64,
    ) -> SchedulerResult<String> {
        if interval_secs < MIN_INTERVAL_SECS {
            return Err(SchedulerError::InvalidInterval {
                min: MIN_INTERVAL_SECS,
                actual: interval_secs,
            });
        }

        let task = ScheduledTask::new(name, template, interval_secs, self.inner.clock.now());
        let id = task.id.clone();
        tracing::info!(
            task_id = %id,
            interval_secs,
            next_run_at = %task.next_run_at,
            "Added scheduled task '{}'",
            name
        );

        self.persist(&task);
        self.lock().tasks.insert(id.clone(), task);
        Ok(id)
    }

    /// Removes a task; refused while it is running
    pub fn remove_task(&self, task_id: &str) -> SchedulerResult<()> {
        {
            let mut state = self.lock();
            let task = state
                .tasks
                .get(task_id)
                .ok_or_else(|| SchedulerError::TaskNotFound(task_id.to_string()))?;
            if task.is_running() {
                return Err(SchedulerError::TaskRunning(task_id.to_string()));
            }
            state.tasks.remove(task_id);
        }

        if let Some(store) = &self.inner.store {
            if let Err(e) = store.remove_task(task_id) {
                tracing::warn!("Failed to remove task {} from store: {}", task_id, e);
            }
        }
        tracing::info!(task_id, "Removed scheduled task");
        Ok(())
    }

    /// Flips a task between active and inactive; returns the new state
    pub fn toggle(&self, task_id: &str) -> SchedulerResult<bool> {
        let task = {
            let mut state = self.lock();
            let task = state
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| SchedulerError::TaskNotFound(task_id.to_string()))?;
            task.is_active = !task.is_active;
            task.clone()
        };

        tracing::info!(task_id, active = task.is_active, "Toggled scheduled task");
        self.persist(&task);
        Ok(task.is_active)
    }

    /// Launches a task immediately, outside the concurrency ceiling
    ///
    /// Returns the execution id of the new run.
    pub fn run_now(&self, task_id: &str) -> SchedulerResult<String> {
        let (template, cancel) = {
            let mut state = self.lock();
            let task = state
                .tasks
                .get(task_id)
                .ok_or_else(|| SchedulerError::TaskNotFound(task_id.to_string()))?;
            if !task.is_active {
                return Err(SchedulerError::TaskInactive(task_id.to_string()));
            }
            if task.is_running() {
                return Err(SchedulerError::TaskRunning(task_id.to_string()));
            }
            let template = task.template.clone();
            (template, reserve_run(&mut state, task_id))
        };

        tracing::info!(task_id, "Running scheduled task now");
        Ok(self.spawn_run(task_id.to_string(), template, cancel))
    }

    /// All tasks, earliest next run first
    pub fn list_tasks(&self) -> Vec<ScheduledTask> {
        let mut tasks: Vec<ScheduledTask> = self.lock().tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.next_run_at.cmp(&b.next_run_at).then_with(|| a.id.cmp(&b.id)));
        tasks
    }

    pub fn get_task(&self, task_id: &str) -> Option<ScheduledTask> {
        self.lock().tasks.get(task_id).cloned()
    }

    /// The most recent `limit` runs of a task, oldest first
    pub fn history(&self, task_id: &str, limit: usize) -> SchedulerResult<Vec<ExecutionRecord>> {
        self.lock()
            .tasks
            .get(task_id)
            .map(|task| task.recent_history(limit))
            .ok_or_else(|| SchedulerError::TaskNotFound(task_id.to_string()))
    }

    pub fn health(&self) -> SchedulerHealth {
        let now = self.inner.clock.now();
        let state = self.lock();

        let running = state
            .loop_task
            .as_ref()
            .is_some_and(|l| !l.handle.is_finished());
        let fresh = state
            .heartbeat
            .is_some_and(|beat| now - beat <= self.inner.config.heartbeat_stale());

        SchedulerHealth {
            running,
            healthy: running && fresh,
            last_heartbeat: state.heartbeat,
            total_tasks: state.tasks.len(),
            active_tasks: state.tasks.values().filter(|t| t.is_active).count(),
            running_tasks: state.tasks.values().filter(|t| t.is_running()).count(),
        }
    }

    /// Loads persisted tasks and starts the tick loop
    ///
    /// Calling `start` on a running scheduler does nothing.
    pub fn start(&self) -> SchedulerResult<()> {
        let loaded = match &self.inner.store {
            Some(store) => store.load_tasks()?,
            None => Vec::new(),
        };

        let mut state = self.lock();
        if state
            .loop_task
            .as_ref()
            .is_some_and(|l| !l.handle.is_finished())
        {
            return Ok(());
        }

        let count = loaded.len();
        for mut task in loaded {
            // A run that was in flight when the process died will never report back
            if task.is_running() {
                task.last_status = TaskRunStatus::Pending;
            }
            state.tasks.entry(task.id.clone()).or_insert(task);
        }
        if count > 0 {
            tracing::info!("Loaded {} scheduled tasks from store", count);
        }

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let scheduler = self.clone();
        let period = self.inner.config.check_interval();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        scheduler.tick();
                    }
                }
            }
            tracing::debug!("Scheduler loop exited");
        });

        state.loop_task = Some(LoopHandle { shutdown, handle });
        tracing::info!(
            check_interval_secs = self.inner.config.check_interval_secs,
            max_concurrent_tasks = self.inner.config.max_concurrent_tasks,
            "Scheduler started"
        );
        Ok(())
    }

    /// Stops the loop and cancels running jobs, waiting a bounded time for each
    pub async fn stop(&self) {
        let timeout = self.inner.config.join_timeout();
        let (loop_task, runs) = {
            let mut state = self.lock();
            let runs: Vec<(String, CancellationToken, Option<JoinHandle<()>>)> = state
                .runs
                .iter_mut()
                .map(|(id, run)| (id.clone(), run.cancel.clone(), run.handle.take()))
                .collect();
            (state.loop_task.take(), runs)
        };

        if let Some(loop_task) = loop_task {
            loop_task.shutdown.cancel();
            if tokio::time::timeout(timeout, loop_task.handle).await.is_err() {
                tracing::warn!("Scheduler loop did not exit within {:?}", timeout);
            }
        }

        for (_, cancel, _) in &runs {
            cancel.cancel();
        }
        for (task_id, _, handle) in runs {
            if let Some(handle) = handle {
                if tokio::time::timeout(timeout, handle).await.is_err() {
                    tracing::warn!(task_id = %task_id, "Run still in flight after stop");
                }
            }
        }

        tracing::info!("Scheduler stopped");
    }

    /// Runs one scheduling pass
    ///
    /// Refreshes the heartbeat, reaps runs that ended without reporting, and launches
    /// due tasks (earliest first) up to `max_concurrent_tasks - running`. Tasks past the
    /// ceiling are left for a later tick.
    pub fn tick(&self) -> TickReport {
        let now = self.inner.clock.now();
        let mut report = TickReport::default();

        let (to_launch, reaped) = {
            let mut state = self.lock();
            state.heartbeat = Some(now);
            let reaped = reap(&mut state, now);

            let mut due: Vec<(DateTime<Utc>, String, JobTemplate)> = state
                .tasks
                .values()
                .filter(|t| t.is_due(now))
                .map(|t| (t.next_run_at, t.id.clone(), t.template.clone()))
                .collect();
            due.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

            let running = state.tasks.values().filter(|t| t.is_running()).count();
            let slots = self
                .inner
                .config
                .max_concurrent_tasks
                .saturating_sub(running);

            let mut to_launch = Vec::new();
            for (index, (_, task_id, template)) in due.into_iter().enumerate() {
                if index < slots {
                    let cancel = reserve_run(&mut state, &task_id);
                    to_launch.push((task_id, template, cancel));
                } else {
                    report.deferred.push(task_id);
                }
            }
            (to_launch, reaped)
        };

        for task in &reaped {
            tracing::warn!(task_id = %task.id, "Run ended without reporting, marked as error");
            self.persist(task);
        }
        for task_id in &report.deferred {
            tracing::info!(
                task_id = %task_id,
                "Task due but concurrency ceiling reached, deferring"
            );
        }

        for (task_id, template, cancel) in to_launch {
            tracing::info!(task_id = %task_id, "Launching scheduled task");
            self.spawn_run(task_id.clone(), template, cancel);
            report.launched.push(task_id);
        }

        report
    }

    fn spawn_run(&self, task_id: String, template: JobTemplate, cancel: CancellationToken) -> String {
        let execution_id = Uuid::new_v4().to_string();
        let started_at = self.inner.clock.now();
        let launcher = Arc::clone(&self.inner.launcher);
        let scheduler = self.clone();
        let run_cancel = cancel.clone();
        let run_task_id = task_id.clone();
        let run_execution_id = execution_id.clone();

        let handle = tokio::spawn(async move {
            // The job runs in its own task so a panic surfaces as a JoinError here
            let job = tokio::spawn(async move { launcher.launch(template, run_cancel).await });
            let outcome = match job.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => JobOutcome::error("job panicked"),
                Err(_) => JobOutcome::error("job aborted"),
            };
            scheduler.finish_run(&run_task_id, run_execution_id, started_at, outcome);
        });

        let mut state = self.lock();
        match state.runs.get_mut(&task_id) {
            Some(run) => run.handle = Some(handle),
            // Already finished and reported
            None => drop(handle),
        }
        execution_id
    }

    fn finish_run(
        &self,
        task_id: &str,
        execution_id: String,
        started_at: DateTime<Utc>,
        outcome: JobOutcome,
    ) {
        let ended_at = self.inner.clock.now();
        let status = TaskRunStatus::from_job_status(outcome.status);
        let record = ExecutionRecord {
            execution_id,
            started_at,
            ended_at,
            status,
            records_processed: outcome.records_processed,
            errors_count: outcome.errors_count,
            duration_seconds: (ended_at - started_at).num_milliseconds() as f64 / 1000.0,
            summary: outcome.summary,
        };

        let task = {
            let mut state = self.lock();
            state.runs.remove(task_id);
            state.tasks.get_mut(task_id).map(|task| {
                task.record_run(record, ended_at);
                task.clone()
            })
        };

        match task {
            Some(task) => {
                tracing::info!(
                    task_id,
                    status = %status,
                    records = outcome.records_processed,
                    next_run_at = %task.next_run_at,
                    "Scheduled task run finished"
                );
                self.persist(&task);
            }
            None => tracing::warn!(task_id, "Run finished for unknown task"),
        }
    }

    fn persist(&self, task: &ScheduledTask) {
        if let Some(store) = &self.inner.store {
            if let Err(e) = store.save_task(task) {
                tracing::warn!("Failed to persist task {}: {}", task.id, e);
            }
        }
    }
}

/// Marks a task running and registers its cancel token
fn reserve_run(state: &mut State, task_id: &str) -> CancellationToken {
    let cancel = CancellationToken::new();
    if let Some(task) = state.tasks.get_mut(task_id) {
        task.last_status = TaskRunStatus::Running;
    }
    state.runs.insert(
        task_id.to_string(),
        RunHandle {
            cancel: cancel.clone(),
            handle: None,
        },
    );
    cancel
}

/// Drops handles of runs whose task finished without calling back
fn reap(state: &mut State, now: DateTime<Utc>) -> Vec<ScheduledTask> {
    let finished: Vec<String> = state
        .runs
        .iter()
        .filter(|(_, run)| run.handle.as_ref().is_some_and(|h| h.is_finished()))
        .map(|(id, _)| id.clone())
        .collect();

    let mut reaped = Vec::new();
    for task_id in finished {
        state.runs.remove(&task_id);
        if let Some(task) = state.tasks.get_mut(&task_id) {
            if task.is_running() {
                task.record_run(
                    ExecutionRecord {
                        execution_id: Uuid::new_v4().to_string(),
                        started_at: now,
                        ended_at: now,
                        status: TaskRunStatus::Error,
                        records_processed: 0,
                        errors_count: 1,
                        duration_seconds: 0.0,
                        summary: "run ended without reporting".to_string(),
                    },
                    now,
                );
                reaped.push(task.clone());
            }
        }
    }
    reaped
}
