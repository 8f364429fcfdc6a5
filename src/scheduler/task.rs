//! Scheduled task state and execution history

use crate::model::{JobStatus, JobTemplate};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// Execution records kept per task; older ones are discarded
pub const HISTORY_LIMIT: usize = 50;

/// Outcome of a task's most recent run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskRunStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Error,
}

impl TaskRunStatus {
    /// Maps a finished job onto the task's run status
    ///
    /// A stopped job did not complete its work, so the run counts as failed.
    pub fn from_job_status(status: JobStatus) -> Self {
        match status {
            JobStatus::Completed => TaskRunStatus::Completed,
            JobStatus::Failed | JobStatus::Stopped => TaskRunStatus::Failed,
            JobStatus::Error | JobStatus::Running => TaskRunStatus::Error,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskRunStatus::Pending => "pending",
            TaskRunStatus::Running => "running",
            TaskRunStatus::Completed => "completed",
            TaskRunStatus::Failed => "failed",
            TaskRunStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for TaskRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One run of a scheduled task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub status: TaskRunStatus,
    pub records_processed: u64,
    pub errors_count: u64,
    pub duration_seconds: f64,
    pub summary: String,
}

/// A job template that runs every `interval_secs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: String,
    pub name: String,
    pub template: JobTemplate,
    pub interval_secs: u64,
    pub next_run_at: DateTime<Utc>,
    pub is_active: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub last_status: TaskRunStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub history: VecDeque<ExecutionRecord>,
}

impl ScheduledTask {
    /// Creates an active task whose first run is one interval from `now`
    pub fn new(
        name: impl Into<String>,
        template: JobTemplate,
        interval_secs: u64,
        now: DateTime<Utc>,
    ) -> Self {
        let simple = Uuid::new_v4().simple().to_string();
        Self {
            id: format!("scheduled_{}", &simple[..8]),
            name: name.into(),
            template,
            interval_secs,
            next_run_at: now + interval(interval_secs),
            is_active: true,
            last_run_at: None,
            run_count: 0,
            last_status: TaskRunStatus::Pending,
            created_at: now,
            history: VecDeque::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.last_status == TaskRunStatus::Running
    }

    /// Whether the scheduler loop should launch this task at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_running() && self.next_run_at <= now
    }

    /// Records a finished run and schedules the next one from `completed_at`
    pub fn record_run(&mut self, record: ExecutionRecord, completed_at: DateTime<Utc>) {
        self.last_status = record.status;
        self.last_run_at = Some(record.started_at);
        self.run_count += 1;
        self.next_run_at = completed_at + interval(self.interval_secs);

        self.history.push_back(record);
        while self.history.len() > HISTORY_LIMIT {
            self.history.pop_front();
        }
    }

    /// The most recent `limit` runs, oldest first
    pub fn recent_history(&self, limit: usize) -> Vec<ExecutionRecord> {
        let skip = self.history.len().saturating_sub(limit);
        self.history.iter().skip(skip).cloned().collect()
    }
}

fn interval(secs: u64) -> Duration {
    Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1000))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, status: TaskRunStatus, at: DateTime<Utc>) -> ExecutionRecord {
        ExecutionRecord {
            execution_id: id.to_string(),
            started_at: at,
            ended_at: at,
            status,
            records_processed: 0,
            errors_count: 0,
            duration_seconds: 0.0,
            summary: String::new(),
        }
    }

    #[test]
    fn test_new_task() {
        let now = Utc::now();
        let task = ScheduledTask::new("hourly", JobTemplate::new(1, 1, "all"), 3600, now);

        assert!(task.id.starts_with("scheduled_"));
        assert_eq!(task.id.len(), "scheduled_".len() + 8);
        assert_eq!(task.next_run_at, now + Duration::seconds(3600));
        assert_eq!(task.last_status, TaskRunStatus::Pending);
        assert!(!task.is_due(now));
        assert!(task.is_due(now + Duration::seconds(3600)));
    }

    #[test]
    fn test_record_run_schedules_from_completion() {
        let start = Utc::now();
        let mut task = ScheduledTask::new("t", JobTemplate::new(1, 1, "all"), 5, start);
        let completed = start + Duration::seconds(3);

        task.record_run(record("e1", TaskRunStatus::Completed, start), completed);

        assert_eq!(task.next_run_at, completed + Duration::seconds(5));
        assert_eq!(task.run_count, 1);
        assert_eq!(task.last_run_at, Some(start));
        assert_eq!(task.last_status, TaskRunStatus::Completed);
    }

    #[test]
    fn test_history_is_bounded() {
        let now = Utc::now();
        let mut task = ScheduledTask::new("t", JobTemplate::new(1, 1, "all"), 5, now);
        for i in 0..HISTORY_LIMIT + 7 {
            task.record_run(record(&i.to_string(), TaskRunStatus::Completed, now), now);
        }

        assert_eq!(task.history.len(), HISTORY_LIMIT);
        assert_eq!(task.history.front().unwrap().execution_id, "7");

        let recent = task.recent_history(3);
        let ids: Vec<&str> = recent.iter().map(|r| r.execution_id.as_str()).collect();
        assert_eq!(ids, vec!["54", "55", "56"]);
    }

    #[test]
    fn test_running_or_inactive_is_not_due() {
        let now = Utc::now();
        let mut task = ScheduledTask::new("t", JobTemplate::new(1, 1, "all"), 5, now);
        let later = now + Duration::seconds(10);

        task.last_status = TaskRunStatus::Running;
        assert!(!task.is_due(later));

        task.last_status = TaskRunStatus::Failed;
        task.is_active = false;
        assert!(!task.is_due(later));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            TaskRunStatus::from_job_status(JobStatus::Completed),
            TaskRunStatus::Completed
        );
        assert_eq!(
            TaskRunStatus::from_job_status(JobStatus::Stopped),
            TaskRunStatus::Failed
        );
        assert_eq!(
            TaskRunStatus::from_job_status(JobStatus::Error),
            TaskRunStatus::Error
        );
    }
}
