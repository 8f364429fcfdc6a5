//! Scheduler tests driving real crawl jobs

use crate::common::{create_test_config, mount_site};
use async_trait::async_trait;
use fundscout::clock::{SharedClock, SystemClock};
use fundscout::crawler::build_orchestrator;
use fundscout::model::{JobStatus, JobTemplate};
use fundscout::scheduler::{JobLauncher, JobOutcome, ScheduledTask, TaskRunStatus, TaskScheduler};
use fundscout::storage::{SqliteStorage, TaskStore};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::MockServer;

struct IdleLauncher;

#[async_trait]
impl JobLauncher for IdleLauncher {
    async fn launch(&self, _template: JobTemplate, _cancel: CancellationToken) -> JobOutcome {
        JobOutcome {
            status: JobStatus::Completed,
            records_processed: 0,
            errors_count: 0,
            summary: "idle".to_string(),
        }
    }
}

/// Polls until the task has finished `runs` runs
async fn wait_for_runs(scheduler: &TaskScheduler, task_id: &str, runs: u64) -> ScheduledTask {
    for _ in 0..200 {
        if let Some(task) = scheduler.get_task(task_id) {
            if task.run_count >= runs && !task.is_running() {
                return task;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("task {} did not finish {} runs in time", task_id, runs);
}

#[tokio::test]
async fn test_run_now_crawls_and_persists_history() {
    let server = MockServer::start().await;
    mount_site(&server).await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("fundscout.db");
    let config = Arc::new(create_test_config(&server.uri(), &db_path, None));
    let storage = Arc::new(SqliteStorage::new(&db_path).unwrap());
    let clock: SharedClock = Arc::new(SystemClock);

    let orchestrator = build_orchestrator(config.clone(), storage.clone(), clock.clone())
        .await
        .unwrap();
    let scheduler = TaskScheduler::new(
        config.scheduler.clone(),
        Arc::new(orchestrator),
        Some(storage.clone()),
        clock.clone(),
    );

    let task_id = scheduler
        .add_task("games hourly", JobTemplate::new(1, 1, "games"), 3600)
        .unwrap();
    let execution_id = scheduler.run_now(&task_id).unwrap();

    let task = wait_for_runs(&scheduler, &task_id, 1).await;
    assert_eq!(task.last_status, TaskRunStatus::Completed);
    assert!(task.last_run_at.is_some());

    let history = scheduler.history(&task_id, 10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].execution_id, execution_id);
    assert_eq!(history[0].status, TaskRunStatus::Completed);
    assert_eq!(history[0].records_processed, 2);
    assert_eq!(history[0].errors_count, 1);
    assert_eq!(storage.count_records().unwrap(), 2);

    // The store is written just after the in-memory task is updated
    let mut stored = storage.load_tasks().unwrap();
    for _ in 0..40 {
        if stored.first().is_some_and(|t| t.run_count == 1) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
        stored = storage.load_tasks().unwrap();
    }
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, task_id);
    assert_eq!(stored[0].run_count, 1);
    assert_eq!(stored[0].history.len(), 1);

    // A fresh scheduler over the same store picks the task up again
    let restarted = TaskScheduler::new(
        config.scheduler.clone(),
        Arc::new(IdleLauncher),
        Some(storage.clone()),
        clock,
    );
    restarted.start().unwrap();
    let reloaded = restarted.get_task(&task_id).expect("task reloaded");
    assert_eq!(reloaded.name, "games hourly");
    assert_eq!(reloaded.run_count, 1);
    assert_eq!(restarted.history(&task_id, 10).unwrap().len(), 1);
    assert!(restarted.health().running);

    restarted.stop().await;
    assert!(!restarted.health().running);
}

#[tokio::test]
async fn test_task_changes_reach_the_store() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("fundscout.db");
    let config = create_test_config("http://127.0.0.1:9", &db_path, None);
    let storage = Arc::new(SqliteStorage::new(&db_path).unwrap());

    let scheduler = TaskScheduler::new(
        config.scheduler.clone(),
        Arc::new(IdleLauncher),
        Some(storage.clone()),
        Arc::new(SystemClock),
    );

    let task_id = scheduler
        .add_task("nightly", JobTemplate::new(1, 5, "tablegames"), 86_400)
        .unwrap();
    assert!(!scheduler.toggle(&task_id).unwrap());

    let stored = storage.load_tasks().unwrap();
    assert_eq!(stored.len(), 1);
    assert!(!stored[0].is_active);
    assert_eq!(stored[0].template.page_to, 5);

    scheduler.remove_task(&task_id).unwrap();
    assert!(storage.load_tasks().unwrap().is_empty());
}
