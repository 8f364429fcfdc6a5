//! End-to-end crawl tests against a mock site

use crate::common::{create_test_config, mount_site};
use fundscout::clock::SystemClock;
use fundscout::crawler::build_orchestrator;
use fundscout::model::{JobStatus, JobTemplate};
use fundscout::output::{export_records, format_markdown_summary, ExportFormat};
use fundscout::storage::SqliteStorage;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::MockServer;

#[tokio::test]
async fn test_crawl_saves_valid_records_and_reports_failures() {
    let server = MockServer::start().await;
    mount_site(&server).await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("fundscout.db");
    let config = Arc::new(create_test_config(&server.uri(), &db_path, None));
    let storage = Arc::new(SqliteStorage::new(&db_path).unwrap());

    let orchestrator = build_orchestrator(config, storage.clone(), Arc::new(SystemClock))
        .await
        .unwrap();
    let result = orchestrator
        .run(JobTemplate::new(1, 1, "games"), CancellationToken::new())
        .await;

    assert_eq!(result.job.status, JobStatus::Completed);
    assert_eq!(result.stats.pages_processed, 1);
    assert_eq!(result.stats.candidates_found, 3);
    assert_eq!(result.stats.candidates_skipped, 1);
    assert_eq!(result.stats.records_processed, 2);
    assert_eq!(result.stats.records_valid, 2);
    assert_eq!(result.stats.records_saved, 2);
    assert_eq!(result.stats.detail_failures, 1);
    // listing, 1001, 1002 twice, 1003
    assert_eq!(result.stats.requests, 5);
    assert!(result.quarantined.is_empty());

    let missing = format!("{}/item/1003.html", server.uri());
    assert_eq!(result.failed_urls(), vec![missing.as_str()]);

    assert_eq!(storage.count_records().unwrap(), 2);
    let stored = storage.get_job(&result.job.id).unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.found, 3);
    assert_eq!(stored.processed, 2);
    assert_eq!(stored.failed, 1);

    let md = format_markdown_summary(&result);
    assert!(md.contains("| Records saved | 2 |"));
    assert!(md.contains(&missing));
}

#[tokio::test]
async fn test_second_crawl_uses_cache_and_deduplicates() {
    let server = MockServer::start().await;
    mount_site(&server).await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("fundscout.db");
    let cache_dir = dir.path().join("cache");
    let config = Arc::new(create_test_config(&server.uri(), &db_path, Some(&cache_dir)));
    let storage = Arc::new(SqliteStorage::new(&db_path).unwrap());

    let orchestrator = build_orchestrator(config, storage.clone(), Arc::new(SystemClock))
        .await
        .unwrap();

    let first = orchestrator
        .run(JobTemplate::new(1, 1, "games"), CancellationToken::new())
        .await;
    assert_eq!(first.stats.records_saved, 2);
    assert_eq!(first.stats.cache_hits, 0);

    let second = orchestrator
        .run(JobTemplate::new(1, 1, "games"), CancellationToken::new())
        .await;
    assert_eq!(second.job.status, JobStatus::Completed);
    assert_eq!(second.stats.records_processed, 2);
    assert_eq!(second.stats.records_saved, 0);
    // Listing and both details come from the cache; the 404 is never cached
    assert_eq!(second.stats.cache_hits, 3);
    assert_eq!(second.stats.requests, 1);

    assert_eq!(storage.count_records().unwrap(), 2);
    assert_eq!(storage.count_versions("1001").unwrap(), 1);
    assert_eq!(storage.recent_jobs(10).unwrap().len(), 2);
}

#[tokio::test]
async fn test_retry_failed_redispatches_only_failures() {
    let server = MockServer::start().await;
    mount_site(&server).await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("fundscout.db");
    let config = Arc::new(create_test_config(&server.uri(), &db_path, None));
    let storage = Arc::new(SqliteStorage::new(&db_path).unwrap());

    let orchestrator = build_orchestrator(config, storage.clone(), Arc::new(SystemClock))
        .await
        .unwrap();
    let first = orchestrator
        .run(JobTemplate::new(1, 1, "games"), CancellationToken::new())
        .await;

    let retry = orchestrator
        .retry_failed(&first, CancellationToken::new())
        .await
        .expect("one failed candidate to retry");
    assert_eq!(retry.stats.candidates_found, 1);
    assert_eq!(retry.stats.detail_failures, 1);
    assert_eq!(retry.stats.requests, 1);
    assert_eq!(retry.failed.len(), 1);
    assert_eq!(storage.count_records().unwrap(), 2);
}

#[tokio::test]
async fn test_cancelled_job_stops_without_requests() {
    let server = MockServer::start().await;
    mount_site(&server).await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("fundscout.db");
    let config = Arc::new(create_test_config(&server.uri(), &db_path, None));
    let storage = Arc::new(SqliteStorage::new(&db_path).unwrap());

    let orchestrator = build_orchestrator(config, storage.clone(), Arc::new(SystemClock))
        .await
        .unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = orchestrator.run(JobTemplate::new(1, 3, "games"), cancel).await;

    assert_eq!(result.job.status, JobStatus::Stopped);
    assert_eq!(result.stats.requests, 0);
    assert!(server.received_requests().await.unwrap().is_empty());
    assert_eq!(
        storage.get_job(&result.job.id).unwrap().status,
        JobStatus::Stopped
    );
}

#[tokio::test]
async fn test_unreachable_site_fails_job() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("fundscout.db");
    // Nothing listens on the discard port
    let config = Arc::new(create_test_config("http://127.0.0.1:9", &db_path, None));
    let storage = Arc::new(SqliteStorage::new(&db_path).unwrap());

    let orchestrator = build_orchestrator(config, storage, Arc::new(SystemClock))
        .await
        .unwrap();
    let result = orchestrator
        .run(JobTemplate::new(1, 1, "games"), CancellationToken::new())
        .await;

    assert_eq!(result.job.status, JobStatus::Failed);
    assert_eq!(result.stats.pages_failed, 1);
    assert_eq!(result.stats.candidates_found, 0);
}

#[tokio::test]
async fn test_crawled_records_export_to_json_and_csv() {
    let server = MockServer::start().await;
    mount_site(&server).await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("fundscout.db");
    let config = Arc::new(create_test_config(&server.uri(), &db_path, None));
    let storage = Arc::new(SqliteStorage::new(&db_path).unwrap());

    let orchestrator = build_orchestrator(config, storage.clone(), Arc::new(SystemClock))
        .await
        .unwrap();
    let result = orchestrator
        .run(JobTemplate::new(1, 1, "games"), CancellationToken::new())
        .await;
    assert_eq!(result.stats.records_saved, 2);

    let records = storage.latest_records(None).unwrap();
    assert_eq!(records.len(), 2);

    let json_path = dir.path().join("projects.json");
    let written = export_records(&records, &json_path, ExportFormat::Json, chrono::Utc::now())
        .unwrap();
    assert_eq!(written, 2);
    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(value["metadata"]["total_projects"], 2);
    assert_eq!(value["projects"][0]["fields"]["external_id"], "1001");

    let csv_path = dir.path().join("projects.csv");
    export_records(&records, &csv_path, ExportFormat::Csv, chrono::Utc::now()).unwrap();
    let csv_text = std::fs::read_to_string(&csv_path).unwrap();
    // header plus one row per project
    assert_eq!(csv_text.lines().count(), 3);
    assert!(csv_text.lines().nth(1).unwrap().starts_with("1001,"));
}
