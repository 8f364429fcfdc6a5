//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the storage traits.
//! The connection sits behind a mutex so one storage handle can be shared by
//! the orchestrator workers and the scheduler.

use crate::model::{
    Author, Content, Funding, Job, JobStatus, JobTemplate, ProjectFields, ProjectStatus, Record,
};
use crate::scheduler::ScheduledTask;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{RecordSink, StorageError, StorageResult, TaskStore};
use crate::storage::{CountRow, StoreStats};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// SQLite storage backend
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Opens or creates the database at `path` and ensures the schema exists
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_job(&self, job_id: &str) -> StorageResult<Job> {
        let row = self
            .lock()
            .query_row(
                &format!("{} WHERE id = ?1", JOB_COLUMNS),
                params![job_id],
                JobRow::from_row,
            )
            .optional()?;
        row.ok_or_else(|| StorageError::JobNotFound(job_id.to_string()))?
            .into_job()
    }

    /// Most recently started jobs first
    pub fn recent_jobs(&self, limit: usize) -> StorageResult<Vec<Job>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "{} ORDER BY started_at DESC LIMIT ?1",
            JOB_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![limit as i64], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(JobRow::into_job).collect()
    }

    /// Number of stored snapshots for one project
    pub fn count_versions(&self, external_id: &str) -> StorageResult<u64> {
        let count: i64 = self.lock().query_row(
            "SELECT COUNT(*) FROM projects WHERE external_id = ?1",
            params![external_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn count_records(&self) -> StorageResult<u64> {
        let count: i64 = self
            .lock()
            .query_row("SELECT COUNT(*) FROM projects", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Aggregate view over everything persisted so far
    pub fn stats(&self) -> StorageResult<StoreStats> {
        let conn = self.lock();

        let (distinct_projects, total_raised, total_backers): (i64, f64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(raised), 0), COALESCE(SUM(backer_count), 0)
             FROM projects
             WHERE id IN (SELECT MAX(id) FROM projects GROUP BY external_id)",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let snapshots: i64 =
            conn.query_row("SELECT COUNT(*) FROM projects", [], |row| row.get(0))?;

        let by_status = grouped_counts(
            &conn,
            "SELECT status, COUNT(*) FROM projects
             WHERE id IN (SELECT MAX(id) FROM projects GROUP BY external_id)
             GROUP BY status ORDER BY COUNT(*) DESC, status",
        )?;

        let by_category = grouped_counts(
            &conn,
            "SELECT category, COUNT(*) FROM projects
             WHERE id IN (SELECT MAX(id) FROM projects GROUP BY external_id)
             GROUP BY category ORDER BY COUNT(*) DESC, category LIMIT 10",
        )?;

        let jobs_by_status = grouped_counts(
            &conn,
            "SELECT status, COUNT(*) FROM jobs GROUP BY status ORDER BY COUNT(*) DESC, status",
        )?;

        Ok(StoreStats {
            snapshots: snapshots as u64,
            distinct_projects: distinct_projects as u64,
            total_raised,
            total_backers: total_backers as u64,
            by_status,
            by_category,
            jobs_by_status,
        })
    }

    /// Latest snapshot of every project, optionally limited to one category
    pub fn latest_records(&self, category: Option<&str>) -> StorageResult<Vec<Record>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT external_id, url, title, thumbnail, category, status,
                    start_time, end_time, raised, target, percent, backer_count, target_derived,
                    author_name, author_uid, author_homepage, author_avatar,
                    reward_count, update_count, comment_count, like_count,
                    images, videos, extensions, fetched_at
             FROM projects
             WHERE id IN (SELECT MAX(id) FROM projects GROUP BY external_id)
               AND (?1 IS NULL OR category = ?1)
             ORDER BY external_id",
        )?;

        let rows = stmt
            .query_map(params![category], ProjectRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(ProjectRow::into_record).collect()
    }
}

const JOB_COLUMNS: &str = "SELECT id, category, page_from, page_to, started_at, ended_at, status,
        found, processed, failed, summary, config_hash FROM jobs";

fn grouped_counts(conn: &Connection, sql: &str) -> StorageResult<Vec<CountRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(CountRow {
                key: row.get(0)?,
                count: row.get::<_, i64>(1)? as u64,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn parse_time(table: &str, value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt {
            table: table.to_string(),
            message: format!("bad timestamp '{}': {}", value, e),
        })
}

/// Raw `jobs` row before status and timestamps are decoded
struct JobRow {
    id: String,
    category: String,
    page_from: u32,
    page_to: u32,
    started_at: String,
    ended_at: Option<String>,
    status: String,
    found: i64,
    processed: i64,
    failed: i64,
    summary: String,
    config_hash: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            category: row.get(1)?,
            page_from: row.get(2)?,
            page_to: row.get(3)?,
            started_at: row.get(4)?,
            ended_at: row.get(5)?,
            status: row.get(6)?,
            found: row.get(7)?,
            processed: row.get(8)?,
            failed: row.get(9)?,
            summary: row.get(10)?,
            config_hash: row.get(11)?,
        })
    }

    fn into_job(self) -> StorageResult<Job> {
        let status =
            JobStatus::from_db_string(&self.status).ok_or_else(|| StorageError::Corrupt {
                table: "jobs".to_string(),
                message: format!("unknown status '{}'", self.status),
            })?;

        Ok(Job {
            id: self.id,
            template: JobTemplate {
                page_from: self.page_from,
                page_to: self.page_to,
                category: self.category,
            },
            started_at: parse_time("jobs", &self.started_at)?,
            ended_at: self
                .ended_at
                .as_deref()
                .map(|t| parse_time("jobs", t))
                .transpose()?,
            status,
            found: self.found as u64,
            processed: self.processed as u64,
            failed: self.failed as u64,
            summary: self.summary,
            config_hash: self.config_hash,
        })
    }
}

/// Raw `projects` row; list columns and extensions are still JSON text
struct ProjectRow {
    external_id: String,
    url: String,
    title: String,
    thumbnail: String,
    category: String,
    status: String,
    start_time: Option<String>,
    end_time: Option<String>,
    raised: f64,
    target: f64,
    percent: f64,
    backer_count: i64,
    target_derived: bool,
    author_name: String,
    author_uid: String,
    author_homepage: String,
    author_avatar: String,
    reward_count: i64,
    update_count: i64,
    comment_count: i64,
    like_count: i64,
    images: String,
    videos: String,
    extensions: String,
    fetched_at: String,
}

impl ProjectRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            external_id: row.get(0)?,
            url: row.get(1)?,
            title: row.get(2)?,
            thumbnail: row.get(3)?,
            category: row.get(4)?,
            status: row.get(5)?,
            start_time: row.get(6)?,
            end_time: row.get(7)?,
            raised: row.get(8)?,
            target: row.get(9)?,
            percent: row.get(10)?,
            backer_count: row.get(11)?,
            target_derived: row.get(12)?,
            author_name: row.get(13)?,
            author_uid: row.get(14)?,
            author_homepage: row.get(15)?,
            author_avatar: row.get(16)?,
            reward_count: row.get(17)?,
            update_count: row.get(18)?,
            comment_count: row.get(19)?,
            like_count: row.get(20)?,
            images: row.get(21)?,
            videos: row.get(22)?,
            extensions: row.get(23)?,
            fetched_at: row.get(24)?,
        })
    }

    fn into_record(self) -> StorageResult<Record> {
        let status =
            ProjectStatus::from_db_string(&self.status).ok_or_else(|| StorageError::Corrupt {
                table: "projects".to_string(),
                message: format!("unknown status '{}'", self.status),
            })?;
        let fetched_at = parse_time("projects", &self.fetched_at)?;

        let fields = ProjectFields {
            external_id: self.external_id,
            url: self.url,
            title: self.title,
            thumbnail: self.thumbnail,
            category: self.category,
            status,
            start_time: self.start_time,
            end_time: self.end_time,
            funding: Funding {
                raised: self.raised,
                target: self.target,
                percent: self.percent,
                backer_count: self.backer_count as u64,
                target_derived: self.target_derived,
            },
            author: Author {
                name: self.author_name,
                uid: self.author_uid,
                homepage: self.author_homepage,
                avatar: self.author_avatar,
            },
            content: Content {
                reward_count: self.reward_count as u64,
                update_count: self.update_count as u64,
                comment_count: self.comment_count as u64,
                like_count: self.like_count as u64,
                images: serde_json::from_str(&self.images)?,
                videos: serde_json::from_str(&self.videos)?,
            },
            extensions: serde_json::from_str(&self.extensions)?,
        };

        Ok(Record::seal(fields, fetched_at))
    }
}

impl RecordSink for SqliteStorage {
    fn save_batch(&self, records: &[Record]) -> StorageResult<usize> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut saved = 0;

        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO projects (
                    content_hash, external_id, url, title, thumbnail, category, status,
                    start_time, end_time, raised, target, percent, backer_count, target_derived,
                    author_name, author_uid, author_homepage, author_avatar,
                    reward_count, update_count, comment_count, like_count,
                    images, videos, extensions, fetched_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                          ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)",
            )?;

            for record in records {
                let f = record.fields();
                saved += stmt.execute(params![
                    record.content_hash(),
                    f.external_id,
                    f.url,
                    f.title,
                    f.thumbnail,
                    f.category,
                    f.status.to_db_string(),
                    f.start_time,
                    f.end_time,
                    f.funding.raised,
                    f.funding.target,
                    f.funding.percent,
                    f.funding.backer_count as i64,
                    f.funding.target_derived,
                    f.author.name,
                    f.author.uid,
                    f.author.homepage,
                    f.author.avatar,
                    f.content.reward_count as i64,
                    f.content.update_count as i64,
                    f.content.comment_count as i64,
                    f.content.like_count as i64,
                    serde_json::to_string(&f.content.images)?,
                    serde_json::to_string(&f.content.videos)?,
                    serde_json::to_string(&f.extensions)?,
                    record.fetched_at().to_rfc3339(),
                ])?;
            }
        }

        tx.commit()?;
        Ok(saved)
    }

    fn update_job_status(&self, job: &Job) -> StorageResult<()> {
        self.lock().execute(
            "INSERT INTO jobs (id, category, page_from, page_to, started_at, ended_at, status,
                               found, processed, failed, summary, config_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(id) DO UPDATE SET
                ended_at = excluded.ended_at,
                status = excluded.status,
                found = excluded.found,
                processed = excluded.processed,
                failed = excluded.failed,
                summary = excluded.summary",
            params![
                job.id,
                job.template.category,
                job.template.page_from,
                job.template.page_to,
                job.started_at.to_rfc3339(),
                job.ended_at.map(|t| t.to_rfc3339()),
                job.status.to_db_string(),
                job.found as i64,
                job.processed as i64,
                job.failed as i64,
                job.summary,
                job.config_hash,
            ],
        )?;
        Ok(())
    }
}

impl TaskStore for SqliteStorage {
    fn save_task(&self, task: &ScheduledTask) -> StorageResult<()> {
        let data = serde_json::to_string(task)?;
        self.lock().execute(
            "INSERT INTO scheduled_tasks (id, name, is_active, next_run_at, data, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                is_active = excluded.is_active,
                next_run_at = excluded.next_run_at,
                data = excluded.data,
                updated_at = excluded.updated_at",
            params![
                task.id,
                task.name,
                task.is_active,
                task.next_run_at.to_rfc3339(),
                data,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn remove_task(&self, task_id: &str) -> StorageResult<()> {
        self.lock()
            .execute("DELETE FROM scheduled_tasks WHERE id = ?1", params![task_id])?;
        Ok(())
    }

    fn load_tasks(&self) -> StorageResult<Vec<ScheduledTask>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT data FROM scheduled_tasks ORDER BY name, id")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.iter()
            .map(|data| serde_json::from_str(data).map_err(StorageError::from))
            .collect()
    }
}
