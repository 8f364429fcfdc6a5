//! Project snapshot export
//!
//! Writes the latest persisted snapshot of each project to a flat file. JSON
//! keeps the full record (image lists, extensions) under a metadata header;
//! CSV flattens each record to one row with list fields reduced to counts.

use crate::model::Record;
use crate::output::OutputResult;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

const FORMAT_VERSION: &str = "1.0";

/// Column order of the CSV export; matches the field order of `CsvRow`
const CSV_COLUMNS: [&str; 23] = [
    "external_id",
    "url",
    "title",
    "category",
    "status",
    "start_time",
    "end_time",
    "raised",
    "target",
    "percent",
    "backer_count",
    "target_derived",
    "author_name",
    "author_uid",
    "author_homepage",
    "reward_count",
    "update_count",
    "comment_count",
    "like_count",
    "image_count",
    "video_count",
    "content_hash",
    "fetched_at",
];

/// File format for `export_records`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(format!("unknown export format '{}' (expected json or csv)", other)),
        }
    }
}

#[derive(Serialize)]
struct ExportMetadata {
    export_time: DateTime<Utc>,
    total_projects: usize,
    format_version: &'static str,
}

#[derive(Serialize)]
struct ExportDocument<'a> {
    metadata: ExportMetadata,
    projects: &'a [Record],
}

#[derive(Serialize)]
struct CsvRow<'a> {
    external_id: &'a str,
    url: &'a str,
    title: &'a str,
    category: &'a str,
    status: &'static str,
    start_time: Option<&'a str>,
    end_time: Option<&'a str>,
    raised: String,
    target: String,
    percent: String,
    backer_count: u64,
    target_derived: bool,
    author_name: &'a str,
    author_uid: &'a str,
    author_homepage: &'a str,
    reward_count: u64,
    update_count: u64,
    comment_count: u64,
    like_count: u64,
    image_count: usize,
    video_count: usize,
    content_hash: &'a str,
    fetched_at: String,
}

impl<'a> From<&'a Record> for CsvRow<'a> {
    fn from(record: &'a Record) -> Self {
        let f = record.fields();
        Self {
            external_id: &f.external_id,
            url: &f.url,
            title: &f.title,
            category: &f.category,
            status: f.status.to_db_string(),
            start_time: f.start_time.as_deref(),
            end_time: f.end_time.as_deref(),
            raised: format!("{:.2}", f.funding.raised),
            target: format!("{:.2}", f.funding.target),
            percent: format!("{:.2}", f.funding.percent),
            backer_count: f.funding.backer_count,
            target_derived: f.funding.target_derived,
            author_name: &f.author.name,
            author_uid: &f.author.uid,
            author_homepage: &f.author.homepage,
            reward_count: f.content.reward_count,
            update_count: f.content.update_count,
            comment_count: f.content.comment_count,
            like_count: f.content.like_count,
            image_count: f.content.images.len(),
            video_count: f.content.videos.len(),
            content_hash: record.content_hash(),
            fetched_at: record.fetched_at().to_rfc3339(),
        }
    }
}

/// Writes `records` to `path` in the given format
///
/// Returns the number of projects written. An empty slice still produces a
/// valid file: a JSON document with no projects, or a CSV with only a header.
pub fn export_records(
    records: &[Record],
    path: &Path,
    format: ExportFormat,
    exported_at: DateTime<Utc>,
) -> OutputResult<usize> {
    match format {
        ExportFormat::Json => write_json(records, path, exported_at)?,
        ExportFormat::Csv => write_csv(records, path)?,
    }
    Ok(records.len())
}

fn write_json(records: &[Record], path: &Path, exported_at: DateTime<Utc>) -> OutputResult<()> {
    let document = ExportDocument {
        metadata: ExportMetadata {
            export_time: exported_at,
            total_projects: records.len(),
            format_version: FORMAT_VERSION,
        },
        projects: records,
    };

    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, &document)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

fn write_csv(records: &[Record], path: &Path) -> OutputResult<()> {
    // Header is written by hand so an empty export still carries it
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    writer.write_record(CSV_COLUMNS)?;

    for record in records {
        writer.serialize(CsvRow::from(record))?;
    }

    writer.flush()?;
    Ok(())
}
