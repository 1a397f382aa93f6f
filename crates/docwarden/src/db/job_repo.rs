//! Job repository: reads and bounded writes on the `jobs` table.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use super::{format_timestamp, get_timestamp, Database, DatabaseError};
use crate::model::{Job, JobStatus};

const JOB_COLUMNS: &str =
    "id, file_name, status, is_chunked, consolidated_content, created_at, updated_at";

fn job_from_row(row: &Row<'_>) -> Result<Job, rusqlite::Error> {
    let raw_content: Option<String> = row.get("consolidated_content")?;
    let consolidated_content = raw_content
        .map(|s| {
            serde_json::from_str::<Vec<serde_json::Value>>(&s).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e))
            })
        })
        .transpose()?;

    Ok(Job {
        id: row.get("id")?,
        file_name: row.get("file_name")?,
        status: row.get("status")?,
        is_chunked: row.get("is_chunked")?,
        consolidated_content,
        created_at: get_timestamp(row, "created_at")?,
        updated_at: get_timestamp(row, "updated_at")?,
    })
}

/// Page and aggregate counts for one job, as the consistency validator sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobCounts {
    pub job_id: String,
    pub file_name: String,
    pub status: JobStatus,
    pub page_count: u64,
    pub consolidated_count: u64,
    pub created_at: DateTime<Utc>,
}

impl JobCounts {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            job_id: row.get("id")?,
            file_name: row.get("file_name")?,
            status: row.get("status")?,
            page_count: row.get("page_count")?,
            consolidated_count: row.get("consolidated_count")?,
            created_at: get_timestamp(row, "created_at")?,
        })
    }
}

const COUNTS_SELECT: &str = "SELECT j.id, j.file_name, j.status, j.created_at,
        (SELECT COUNT(*) FROM pages p WHERE p.job_id = j.id) AS page_count,
        COALESCE(json_array_length(j.consolidated_content), 0) AS consolidated_count
     FROM jobs j";

/// Inserts a new job row.
pub fn insert(db: &Database, job: &Job) -> Result<(), DatabaseError> {
    let content = job
        .consolidated_content
        .as_ref()
        .map(|c| serde_json::Value::Array(c.clone()).to_string());
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, file_name, status, is_chunked, consolidated_content,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                job.id,
                job.file_name,
                job.status,
                job.is_chunked,
                content,
                format_timestamp(job.created_at),
                format_timestamp(job.updated_at),
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<Job>, DatabaseError> {
    db.with_conn(|conn| {
        let job = conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
                params![id],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    })
}

/// Updates only the status and updated_at of a job.
pub fn update_status(
    db: &Database,
    id: &str,
    status: JobStatus,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status, format_timestamp(now)],
        )?;
        Ok(())
    })
}

/// Writes the consolidated aggregate for a job, at most once.
///
/// The write only lands while the column is still NULL or an empty array.
/// Returns `false` when the job already had content (or does not exist), so a
/// second finalization can never overwrite the first.
pub fn finalize_consolidation(
    db: &Database,
    id: &str,
    content: &[serde_json::Value],
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let encoded = serde_json::Value::Array(content.to_vec()).to_string();
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET consolidated_content = ?2, updated_at = ?3
             WHERE id = ?1
               AND (consolidated_content IS NULL
                    OR json_array_length(consolidated_content) = 0)",
            params![id, encoded, format_timestamp(now)],
        )?;
        Ok(changed == 1)
    })
}

/// Lists every completed/errored job with its page and aggregate counts,
/// newest first.
pub fn list_terminal_with_counts(db: &Database) -> Result<Vec<JobCounts>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "{} WHERE j.status IN (?1, ?2) ORDER BY j.created_at DESC",
            COUNTS_SELECT
        ))?;
        let rows = stmt
            .query_map(
                params![JobStatus::Completed, JobStatus::Error],
                JobCounts::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Page and aggregate counts for a single job, regardless of its status.
pub fn find_with_counts(db: &Database, id: &str) -> Result<Option<JobCounts>, DatabaseError> {
    db.with_conn(|conn| {
        let counts = conn
            .query_row(
                &format!("{} WHERE j.id = ?1", COUNTS_SELECT),
                params![id],
                JobCounts::from_row,
            )
            .optional()?;
        Ok(counts)
    })
}
