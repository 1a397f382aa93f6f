//! Recovery log: one row per job per detector pass.
//!
//! Besides operator history, the log is how a later pass finds jobs whose
//! leases were released but whose dispatch failed. Those jobs have no
//! processing lease left for the stuck-task scan to find.

use rusqlite::{params, Row};
use serde::Serialize;

use super::{format_timestamp, get_timestamp, Database, DatabaseError};
use crate::model::{JobStatus, RecoveryLogEntry, RecoveryOutcome, TaskStatus};

const ENTRY_COLUMNS: &str = "id, worker_id, job_id, outcome, tasks_released, prompt_title, \
     execution_order, minutes_stuck, error, created_at";

fn entry_from_row(row: &Row<'_>) -> Result<RecoveryLogEntry, rusqlite::Error> {
    Ok(RecoveryLogEntry {
        id: row.get("id")?,
        worker_id: row.get("worker_id")?,
        job_id: row.get("job_id")?,
        outcome: row.get("outcome")?,
        tasks_released: row.get("tasks_released")?,
        prompt_title: row.get("prompt_title")?,
        execution_order: row.get("execution_order")?,
        minutes_stuck: row.get("minutes_stuck")?,
        error: row.get("error")?,
        created_at: get_timestamp(row, "created_at")?,
    })
}

/// Appends an entry and returns its id. `entry.id` is ignored.
pub fn insert(db: &Database, entry: &RecoveryLogEntry) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO recovery_log (worker_id, job_id, outcome, tasks_released, prompt_title,
                                       execution_order, minutes_stuck, error, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entry.worker_id,
                entry.job_id,
                entry.outcome,
                entry.tasks_released,
                entry.prompt_title,
                entry.execution_order,
                entry.minutes_stuck,
                entry.error,
                format_timestamp(entry.created_at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Most recent entries across all jobs, newest first.
pub fn list_recent(db: &Database, limit: u32) -> Result<Vec<RecoveryLogEntry>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM recovery_log ORDER BY id DESC LIMIT ?1",
            ENTRY_COLUMNS
        ))?;
        let entries = stmt
            .query_map(params![limit], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    })
}

/// Full history of one job, newest first.
pub fn list_for_job(db: &Database, job_id: &str) -> Result<Vec<RecoveryLogEntry>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM recovery_log WHERE job_id = ?1 ORDER BY id DESC",
            ENTRY_COLUMNS
        ))?;
        let entries = stmt
            .query_map(params![job_id], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    })
}

/// A job left without a lease holder after a failed dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AwaitingDispatch {
    pub job_id: String,
    pub file_name: String,
}

/// Jobs whose last recorded outcome is `dispatch_failed` and that still
/// need a worker: analyzing, not chunked, some task pending and none
/// processing. `skipped` entries do not count as an outcome here.
pub fn find_awaiting_dispatch(db: &Database) -> Result<Vec<AwaitingDispatch>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT j.id, j.file_name
             FROM jobs j
             WHERE j.status = ?1
               AND j.is_chunked = 0
               AND EXISTS (SELECT 1 FROM tasks t WHERE t.job_id = j.id AND t.status = ?2)
               AND NOT EXISTS (SELECT 1 FROM tasks t WHERE t.job_id = j.id AND t.status = ?3)
               AND (SELECT r.outcome FROM recovery_log r
                    WHERE r.job_id = j.id AND r.outcome != ?4
                    ORDER BY r.id DESC LIMIT 1) = ?5
             ORDER BY j.id",
        )?;
        let jobs = stmt
            .query_map(
                params![
                    JobStatus::Analyzing,
                    TaskStatus::Pending,
                    TaskStatus::Processing,
                    RecoveryOutcome::Skipped,
                    RecoveryOutcome::DispatchFailed
                ],
                |row| {
                    Ok(AwaitingDispatch {
                        job_id: row.get("id")?,
                        file_name: row.get("file_name")?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    })
}
