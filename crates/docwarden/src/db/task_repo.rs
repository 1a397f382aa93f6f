//! Task repository: the lease fields of analysis tasks.
//!
//! Lease writes are compare-and-set. A claim issues a fresh `lease_token`,
//! the stuck-task detector clears it, and worker completion only lands while
//! the caller still holds the token it was given.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row, Transaction, TransactionBehavior};
use serde::Serialize;

use super::{format_timestamp, get_timestamp, get_timestamp_opt, Database, DatabaseError};
use crate::model::{JobStatus, Task, TaskStatus};

const TASK_COLUMNS: &str = "id, job_id, prompt_title, execution_order, status, \
     lease_started_at, lease_token, result, updated_at";

fn task_from_row(row: &Row<'_>) -> Result<Task, rusqlite::Error> {
    Ok(Task {
        id: row.get("id")?,
        job_id: row.get("job_id")?,
        prompt_title: row.get("prompt_title")?,
        execution_order: row.get("execution_order")?,
        status: row.get("status")?,
        lease_started_at: get_timestamp_opt(row, "lease_started_at")?,
        lease_token: row.get("lease_token")?,
        result: row.get("result")?,
        updated_at: get_timestamp(row, "updated_at")?,
    })
}

/// A processing task whose lease is older than the stuck cutoff, joined with
/// the parent job fields the detector reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StuckTask {
    pub task_id: String,
    pub job_id: String,
    pub file_name: String,
    pub prompt_title: String,
    pub execution_order: i64,
    pub lease_started_at: DateTime<Utc>,
}

impl StuckTask {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            task_id: row.get("id")?,
            job_id: row.get("job_id")?,
            file_name: row.get("file_name")?,
            prompt_title: row.get("prompt_title")?,
            execution_order: row.get("execution_order")?,
            lease_started_at: get_timestamp(row, "lease_started_at")?,
        })
    }

    /// Whole minutes the lease has been held as of `now`.
    pub fn minutes_stuck(&self, now: DateTime<Utc>) -> i64 {
        (now - self.lease_started_at).num_minutes()
    }
}

/// A task claimed by a worker together with the token proving ownership.
#[derive(Debug, Clone)]
pub struct Lease {
    pub task: Task,
    pub token: String,
}

/// Builds a pending task with a fresh identifier.
pub fn new_task(job_id: &str, prompt_title: &str, execution_order: i64, now: DateTime<Utc>) -> Task {
    Task {
        id: uuid::Uuid::new_v4().to_string(),
        job_id: job_id.to_string(),
        prompt_title: prompt_title.to_string(),
        execution_order,
        status: TaskStatus::Pending,
        lease_started_at: None,
        lease_token: None,
        result: None,
        updated_at: now,
    }
}

/// Inserts a new task row.
pub fn insert(db: &Database, task: &Task) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO tasks (id, job_id, prompt_title, execution_order, status,
             lease_started_at, lease_token, result, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                task.id,
                task.job_id,
                task.prompt_title,
                task.execution_order,
                task.status,
                task.lease_started_at.map(format_timestamp),
                task.lease_token,
                task.result,
                format_timestamp(task.updated_at),
            ],
        )?;
        Ok(())
    })
}

/// Finds a task by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<Task>, DatabaseError> {
    db.with_conn(|conn| {
        let task = conn
            .query_row(
                &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
                params![id],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    })
}

/// Lists a job's tasks in execution order.
pub fn list_for_job(db: &Database, job_id: &str) -> Result<Vec<Task>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tasks WHERE job_id = ?1 ORDER BY execution_order, id",
            TASK_COLUMNS
        ))?;
        let tasks = stmt
            .query_map(params![job_id], task_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    })
}

/// Selects processing tasks whose lease started before `cutoff`, limited to
/// non-chunked jobs that are still analyzing. Oldest lease first.
pub fn find_stuck(db: &Database, cutoff: DateTime<Utc>) -> Result<Vec<StuckTask>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT t.id, t.job_id, j.file_name, t.prompt_title, t.execution_order,
                    t.lease_started_at
             FROM tasks t
             INNER JOIN jobs j ON j.id = t.job_id
             WHERE t.status = ?1
               AND t.lease_started_at < ?2
               AND j.is_chunked = 0
               AND j.status = ?3
             ORDER BY t.lease_started_at, t.job_id",
        )?;
        let rows = stmt
            .query_map(
                params![
                    TaskStatus::Processing,
                    format_timestamp(cutoff),
                    JobStatus::Analyzing
                ],
                StuckTask::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Atomically releases every processing task of a job back to pending.
///
/// The release only happens while the job still qualifies: analyzing,
/// not chunked, and holding at least one lease older than `cutoff`. The check
/// and the update share an IMMEDIATE transaction, so of two overlapping
/// detector runs exactly one gets a non-empty result. Returns the released
/// task ids.
pub fn release_job_leases(
    db: &Database,
    job_id: &str,
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

        let still_stuck: bool = tx.query_row(
            "SELECT EXISTS (
                SELECT 1 FROM tasks t
                INNER JOIN jobs j ON j.id = t.job_id
                WHERE t.job_id = ?1
                  AND t.status = ?2
                  AND t.lease_started_at < ?3
                  AND j.is_chunked = 0
                  AND j.status = ?4
             )",
            params![
                job_id,
                TaskStatus::Processing,
                format_timestamp(cutoff),
                JobStatus::Analyzing
            ],
            |r| r.get(0),
        )?;

        if !still_stuck {
            tx.commit()?;
            return Ok(Vec::new());
        }

        let released = {
            let mut stmt = tx.prepare(
                "UPDATE tasks
                 SET status = ?2, lease_started_at = NULL, lease_token = NULL, updated_at = ?3
                 WHERE job_id = ?1 AND status = ?4
                 RETURNING id",
            )?;
            let ids = stmt
                .query_map(
                    params![
                        job_id,
                        TaskStatus::Pending,
                        format_timestamp(now),
                        TaskStatus::Processing
                    ],
                    |r| r.get::<_, String>(0),
                )?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };

        tx.commit()?;
        Ok(released)
    })
}

/// Claims the first pending task of a job (lowest execution order) for a
/// worker, stamping the lease start and a fresh token.
pub fn claim_next_pending(
    db: &Database,
    job_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<Lease>, DatabaseError> {
    db.with_conn(|conn| {
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

        let next: Option<String> = tx
            .query_row(
                "SELECT id FROM tasks WHERE job_id = ?1 AND status = ?2
                 ORDER BY execution_order, id LIMIT 1",
                params![job_id, TaskStatus::Pending],
                |r| r.get(0),
            )
            .optional()?;

        let Some(task_id) = next else {
            tx.commit()?;
            return Ok(None);
        };

        let token = uuid::Uuid::new_v4().to_string();
        let task = tx.query_row(
            &format!(
                "UPDATE tasks
                 SET status = ?2, lease_started_at = ?3, lease_token = ?4, updated_at = ?3
                 WHERE id = ?1
                 RETURNING {}",
                TASK_COLUMNS
            ),
            params![task_id, TaskStatus::Processing, format_timestamp(now), token],
            task_from_row,
        )?;

        tx.commit()?;
        Ok(Some(Lease { task, token }))
    })
}

/// Marks a leased task completed. Returns `false` when the lease was
/// reclaimed in the meantime; the late result is then discarded.
pub fn complete_with_lease(
    db: &Database,
    task_id: &str,
    token: &str,
    result: &str,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    finish_with_lease(db, task_id, token, TaskStatus::Completed, result, now)
}

/// Marks a leased task failed, with the same ownership rule as
/// [`complete_with_lease`].
pub fn fail_with_lease(
    db: &Database,
    task_id: &str,
    token: &str,
    error: &str,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    finish_with_lease(db, task_id, token, TaskStatus::Failed, error, now)
}

fn finish_with_lease(
    db: &Database,
    task_id: &str,
    token: &str,
    status: TaskStatus,
    result: &str,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE tasks
             SET status = ?3, result = ?4, lease_started_at = NULL, lease_token = NULL,
                 updated_at = ?5
             WHERE id = ?1 AND lease_token = ?2 AND status = ?6",
            params![
                task_id,
                token,
                status,
                result,
                format_timestamp(now),
                TaskStatus::Processing
            ],
        )?;
        if changed == 0 {
            log::warn!(
                "Discarding {} result for task {}: lease no longer held",
                status,
                task_id
            );
        }
        Ok(changed == 1)
    })
}

/// Cutoff timestamp for a stuck threshold measured back from `now`.
pub fn stuck_cutoff(now: DateTime<Utc>, threshold: Duration) -> DateTime<Utc> {
    now - threshold
}
