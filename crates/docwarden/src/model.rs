//! Domain types for the Job Store: jobs, pages and analysis tasks.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Lifecycle of a document-processing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Uploaded,
    Transcribing,
    Analyzing,
    Completed,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Uploaded => "uploaded",
            JobStatus::Transcribing => "transcribing",
            JobStatus::Analyzing => "analyzing",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }

    /// Completed and error are the only states the validator inspects.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

/// Lifecycle of one analysis task ("prompt") within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

/// What one detector pass did for one job, as kept in the recovery log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOutcome {
    ProcessingRestarted,
    AlreadyReleased,
    Redispatched,
    ReleaseFailed,
    /// Leases were released (or already gone) but the worker did not take
    /// the job. The next pass dispatches it again.
    DispatchFailed,
    /// No worker configured; leases were left in place.
    Skipped,
}

impl RecoveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryOutcome::ProcessingRestarted => "processing_restarted",
            RecoveryOutcome::AlreadyReleased => "already_released",
            RecoveryOutcome::Redispatched => "redispatched",
            RecoveryOutcome::ReleaseFailed => "release_failed",
            RecoveryOutcome::DispatchFailed => "dispatch_failed",
            RecoveryOutcome::Skipped => "skipped",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            RecoveryOutcome::ProcessingRestarted
                | RecoveryOutcome::AlreadyReleased
                | RecoveryOutcome::Redispatched
        )
    }
}

/// Error returned when a status string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} status '{value}'")]
pub struct UnknownStatus {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(JobStatus::Uploaded),
            "transcribing" => Ok(JobStatus::Transcribing),
            "analyzing" => Ok(JobStatus::Analyzing),
            "completed" => Ok(JobStatus::Completed),
            "error" => Ok(JobStatus::Error),
            other => Err(UnknownStatus {
                kind: "job",
                value: other.to_string(),
            }),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(UnknownStatus {
                kind: "task",
                value: other.to_string(),
            }),
        }
    }
}

impl FromStr for RecoveryOutcome {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing_restarted" => Ok(RecoveryOutcome::ProcessingRestarted),
            "already_released" => Ok(RecoveryOutcome::AlreadyReleased),
            "redispatched" => Ok(RecoveryOutcome::Redispatched),
            "release_failed" => Ok(RecoveryOutcome::ReleaseFailed),
            "dispatch_failed" => Ok(RecoveryOutcome::DispatchFailed),
            "skipped" => Ok(RecoveryOutcome::Skipped),
            other => Err(UnknownStatus {
                kind: "recovery",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! sql_text_enum {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

sql_text_enum!(JobStatus);
sql_text_enum!(TaskStatus);
sql_text_enum!(RecoveryOutcome);

/// One document-processing unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: String,
    pub file_name: String,
    pub status: JobStatus,
    pub is_chunked: bool,
    /// Ordered per-page results; `None` until finalization writes it.
    pub consolidated_content: Option<Vec<serde_json::Value>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Length of the consolidated aggregate, 0 when absent.
    pub fn consolidated_count(&self) -> usize {
        self.consolidated_content.as_ref().map_or(0, Vec::len)
    }
}

/// One transcribed page of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub id: String,
    pub job_id: String,
    pub page_number: u32,
    pub text: String,
}

/// One unit of analysis work against a job's transcript.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: String,
    pub job_id: String,
    pub prompt_title: String,
    pub execution_order: i64,
    pub status: TaskStatus,
    /// Set when the task is claimed; cleared when the lease is released.
    pub lease_started_at: Option<DateTime<Utc>>,
    /// Identifies the current lease holder; never serialized out.
    #[serde(skip)]
    pub lease_token: Option<String>,
    pub result: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Persistent record of one job considered by one detector pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryLogEntry {
    /// Assigned by the store; 0 before insert.
    pub id: i64,
    pub worker_id: String,
    pub job_id: String,
    pub outcome: RecoveryOutcome,
    pub tasks_released: u64,
    pub prompt_title: Option<String>,
    pub execution_order: Option<i64>,
    pub minutes_stuck: Option<i64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_outcome_round_trip_and_success() {
        let all = [
            RecoveryOutcome::ProcessingRestarted,
            RecoveryOutcome::AlreadyReleased,
            RecoveryOutcome::Redispatched,
            RecoveryOutcome::ReleaseFailed,
            RecoveryOutcome::DispatchFailed,
            RecoveryOutcome::Skipped,
        ];
        for outcome in all {
            assert_eq!(outcome.as_str().parse::<RecoveryOutcome>().unwrap(), outcome);
        }
        let failures: Vec<_> = all.iter().filter(|o| !o.is_success()).collect();
        assert_eq!(
            failures,
            vec![
                &RecoveryOutcome::ReleaseFailed,
                &RecoveryOutcome::DispatchFailed,
                &RecoveryOutcome::Skipped
            ]
        );
        assert_eq!(
            serde_json::to_value(RecoveryOutcome::DispatchFailed).unwrap(),
            "dispatch_failed"
        );
    }

    #[test]
    fn test_job_status_parse_and_display() {
        for status in [
            JobStatus::Uploaded,
            JobStatus::Transcribing,
            JobStatus::Analyzing,
            JobStatus::Completed,
            JobStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        let err = "archived".parse::<JobStatus>().unwrap_err();
        assert_eq!(err.to_string(), "unknown job status 'archived'");
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Error.is_terminal());
        assert!(!JobStatus::Analyzing.is_terminal());
        assert!(!JobStatus::Uploaded.is_terminal());
    }

    #[test]
    fn test_task_status_serde() {
        let json = serde_json::to_string(&TaskStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
        assert!("running".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_status_sql_roundtrip() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let back: TaskStatus = conn
            .query_row("SELECT ?1", [TaskStatus::Failed], |r| r.get(0))
            .unwrap();
        assert_eq!(back, TaskStatus::Failed);
        let bad: rusqlite::Result<JobStatus> =
            conn.query_row("SELECT 'archived'", [], |r| r.get(0));
        assert!(bad.is_err());
    }
}
