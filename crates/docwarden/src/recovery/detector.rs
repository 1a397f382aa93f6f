//! Lease-based stuck-task detector and recoverer.
//!
//! A task is stuck when it has been `processing` for longer than the stuck
//! threshold while its (non-chunked) job is still `analyzing`. Recovery
//! releases every processing lease of the job and asks the continuation
//! worker to resume it. Each invocation is independent: overlapping or
//! repeated runs are safe because the lease release is a conditional claim.
//!
//! Every job a pass considers gets a recovery log entry. A job whose leases
//! were released but whose dispatch failed is found again through that log
//! and dispatched on the next pass. Without a configured worker nothing is
//! released.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{error, info, warn, Instrument};

use super::dispatch::ContinuationWorker;
use crate::db::recovery_log_repo::{self, AwaitingDispatch};
use crate::db::task_repo::{self, StuckTask};
use crate::db::{Database, DatabaseError};
use crate::error::{DispatchError, DocwardenError, RecoveryError};
use crate::model::{RecoveryLogEntry, RecoveryOutcome};

/// Default age after which a processing lease is presumed dead.
pub const DEFAULT_STUCK_THRESHOLD_MINUTES: i64 = 10;

/// What the detector did for a recovered job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Leases released and the continuation worker was asked to resume.
    ProcessingRestarted,
    /// A concurrent run released the leases first; nothing was dispatched.
    AlreadyReleased,
    /// A job left without a lease holder by an earlier failed dispatch was
    /// handed to the worker again.
    Redispatched,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveredJob {
    pub job_id: String,
    pub file_name: String,
    pub action: RecoveryAction,
    pub tasks_released: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedJob {
    pub job_id: String,
    pub error: String,
}

/// Outcome of one detector invocation. Every job considered appears in
/// exactly one of `recovered` or `failed`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    pub worker_id: String,
    pub recovered: Vec<RecoveredJob>,
    pub failed: Vec<FailedJob>,
}

impl RecoveryReport {
    pub fn message(&self) -> String {
        if self.recovered.is_empty() && self.failed.is_empty() {
            return "No stuck jobs found".to_string();
        }
        format!(
            "{} jobs recovered, {} failures",
            self.recovered.len(),
            self.failed.len()
        )
    }
}

/// A stuck task as shown by the read-only scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StuckTaskSummary {
    #[serde(flatten)]
    pub task: StuckTask,
    pub minutes_stuck: i64,
}

/// Short random id used to correlate one invocation's log lines and errors.
pub fn new_worker_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

pub struct StuckTaskDetector {
    db: Database,
    worker: Arc<dyn ContinuationWorker>,
    threshold: Duration,
}

impl StuckTaskDetector {
    pub fn new(db: Database, worker: Arc<dyn ContinuationWorker>, threshold: Duration) -> Self {
        Self {
            db,
            worker,
            threshold,
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// False when no continuation worker is configured.
    pub fn can_dispatch(&self) -> bool {
        self.worker.is_configured()
    }

    /// Finds stuck tasks, releases their jobs' leases and dispatches
    /// continuation, one job at a time.
    pub async fn detect_and_recover(&self) -> Result<RecoveryReport, RecoveryError> {
        self.detect_and_recover_at(Utc::now()).await
    }

    /// [`detect_and_recover`](Self::detect_and_recover) against an explicit clock.
    pub async fn detect_and_recover_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<RecoveryReport, RecoveryError> {
        let worker_id = new_worker_id();
        let span = tracing::info_span!("detect_stuck", worker_id = %worker_id);
        self.run(worker_id, now).instrument(span).await
    }

    async fn run(
        &self,
        worker_id: String,
        now: DateTime<Utc>,
    ) -> Result<RecoveryReport, RecoveryError> {
        let cutoff = task_repo::stuck_cutoff(now, self.threshold);

        let read = task_repo::find_stuck(&self.db, cutoff).and_then(|stuck| {
            recovery_log_repo::find_awaiting_dispatch(&self.db).map(|waiting| (stuck, waiting))
        });
        let (stuck, waiting) = match read {
            Ok(found) => found,
            Err(source) => {
                error!(error = %source, "Failed to query stuck tasks");
                return Err(RecoveryError::StoreRead { worker_id, source });
            }
        };

        let mut report = RecoveryReport {
            worker_id,
            ..RecoveryReport::default()
        };

        if stuck.is_empty() && waiting.is_empty() {
            info!("No stuck tasks found");
            return Ok(report);
        }

        info!(
            task_count = stuck.len(),
            awaiting_dispatch = waiting.len(),
            "Stuck tasks found"
        );

        let can_dispatch = self.worker.is_configured();
        if !can_dispatch {
            warn!("Continuation worker not configured; leaving leases in place");
        }

        // Invocation-scoped: one recovery per job even with several stuck tasks.
        let mut seen: HashSet<&str> = HashSet::new();
        for task in &stuck {
            if !seen.insert(task.job_id.as_str()) {
                continue;
            }

            info!(
                job_id = %task.job_id,
                file_name = %task.file_name,
                prompt = %task.prompt_title,
                lease_started_at = %task.lease_started_at,
                "Recovering job"
            );

            let result = if can_dispatch {
                self.recover_job(&report.worker_id, task, cutoff, now).await
            } else {
                self.skip_job(&report.worker_id, task, now)
            };
            match result {
                Ok(recovered) => report.recovered.push(recovered),
                Err(e) => {
                    warn!(job_id = %task.job_id, error = %e, "Job recovery failed");
                    report.failed.push(FailedJob {
                        job_id: task.job_id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        for job in &waiting {
            if !can_dispatch {
                report.failed.push(FailedJob {
                    job_id: job.job_id.clone(),
                    error: DocwardenError::from(DispatchError::NotConfigured).to_string(),
                });
                continue;
            }

            info!(job_id = %job.job_id, file_name = %job.file_name, "Dispatching again after failed dispatch");
            let result = self.redispatch_job(&report.worker_id, job, now).await;
            match result {
                Ok(recovered) => report.recovered.push(recovered),
                Err(e) => {
                    warn!(job_id = %job.job_id, error = %e, "Dispatch failed again");
                    report.failed.push(FailedJob {
                        job_id: job.job_id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            recovered = report.recovered.len(),
            failed = report.failed.len(),
            "Recovery pass finished"
        );
        Ok(report)
    }

    async fn recover_job(
        &self,
        worker_id: &str,
        task: &StuckTask,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RecoveredJob, DocwardenError> {
        let released = match task_repo::release_job_leases(&self.db, &task.job_id, cutoff, now) {
            Ok(released) => released,
            Err(e) => {
                let e = DocwardenError::from(e);
                self.record(log_entry(worker_id, task, RecoveryOutcome::ReleaseFailed, 0, Some(&e), now));
                return Err(e);
            }
        };

        if released.is_empty() {
            info!(job_id = %task.job_id, "Leases already released by a concurrent run");
            self.record(log_entry(worker_id, task, RecoveryOutcome::AlreadyReleased, 0, None, now));
            return Ok(RecoveredJob {
                job_id: task.job_id.clone(),
                file_name: task.file_name.clone(),
                action: RecoveryAction::AlreadyReleased,
                tasks_released: 0,
            });
        }

        info!(job_id = %task.job_id, released = released.len(), "Leases released");

        if let Err(e) = self.worker.resume(&task.job_id).await {
            let e = DocwardenError::from(e);
            self.record(log_entry(
                worker_id,
                task,
                RecoveryOutcome::DispatchFailed,
                released.len(),
                Some(&e),
                now,
            ));
            return Err(e);
        }

        self.record(log_entry(
            worker_id,
            task,
            RecoveryOutcome::ProcessingRestarted,
            released.len(),
            None,
            now,
        ));
        Ok(RecoveredJob {
            job_id: task.job_id.clone(),
            file_name: task.file_name.clone(),
            action: RecoveryAction::ProcessingRestarted,
            tasks_released: released.len(),
        })
    }

    fn skip_job(
        &self,
        worker_id: &str,
        task: &StuckTask,
        now: DateTime<Utc>,
    ) -> Result<RecoveredJob, DocwardenError> {
        let e = DocwardenError::from(DispatchError::NotConfigured);
        self.record(log_entry(worker_id, task, RecoveryOutcome::Skipped, 0, Some(&e), now));
        Err(e)
    }

    async fn redispatch_job(
        &self,
        worker_id: &str,
        job: &AwaitingDispatch,
        now: DateTime<Utc>,
    ) -> Result<RecoveredJob, DocwardenError> {
        let result = self.worker.resume(&job.job_id).await.map_err(DocwardenError::from);
        let (outcome, error) = match &result {
            Ok(()) => (RecoveryOutcome::Redispatched, None),
            Err(e) => (RecoveryOutcome::DispatchFailed, Some(e.to_string())),
        };
        self.record(RecoveryLogEntry {
            id: 0,
            worker_id: worker_id.to_string(),
            job_id: job.job_id.clone(),
            outcome,
            tasks_released: 0,
            prompt_title: None,
            execution_order: None,
            minutes_stuck: None,
            error,
            created_at: now,
        });
        result?;

        Ok(RecoveredJob {
            job_id: job.job_id.clone(),
            file_name: job.file_name.clone(),
            action: RecoveryAction::Redispatched,
            tasks_released: 0,
        })
    }

    /// The log is best effort: a failed write never changes a job's outcome.
    fn record(&self, entry: RecoveryLogEntry) {
        if let Err(e) = recovery_log_repo::insert(&self.db, &entry) {
            warn!(job_id = %entry.job_id, error = %e, "Failed to write recovery log entry");
        }
    }

    /// Recovery log entries, newest first, optionally for one job.
    pub fn history(
        &self,
        job_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<RecoveryLogEntry>, DatabaseError> {
        match job_id {
            Some(job_id) => recovery_log_repo::list_for_job(&self.db, job_id),
            None => recovery_log_repo::list_recent(&self.db, limit),
        }
    }

    /// Lists what a recovery pass would act on, without touching anything.
    pub fn scan(&self) -> Result<Vec<StuckTaskSummary>, DatabaseError> {
        self.scan_at(Utc::now())
    }

    pub fn scan_at(&self, now: DateTime<Utc>) -> Result<Vec<StuckTaskSummary>, DatabaseError> {
        let cutoff = task_repo::stuck_cutoff(now, self.threshold);
        Ok(task_repo::find_stuck(&self.db, cutoff)?
            .into_iter()
            .map(|task| StuckTaskSummary {
                minutes_stuck: task.minutes_stuck(now),
                task,
            })
            .collect())
    }
}

fn log_entry(
    worker_id: &str,
    task: &StuckTask,
    outcome: RecoveryOutcome,
    tasks_released: usize,
    error: Option<&DocwardenError>,
    now: DateTime<Utc>,
) -> RecoveryLogEntry {
    RecoveryLogEntry {
        id: 0,
        worker_id: worker_id.to_string(),
        job_id: task.job_id.clone(),
        outcome,
        tasks_released: tasks_released as u64,
        prompt_title: Some(task.prompt_title.clone()),
        execution_order: Some(task.execution_order),
        minutes_stuck: Some(task.minutes_stuck(now)),
        error: error.map(ToString::to_string),
        created_at: now,
    }
}
