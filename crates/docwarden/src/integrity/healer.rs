//! Conservative self-healer.
//!
//! Consolidation belongs to job finalization and must happen exactly once,
//! so the healer never writes: it reports what an operator has to do.

use serde::Serialize;

use super::issue::{IntegrityIssue, IssueType};
use super::validator::IntegrityValidator;
use crate::error::IntegrityError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealOutcome {
    pub success: bool,
    pub message: String,
}

impl HealOutcome {
    fn healed(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn refused(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Remediation policy for a detected issue type.
pub fn heal_policy(issue_type: IssueType) -> HealOutcome {
    match issue_type {
        IssueType::MissingConsolidation => HealOutcome::refused(
            "The job must be finalized again; consolidation only happens during finalization.",
        ),
        IssueType::InconsistentPages | IssueType::MissingPages => HealOutcome::refused(format!(
            "Issue type '{}' cannot be resolved automatically; manual investigation required.",
            issue_type
        )),
    }
}

pub struct IntegrityHealer {
    validator: IntegrityValidator,
}

impl IntegrityHealer {
    pub fn new(validator: IntegrityValidator) -> Self {
        Self { validator }
    }

    /// Re-validates the job and returns guidance. Never mutates the store.
    pub fn heal(&self, job_id: &str) -> HealOutcome {
        let outcome = match self.validator.counts(job_id) {
            Ok(counts) if !counts.status.is_terminal() => HealOutcome::refused(format!(
                "Job is still {} and was not checked; consistency is only validated once it finishes.",
                counts.status
            )),
            Ok(counts) => match IntegrityIssue::from_counts(counts) {
                None => HealOutcome::healed("Job is already consistent."),
                Some(issue) => heal_policy(issue.issue_type),
            },
            Err(e @ IntegrityError::JobNotFound(_)) => HealOutcome::refused(e.to_string()),
            Err(e) => HealOutcome::refused(format!("Error during heal: {}", e)),
        };
        tracing::info!(job_id, success = outcome.success, "Heal requested");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{job_repo, page_repo, Database};
    use crate::model::{Job, JobStatus};
    use chrono::Utc;
    use serde_json::json;

    fn seed(db: &Database, id: &str, pages: u32, consolidated: Option<Vec<serde_json::Value>>) {
        let now = Utc::now();
        job_repo::insert(
            db,
            &Job {
                id: id.to_string(),
                file_name: format!("{}.pdf", id),
                status: JobStatus::Completed,
                is_chunked: false,
                consolidated_content: consolidated,
                created_at: now,
                updated_at: now,
            },
        )
        .unwrap();
        for n in 1..=pages {
            page_repo::insert(db, &page_repo::new_page(id, n, "t")).unwrap();
        }
    }

    fn healer(db: &Database) -> IntegrityHealer {
        IntegrityHealer::new(IntegrityValidator::new(db.clone()))
    }

    #[test]
    fn test_missing_consolidation_is_refused_and_untouched() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, "M", 5, None);

        let outcome = healer(&db).heal("M");
        assert!(!outcome.success);
        assert!(outcome.message.contains("finalized again"));

        let job = job_repo::find_by_id(&db, "M").unwrap().unwrap();
        assert!(job.consolidated_content.is_none());
    }

    #[test]
    fn test_other_issue_types_are_unsupported() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, "I", 3, Some(vec![json!(1)]));
        seed(&db, "P", 0, None);

        let inconsistent = healer(&db).heal("I");
        assert!(!inconsistent.success);
        assert!(inconsistent.message.contains("inconsistent_pages"));

        let missing = healer(&db).heal("P");
        assert!(!missing.success);
        assert!(missing.message.contains("missing_pages"));
    }

    #[test]
    fn test_consistent_job_short_circuits() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, "C", 2, Some(vec![json!(1), json!(2)]));
        assert_eq!(
            healer(&db).heal("C"),
            HealOutcome {
                success: true,
                message: "Job is already consistent.".to_string(),
            }
        );
    }

    #[test]
    fn test_in_progress_job_is_not_reported_consistent() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        job_repo::insert(
            &db,
            &Job {
                id: "busy".to_string(),
                file_name: "busy.pdf".to_string(),
                status: JobStatus::Analyzing,
                is_chunked: false,
                consolidated_content: None,
                created_at: now,
                updated_at: now,
            },
        )
        .unwrap();

        let outcome = healer(&db).heal("busy");
        assert!(!outcome.success);
        assert!(outcome.message.contains("still analyzing"));
        assert!(outcome.message.contains("not checked"));
    }

    #[test]
    fn test_unknown_job_and_store_failure_are_refusals() {
        let db = Database::open_in_memory().unwrap();
        let unknown = healer(&db).heal("ghost");
        assert!(!unknown.success);
        assert_eq!(unknown.message, "Job not found: ghost");

        db.with_conn(|conn| {
            conn.execute_batch("DROP TABLE pages;")?;
            Ok(())
        })
        .unwrap();
        let broken = healer(&db).heal("ghost");
        assert!(!broken.success);
        assert!(broken.message.starts_with("Error during heal"));
    }

    #[test]
    fn test_heal_then_finalize_contract() {
        // The healer defers to finalization; finalization then writes once.
        let db = Database::open_in_memory().unwrap();
        seed(&db, "F", 2, None);
        assert!(!healer(&db).heal("F").success);

        let content = vec![json!("p1"), json!("p2")];
        assert!(job_repo::finalize_consolidation(&db, "F", &content, Utc::now()).unwrap());
        assert!(healer(&db).heal("F").success);
        assert!(!job_repo::finalize_consolidation(&db, "F", &content, Utc::now()).unwrap());
    }
}
