//! Consistency validator: compares page counts with consolidated content
//! length for terminal jobs. Read-only.

use crate::db::job_repo::{self, JobCounts};
use crate::db::Database;
use crate::error::IntegrityError;

use super::issue::IntegrityIssue;

pub struct IntegrityValidator {
    db: Database,
}

impl IntegrityValidator {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Every drifted terminal job, newest first.
    pub fn validate_all(&self) -> Result<Vec<IntegrityIssue>, IntegrityError> {
        let issues: Vec<IntegrityIssue> = job_repo::list_terminal_with_counts(&self.db)?
            .into_iter()
            .filter_map(IntegrityIssue::from_counts)
            .collect();
        tracing::info!(issue_count = issues.len(), "Integrity scan finished");
        Ok(issues)
    }

    /// The issue for one job, or `None` when it is consistent (or not in a
    /// terminal state).
    pub fn validate_one(&self, job_id: &str) -> Result<Option<IntegrityIssue>, IntegrityError> {
        Ok(IntegrityIssue::from_counts(self.counts(job_id)?))
    }

    pub(crate) fn counts(&self, job_id: &str) -> Result<JobCounts, IntegrityError> {
        job_repo::find_with_counts(&self.db, job_id)?
            .ok_or_else(|| IntegrityError::JobNotFound(job_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::page_repo;
    use crate::integrity::issue::IssueType;
    use crate::model::{Job, JobStatus};
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    fn seed(db: &Database, id: &str, status: JobStatus, pages: u32, consolidated: Option<usize>, age: i64) {
        let created = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap() + Duration::hours(age);
        job_repo::insert(
            db,
            &Job {
                id: id.to_string(),
                file_name: format!("{}.pdf", id),
                status,
                is_chunked: false,
                consolidated_content: consolidated.map(|n| (0..n).map(|i| json!({"page": i})).collect()),
                created_at: created,
                updated_at: created,
            },
        )
        .unwrap();
        for n in 1..=pages {
            page_repo::insert(db, &page_repo::new_page(id, n, "text")).unwrap();
        }
    }

    #[test]
    fn test_validate_all_reports_one_issue_per_drifted_job() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, "Y", JobStatus::Completed, 10, Some(7), 1);
        seed(&db, "ok", JobStatus::Completed, 4, Some(4), 2);
        seed(&db, "unconsolidated", JobStatus::Error, 3, None, 3);
        seed(&db, "empty", JobStatus::Completed, 0, None, 4);
        seed(&db, "busy", JobStatus::Analyzing, 5, None, 5);

        let issues = IntegrityValidator::new(db).validate_all().unwrap();

        let summary: Vec<(&str, IssueType)> = issues
            .iter()
            .map(|i| (i.job_id.as_str(), i.issue_type))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("empty", IssueType::MissingPages),
                ("unconsolidated", IssueType::MissingConsolidation),
                ("Y", IssueType::InconsistentPages),
            ]
        );

        let y = &issues[2];
        assert_eq!(y.page_count, 10);
        assert_eq!(y.consolidated_count, 7);
        assert_eq!(y.status, JobStatus::Completed);
        assert_eq!(y.file_name, "Y.pdf");
    }

    #[test]
    fn test_validate_one() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, "consistent", JobStatus::Completed, 4, Some(4), 0);
        seed(&db, "drifted", JobStatus::Completed, 5, Some(0), 0);
        let validator = IntegrityValidator::new(db);

        assert_eq!(validator.validate_one("consistent").unwrap(), None);

        let issue = validator.validate_one("drifted").unwrap().unwrap();
        assert_eq!(issue.issue_type, IssueType::MissingConsolidation);

        assert!(matches!(
            validator.validate_one("ghost"),
            Err(IntegrityError::JobNotFound(id)) if id == "ghost"
        ));
    }

    #[test]
    fn test_issue_json_shape() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, "Y", JobStatus::Completed, 2, Some(1), 0);
        let issue = IntegrityValidator::new(db).validate_one("Y").unwrap().unwrap();

        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["issue_type"], "inconsistent_pages");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["page_count"], 2);
        assert_eq!(json["consolidated_count"], 1);
    }
}
