//! Drift classification between a job's pages and its consolidated content.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::db::job_repo::JobCounts;
use crate::model::JobStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    /// Pages exist but the aggregate was never written.
    MissingConsolidation,
    /// A completed job whose aggregate length differs from its page count.
    InconsistentPages,
    /// A completed job with no pages at all.
    MissingPages,
}

impl IssueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::MissingConsolidation => "missing_consolidation",
            IssueType::InconsistentPages => "inconsistent_pages",
            IssueType::MissingPages => "missing_pages",
        }
    }

    pub fn describe(&self, page_count: u64, consolidated_count: u64) -> String {
        match self {
            IssueType::MissingConsolidation => format!(
                "{} pages transcribed but not consolidated; the job requires consolidation.",
                page_count
            ),
            IssueType::InconsistentPages => format!(
                "Inconsistency: {} pages in the source table vs {} in the consolidated aggregate.",
                page_count, consolidated_count
            ),
            IssueType::MissingPages => {
                "Job marked as completed but has no transcribed pages.".to_string()
            }
        }
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies one job. Rules are checked in order and the first match wins,
/// so a job reports at most one issue.
pub fn classify(status: JobStatus, page_count: u64, consolidated_count: u64) -> Option<IssueType> {
    if !status.is_terminal() {
        return None;
    }
    if consolidated_count == 0 && page_count > 0 {
        return Some(IssueType::MissingConsolidation);
    }
    if status == JobStatus::Completed && consolidated_count != page_count {
        return Some(IssueType::InconsistentPages);
    }
    if status == JobStatus::Completed && page_count == 0 {
        return Some(IssueType::MissingPages);
    }
    None
}

/// A detected drift. Computed on demand, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegrityIssue {
    pub job_id: String,
    pub file_name: String,
    pub issue_type: IssueType,
    pub page_count: u64,
    pub consolidated_count: u64,
    pub status: JobStatus,
    pub description: String,
}

impl IntegrityIssue {
    pub fn from_counts(counts: JobCounts) -> Option<Self> {
        let issue_type = classify(counts.status, counts.page_count, counts.consolidated_count)?;
        Some(Self {
            description: issue_type.describe(counts.page_count, counts.consolidated_count),
            job_id: counts.job_id,
            file_name: counts.file_name,
            issue_type,
            page_count: counts.page_count,
            consolidated_count: counts.consolidated_count,
            status: counts.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_consolidation_wins_over_inconsistent() {
        assert_eq!(
            classify(JobStatus::Completed, 5, 0),
            Some(IssueType::MissingConsolidation)
        );
    }

    #[test]
    fn test_errored_job_without_aggregate() {
        assert_eq!(
            classify(JobStatus::Error, 3, 0),
            Some(IssueType::MissingConsolidation)
        );
        // Count mismatches on errored jobs are expected and not reported.
        assert_eq!(classify(JobStatus::Error, 3, 1), None);
        assert_eq!(classify(JobStatus::Error, 0, 0), None);
    }

    #[test]
    fn test_inconsistent_pages() {
        assert_eq!(
            classify(JobStatus::Completed, 10, 7),
            Some(IssueType::InconsistentPages)
        );
        // Aggregate without any pages is a count mismatch first.
        assert_eq!(
            classify(JobStatus::Completed, 0, 2),
            Some(IssueType::InconsistentPages)
        );
    }

    #[test]
    fn test_missing_pages() {
        assert_eq!(
            classify(JobStatus::Completed, 0, 0),
            Some(IssueType::MissingPages)
        );
    }

    #[test]
    fn test_consistent_and_non_terminal_jobs() {
        assert_eq!(classify(JobStatus::Completed, 4, 4), None);
        assert_eq!(classify(JobStatus::Analyzing, 5, 0), None);
        assert_eq!(classify(JobStatus::Transcribing, 0, 0), None);
    }

    #[test]
    fn test_descriptions_carry_counts() {
        assert_eq!(
            IssueType::MissingConsolidation.describe(5, 0),
            "5 pages transcribed but not consolidated; the job requires consolidation."
        );
        assert_eq!(
            IssueType::InconsistentPages.describe(10, 7),
            "Inconsistency: 10 pages in the source table vs 7 in the consolidated aggregate."
        );
    }

    #[test]
    fn test_issue_type_serializes_snake_case() {
        let json = serde_json::to_string(&IssueType::MissingConsolidation).unwrap();
        assert_eq!(json, "\"missing_consolidation\"");
        assert_eq!(IssueType::MissingPages.to_string(), "missing_pages");
    }
}
