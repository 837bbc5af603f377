//! Bulk scan domain model
//!
//! A bulk scan tracks one child per target repository. Children resolve at
//! most once, so `completed_applications + failed_applications` only grows
//! and reaches `total_applications` exactly once.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{ScanJob, ScanStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkScanStatus {
    Pending,
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
    Cancelled,
}

impl BulkScanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BulkScanStatus::Completed
                | BulkScanStatus::CompletedWithErrors
                | BulkScanStatus::Failed
                | BulkScanStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BulkScanStatus::Pending => "pending",
            BulkScanStatus::Running => "running",
            BulkScanStatus::Completed => "completed",
            BulkScanStatus::CompletedWithErrors => "completed_with_errors",
            BulkScanStatus::Failed => "failed",
            BulkScanStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildState {
    Submitted,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkChild {
    pub repository_id: String,
    pub scan_job_id: Option<String>,
    pub state: ChildState,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub policies_extracted: u64,
    #[serde(default)]
    pub files_scanned: u64,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

/// Final figures reported by a child scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildOutcome {
    pub scan_job_id: String,
    pub repository_id: String,
    pub status: ScanStatus,
    pub policies_extracted: u64,
    pub files_scanned: u64,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
}

impl ChildOutcome {
    pub fn from_job(job: &ScanJob) -> Self {
        Self {
            scan_job_id: job.id.clone(),
            repository_id: job.repository_id.clone(),
            status: job.status,
            policies_extracted: job.policies_extracted,
            files_scanned: job.files_scanned,
            duration_ms: job.duration_ms(),
            error: job.error_message.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkScanJob {
    pub id: String,
    pub tenant_id: String,
    pub repository_ids: Vec<String>,
    pub max_parallel_workers: usize,
    pub incremental: bool,
    pub children: Vec<BulkChild>,
    pub total_applications: u64,
    pub initiated_scans: u64,
    pub failed_initiations: u64,
    pub completed_applications: u64,
    pub failed_applications: u64,
    pub total_policies: u64,
    pub total_files_scanned: u64,
    pub average_duration_ms: Option<u64>,
    pub status: BulkScanStatus,
    #[serde(with = "time::serde::timestamp")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::timestamp::option", default)]
    pub completed_at: Option<OffsetDateTime>,
}

impl BulkScanJob {
    /// Create a bulk job. Duplicate repository ids collapse to one target.
    pub fn new(
        tenant_id: impl Into<String>,
        repository_ids: &[String],
        max_parallel_workers: usize,
        incremental: bool,
    ) -> Self {
        let mut targets: Vec<String> = Vec::with_capacity(repository_ids.len());
        for id in repository_ids {
            if !targets.contains(id) {
                targets.push(id.clone());
            }
        }

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            total_applications: targets.len() as u64,
            repository_ids: targets,
            max_parallel_workers: max_parallel_workers.max(1),
            incremental,
            children: Vec::new(),
            initiated_scans: 0,
            failed_initiations: 0,
            completed_applications: 0,
            failed_applications: 0,
            total_policies: 0,
            total_files_scanned: 0,
            average_duration_ms: None,
            status: BulkScanStatus::Pending,
            created_at: OffsetDateTime::now_utc(),
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn resolved(&self) -> u64 {
        self.completed_applications + self.failed_applications
    }

    /// A child scan was created and handed to the job queue.
    pub fn record_submission(&mut self, repository_id: &str, scan_job_id: &str) {
        self.initiated_scans += 1;
        self.children.push(BulkChild {
            repository_id: repository_id.to_string(),
            scan_job_id: Some(scan_job_id.to_string()),
            state: ChildState::Submitted,
            error: None,
            policies_extracted: 0,
            files_scanned: 0,
            duration_ms: None,
        });
        if self.status == BulkScanStatus::Pending {
            self.status = BulkScanStatus::Running;
        }
    }

    /// A target could not be submitted; it counts as failed immediately.
    /// Returns true if this resolved the bulk job.
    pub fn record_initiation_failure(
        &mut self,
        repository_id: &str,
        reason: impl Into<String>,
    ) -> bool {
        self.failed_initiations += 1;
        self.failed_applications += 1;
        self.children.push(BulkChild {
            repository_id: repository_id.to_string(),
            scan_job_id: None,
            state: ChildState::Failed,
            error: Some(reason.into()),
            policies_extracted: 0,
            files_scanned: 0,
            duration_ms: None,
        });
        self.try_settle()
    }

    /// Fold a child's terminal outcome into the aggregates.
    ///
    /// Returns false when the outcome is unknown, not terminal, or was
    /// already applied, so repeated callbacks never double count.
    pub fn record_child_outcome(&mut self, outcome: &ChildOutcome) -> bool {
        if !outcome.status.is_terminal() {
            return false;
        }
        let Some(child) = self.children.iter_mut().find(|c| {
            c.state == ChildState::Submitted
                && c.scan_job_id.as_deref() == Some(outcome.scan_job_id.as_str())
        }) else {
            return false;
        };

        child.policies_extracted = outcome.policies_extracted;
        child.files_scanned = outcome.files_scanned;
        child.duration_ms = outcome.duration_ms;
        if outcome.status.is_success() {
            child.state = ChildState::Completed;
            self.completed_applications += 1;
            self.total_policies += outcome.policies_extracted;
            self.total_files_scanned += outcome.files_scanned;
        } else {
            child.state = ChildState::Failed;
            child.error = outcome
                .error
                .clone()
                .or_else(|| Some(format!("scan ended {}", outcome.status)));
            self.failed_applications += 1;
        }

        self.average_duration_ms = self.completed_average_duration();
        self.try_settle();
        true
    }

    /// Stop the bulk job. Returns false if it had already ended.
    pub fn cancel(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = BulkScanStatus::Cancelled;
        self.completed_at = Some(OffsetDateTime::now_utc());
        true
    }

    fn completed_average_duration(&self) -> Option<u64> {
        let durations: Vec<u64> = self
            .children
            .iter()
            .filter(|c| c.state == ChildState::Completed)
            .filter_map(|c| c.duration_ms)
            .collect();
        if durations.is_empty() {
            return None;
        }
        Some(durations.iter().sum::<u64>() / durations.len() as u64)
    }

    fn try_settle(&mut self) -> bool {
        if self.is_terminal() || self.resolved() < self.total_applications {
            return false;
        }
        self.status = if self.failed_applications == 0 {
            BulkScanStatus::Completed
        } else if self.completed_applications == 0 {
            BulkScanStatus::Failed
        } else {
            BulkScanStatus::CompletedWithErrors
        };
        self.completed_at = Some(OffsetDateTime::now_utc());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("repo-{i}")).collect()
    }

    fn outcome(job_id: &str, status: ScanStatus, policies: u64, duration: u64) -> ChildOutcome {
        ChildOutcome {
            scan_job_id: job_id.to_string(),
            repository_id: String::new(),
            status,
            policies_extracted: policies,
            files_scanned: 10,
            duration_ms: Some(duration),
            error: None,
        }
    }

    #[test]
    fn test_settles_exactly_once() {
        let mut bulk = BulkScanJob::new("tenant", &ids(3), 2, true);
        bulk.record_submission("repo-1", "job-1");
        bulk.record_submission("repo-2", "job-2");
        assert!(!bulk.record_initiation_failure("repo-3", "not found"));

        assert!(bulk.record_child_outcome(&outcome("job-1", ScanStatus::Completed, 5, 100)));
        assert!(!bulk.is_terminal());
        let partial = outcome("job-2", ScanStatus::CompletedWithErrors, 2, 300);
        assert!(bulk.record_child_outcome(&partial));
        assert_eq!(bulk.status, BulkScanStatus::CompletedWithErrors);
        assert_eq!(bulk.resolved(), 3);

        // Duplicate callback is ignored.
        assert!(!bulk.record_child_outcome(&outcome("job-2", ScanStatus::Completed, 2, 300)));
        assert_eq!(bulk.completed_applications, 2);
        assert_eq!(bulk.total_policies, 7);
        assert_eq!(bulk.average_duration_ms, Some(200));
    }

    #[test]
    fn test_all_initiations_fail() {
        let mut bulk = BulkScanJob::new("tenant", &ids(2), 4, false);
        assert!(!bulk.record_initiation_failure("repo-1", "not found"));
        assert!(bulk.record_initiation_failure("repo-2", "not found"));
        assert_eq!(bulk.status, BulkScanStatus::Failed);
    }

    #[test]
    fn test_duplicate_targets_collapse() {
        let targets = vec!["a".to_string(), "b".to_string(), "a".to_string()];
        let bulk = BulkScanJob::new("tenant", &targets, 0, true);
        assert_eq!(bulk.total_applications, 2);
        assert_eq!(bulk.max_parallel_workers, 1);
    }

    #[test]
    fn test_cancel_keeps_status_terminal() {
        let mut bulk = BulkScanJob::new("tenant", &ids(2), 2, true);
        bulk.record_submission("repo-1", "job-1");
        assert!(bulk.cancel());
        assert!(!bulk.cancel());

        assert!(bulk.record_child_outcome(&outcome("job-1", ScanStatus::Completed, 1, 10)));
        assert_eq!(bulk.status, BulkScanStatus::Cancelled);
        assert_eq!(bulk.completed_applications, 1);
    }

    #[test]
    fn test_non_terminal_outcome_ignored() {
        let mut bulk = BulkScanJob::new("tenant", &ids(1), 1, true);
        bulk.record_submission("repo-1", "job-1");
        assert!(!bulk.record_child_outcome(&outcome("job-1", ScanStatus::Processing, 0, 0)));
        assert_eq!(bulk.resolved(), 0);
    }
}
