//! Persistence interface

use async_trait::async_trait;
use authscan_core::{BulkScanJob, ExtractedPolicyRecord, PolicyId, RepositorySource, ScanJob};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::Result;

/// Where a policy came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyScope {
    pub repository_id: String,
    pub scan_job_id: String,
    /// Unit path the policy was extracted from
    pub file_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPolicy {
    pub id: PolicyId,
    pub scope: PolicyScope,
    pub record: ExtractedPolicyRecord,
    #[serde(with = "time::serde::timestamp")]
    pub created_at: OffsetDateTime,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn save_repository(&self, repo: &RepositorySource) -> Result<()>;

    async fn get_repository(&self, id: &str) -> Result<Option<RepositorySource>>;

    /// All repositories, or only those of `tenant_id`.
    async fn list_repositories(&self, tenant_id: Option<&str>) -> Result<Vec<RepositorySource>>;

    /// Persist one policy with its evidence.
    async fn save_policy(&self, scope: &PolicyScope, record: &ExtractedPolicyRecord) -> Result<PolicyId>;

    /// Drop policies previously extracted from one unit, before it is
    /// re-extracted or after it was deleted. Returns how many were removed.
    async fn clear_policies(&self, repository_id: &str, file_path: &str) -> Result<u64>;

    async fn list_policies(&self, repository_id: &str) -> Result<Vec<StoredPolicy>>;

    async fn count_policies(&self, repository_id: &str) -> Result<u64>;

    /// Durable progress checkpoint for a scan job.
    async fn save_progress(&self, job: &ScanJob) -> Result<()>;

    async fn get_scan_job(&self, id: &str) -> Result<Option<ScanJob>>;

    async fn list_scan_jobs(&self, repository_id: &str) -> Result<Vec<ScanJob>>;

    async fn save_bulk_job(&self, job: &BulkScanJob) -> Result<()>;

    async fn get_bulk_job(&self, id: &str) -> Result<Option<BulkScanJob>>;
}
