//! In-process store for tests and dry runs

use async_trait::async_trait;
use authscan_core::{BulkScanJob, ExtractedPolicyRecord, PolicyId, RepositorySource, ScanJob};
use dashmap::DashMap;
use time::OffsetDateTime;

use crate::Result;
use crate::store::{PolicyScope, Store, StoredPolicy};

#[derive(Default)]
pub struct MemoryStore {
    repositories: DashMap<String, RepositorySource>,
    policies: DashMap<PolicyId, StoredPolicy>,
    scan_jobs: DashMap<String, ScanJob>,
    bulk_jobs: DashMap<String, BulkScanJob>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save_repository(&self, repo: &RepositorySource) -> Result<()> {
        self.repositories.insert(repo.id.clone(), repo.clone());
        Ok(())
    }

    async fn get_repository(&self, id: &str) -> Result<Option<RepositorySource>> {
        Ok(self.repositories.get(id).map(|r| r.clone()))
    }

    async fn list_repositories(&self, tenant_id: Option<&str>) -> Result<Vec<RepositorySource>> {
        let mut repos: Vec<RepositorySource> = self
            .repositories
            .iter()
            .filter(|r| tenant_id.is_none_or(|t| r.belongs_to(t)))
            .map(|r| r.clone())
            .collect();
        repos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(repos)
    }

    async fn save_policy(&self, scope: &PolicyScope, record: &ExtractedPolicyRecord) -> Result<PolicyId> {
        let id = uuid::Uuid::new_v4().to_string();
        self.policies.insert(
            id.clone(),
            StoredPolicy {
                id: id.clone(),
                scope: scope.clone(),
                record: record.clone(),
                created_at: OffsetDateTime::now_utc(),
            },
        );
        Ok(id)
    }

    async fn clear_policies(&self, repository_id: &str, file_path: &str) -> Result<u64> {
        let before = self.policies.len();
        self.policies.retain(|_, p| {
            !(p.scope.repository_id == repository_id && p.scope.file_path == file_path)
        });
        Ok((before - self.policies.len()) as u64)
    }

    async fn list_policies(&self, repository_id: &str) -> Result<Vec<StoredPolicy>> {
        let mut policies: Vec<StoredPolicy> = self
            .policies
            .iter()
            .filter(|p| p.scope.repository_id == repository_id)
            .map(|p| p.clone())
            .collect();
        policies.sort_by(|a, b| {
            a.scope
                .file_path
                .cmp(&b.scope.file_path)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(policies)
    }

    async fn count_policies(&self, repository_id: &str) -> Result<u64> {
        Ok(self
            .policies
            .iter()
            .filter(|p| p.scope.repository_id == repository_id)
            .count() as u64)
    }

    async fn save_progress(&self, job: &ScanJob) -> Result<()> {
        self.scan_jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get_scan_job(&self, id: &str) -> Result<Option<ScanJob>> {
        Ok(self.scan_jobs.get(id).map(|j| j.clone()))
    }

    async fn list_scan_jobs(&self, repository_id: &str) -> Result<Vec<ScanJob>> {
        let mut jobs: Vec<ScanJob> = self
            .scan_jobs
            .iter()
            .filter(|j| j.repository_id == repository_id)
            .map(|j| j.clone())
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }

    async fn save_bulk_job(&self, job: &BulkScanJob) -> Result<()> {
        self.bulk_jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get_bulk_job(&self, id: &str) -> Result<Option<BulkScanJob>> {
        Ok(self.bulk_jobs.get(id).map(|j| j.clone()))
    }
}
