//! Per-repository advisory locks
//!
//! At most one scan per repository is live at a time. The guard is taken when
//! a scan is queued and released when it reaches a terminal state.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

#[derive(Debug, Clone, Default)]
pub struct RepositoryLocks {
    held: Arc<DashMap<String, String>>,
}

impl RepositoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock `repository_id` for `scan_job_id`, or report the job holding it.
    pub fn try_acquire(&self, repository_id: &str, scan_job_id: &str) -> Result<RepositoryGuard, String> {
        match self.held.entry(repository_id.to_string()) {
            Entry::Occupied(entry) => Err(entry.get().clone()),
            Entry::Vacant(entry) => {
                entry.insert(scan_job_id.to_string());
                Ok(RepositoryGuard {
                    held: Arc::clone(&self.held),
                    repository_id: repository_id.to_string(),
                    scan_job_id: scan_job_id.to_string(),
                })
            }
        }
    }

    pub fn holder(&self, repository_id: &str) -> Option<String> {
        self.held.get(repository_id).map(|h| h.clone())
    }

    pub fn active(&self) -> usize {
        self.held.len()
    }
}

#[derive(Debug)]
pub struct RepositoryGuard {
    held: Arc<DashMap<String, String>>,
    repository_id: String,
    scan_job_id: String,
}

impl RepositoryGuard {
    pub fn repository_id(&self) -> &str {
        &self.repository_id
    }
}

impl Drop for RepositoryGuard {
    fn drop(&mut self) {
        self.held
            .remove_if(&self.repository_id, |_, holder| *holder == self.scan_job_id);
    }
}
