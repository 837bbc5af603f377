//! Bulk scan coordination
//!
//! Fans one request out into a child scan per repository and folds child
//! outcomes back into the aggregate record. Children wait for one of the
//! bulk job's parallel slots here, before they reach the shared queue, so a
//! waiting child never occupies a worker. Only this module mutates
//! `BulkScanJob` aggregates.

use std::sync::Arc;

use authscan_core::{BulkScanJob, BulkScanStatus, ChildOutcome, ScanJob};
use authscan_engine::{CancelFlag, PreparedScan};
use authscan_storage::Store;
use dashmap::DashMap;
use tokio::sync::{Mutex, Semaphore, watch};
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::error::{FleetError, ServiceError, ServiceResult};

struct BulkEntry {
    job: Arc<Mutex<BulkScanJob>>,
    /// One permit per parallel slot; closed on cancel
    permits: Arc<Semaphore>,
    cancel: CancelFlag,
    settled: watch::Sender<bool>,
}

pub struct BulkCoordinator {
    dispatcher: Arc<Dispatcher>,
    store: Arc<dyn Store>,
    entries: DashMap<String, Arc<BulkEntry>>,
}

impl BulkCoordinator {
    pub fn new(dispatcher: Arc<Dispatcher>, store: Arc<dyn Store>) -> Self {
        Self {
            dispatcher,
            store,
            entries: DashMap::new(),
        }
    }

    /// Create a bulk job for `tenant_id` and register one child scan per
    /// repository. Targets that cannot be prepared become failed children
    /// without holding up the rest; the others are queued as slots free up.
    pub async fn initiate(
        self: &Arc<Self>,
        tenant_id: &str,
        repository_ids: &[String],
        max_parallel: usize,
        incremental: bool,
    ) -> ServiceResult<BulkScanJob> {
        if max_parallel == 0 {
            return Err(FleetError::InvalidRequest("max_parallel_workers must be at least 1".into()).into());
        }
        if repository_ids.is_empty() {
            return Err(FleetError::InvalidRequest("no repositories given".into()).into());
        }

        let bulk = BulkScanJob::new(tenant_id, repository_ids, max_parallel, incremental);
        let bulk_id = bulk.id.clone();
        self.store.save_bulk_job(&bulk).await?;

        let (settled, _) = watch::channel(false);
        let entry = Arc::new(BulkEntry {
            job: Arc::new(Mutex::new(bulk)),
            permits: Arc::new(Semaphore::new(max_parallel)),
            cancel: CancelFlag::new(),
            settled,
        });
        self.entries.insert(bulk_id.clone(), Arc::clone(&entry));

        // Children that finish early wait on this lock, so every submission
        // is recorded before any outcome is folded in.
        let mut job = entry.job.lock().await;
        let targets = job.repository_ids.clone();
        info!(bulk_id = %bulk_id, tenant_id, targets = targets.len(), max_parallel, "bulk scan initiated");

        let mut pending = Vec::with_capacity(targets.len());
        for repository_id in &targets {
            if entry.cancel.is_cancelled() {
                job.record_initiation_failure(repository_id, "bulk scan cancelled before submission");
                continue;
            }
            match self.prepare_child(&bulk_id, tenant_id, repository_id, incremental).await {
                Ok(prepared) => {
                    let scan_id = prepared.job.id.clone();
                    self.dispatcher.reserve(&scan_id);
                    job.record_submission(repository_id, &scan_id);
                    debug!(bulk_id = %bulk_id, repository_id, scan_id = %scan_id, "child scan registered");
                    pending.push(prepared);
                }
                Err(reason) => {
                    warn!(bulk_id = %bulk_id, repository_id, reason = %reason, "child scan not submitted");
                    job.record_initiation_failure(repository_id, reason);
                }
            }
        }

        if !pending.is_empty() {
            tokio::spawn(Arc::clone(self).feed(Arc::clone(&entry), bulk_id.clone(), pending));
        }

        self.store.save_bulk_job(&job).await?;
        if job.is_terminal() {
            entry.settled.send_replace(true);
        }
        Ok(job.clone())
    }

    async fn prepare_child(
        &self,
        bulk_id: &str,
        tenant_id: &str,
        repository_id: &str,
        incremental: bool,
    ) -> Result<PreparedScan, String> {
        let repo = self
            .store
            .get_repository(repository_id)
            .await
            .map_err(|e| e.to_string())?;
        match repo {
            None => return Err(format!("repository not found: {repository_id}")),
            Some(repo) if !repo.belongs_to(tenant_id) => {
                return Err(format!("repository {repository_id} does not belong to tenant {tenant_id}"));
            }
            Some(_) => {}
        }

        let child = ScanJob::new(repository_id, incremental).with_bulk_scan(bulk_id);
        self.dispatcher
            .scanner()
            .prepare_job(child)
            .await
            .map_err(|e| e.to_string())
    }

    /// Queue registered children in order, one per free slot. Once the bulk
    /// job is cancelled the rest are settled as cancelled without queueing.
    async fn feed(self: Arc<Self>, entry: Arc<BulkEntry>, bulk_id: String, pending: Vec<PreparedScan>) {
        for prepared in pending {
            let slot = Arc::clone(&entry.permits).acquire_owned().await.ok();
            let settled = match slot {
                Some(slot) if !entry.cancel.is_cancelled() => {
                    let mut unqueued = prepared.job.clone();
                    let coordinator = Arc::clone(&self);
                    let id = bulk_id.clone();
                    let submitted = self.dispatcher.submit(prepared, Some(slot), move |report| async move {
                        coordinator
                            .on_child_complete(&id, &ChildOutcome::from_job(&report.job))
                            .await;
                    });
                    match submitted {
                        Ok(scan_id) => {
                            debug!(bulk_id = %bulk_id, scan_id = %scan_id, "child scan queued");
                            continue;
                        }
                        Err(e) => {
                            warn!(bulk_id = %bulk_id, scan_id = %unqueued.id, error = %e, "child scan could not be queued");
                            unqueued.fail(format!("failed to queue scan: {e}"));
                            if let Err(e) = self.store.save_progress(&unqueued).await {
                                warn!(scan_id = %unqueued.id, error = %e, "failed to persist child scan failure");
                            }
                            unqueued
                        }
                    }
                }
                _ => self.dispatcher.abandon(prepared).await.job,
            };
            self.on_child_complete(&bulk_id, &ChildOutcome::from_job(&settled)).await;
        }
    }

    /// Fold a child's terminal outcome into its bulk job. Outcomes already
    /// applied are ignored.
    pub async fn on_child_complete(&self, bulk_id: &str, outcome: &ChildOutcome) {
        let Some(entry) = self.entry(bulk_id) else {
            warn!(bulk_id, scan_id = %outcome.scan_job_id, "outcome for unknown bulk scan");
            return;
        };
        let mut job = entry.job.lock().await;
        if !job.record_child_outcome(outcome) {
            debug!(bulk_id, scan_id = %outcome.scan_job_id, "duplicate or unknown child outcome ignored");
            return;
        }
        if let Err(e) = self.store.save_bulk_job(&job).await {
            warn!(bulk_id, error = %e, "failed to persist bulk scan progress");
        }
        if job.is_terminal() {
            info!(
                bulk_id,
                status = job.status.as_str(),
                completed = job.completed_applications,
                failed = job.failed_applications,
                policies = job.total_policies,
                "bulk scan settled"
            );
            entry.settled.send_replace(true);
        }
    }

    /// Stop queueing children. Children already running finish on their
    /// own; children still waiting for a slot end cancelled.
    pub async fn cancel(&self, bulk_id: &str) -> ServiceResult<bool> {
        let entry = self
            .entry(bulk_id)
            .ok_or_else(|| ServiceError::BulkScanNotFound(bulk_id.to_string()))?;
        entry.cancel.cancel();
        entry.permits.close();

        let mut job = entry.job.lock().await;
        if !job.cancel() {
            return Ok(false);
        }
        self.store.save_bulk_job(&job).await?;
        entry.settled.send_replace(true);
        info!(bulk_id, "bulk scan cancelled");
        Ok(true)
    }

    /// Current state of a bulk job, falling back to the store for jobs
    /// started by an earlier process.
    pub async fn get(&self, bulk_id: &str) -> ServiceResult<BulkScanJob> {
        if let Some(entry) = self.entry(bulk_id) {
            return Ok(entry.job.lock().await.clone());
        }
        self.store
            .get_bulk_job(bulk_id)
            .await?
            .ok_or_else(|| ServiceError::BulkScanNotFound(bulk_id.to_string()))
    }

    /// Wait until the bulk job reaches a terminal status.
    pub async fn wait(&self, bulk_id: &str) -> ServiceResult<BulkScanStatus> {
        let entry = self
            .entry(bulk_id)
            .ok_or_else(|| ServiceError::BulkScanNotFound(bulk_id.to_string()))?;
        let mut settled = entry.settled.subscribe();
        // The sender lives in `entry`, so the channel cannot close here.
        let _ = settled.wait_for(|done| *done).await;
        Ok(entry.job.lock().await.status)
    }

    fn entry(&self, bulk_id: &str) -> Option<Arc<BulkEntry>> {
        self.entries.get(bulk_id).map(|e| Arc::clone(e.value()))
    }
}
