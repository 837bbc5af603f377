//! Scan state machine
//!
//! Drives one repository scan through
//! `Queued -> Cloning|Connecting -> Enumerating -> Processing -> terminal`,
//! persisting the job row at every transition and after every batch.

use std::sync::Arc;

use authscan_core::{RepositorySource, RepositoryStatus, ScanJob, ScanStatus, SourceKind};
use authscan_sources::ChangeSetResolver;
use authscan_storage::Store;
use tracing::{error, info, warn};

use crate::error::{PipelineError, Result};
use crate::locks::{RepositoryGuard, RepositoryLocks};
use crate::pipeline::{BatchPipeline, CancelFlag, PipelineStatus, UnitError};

/// A queued scan holding its repository lock.
#[derive(Debug)]
pub struct PreparedScan {
    pub job: ScanJob,
    guard: RepositoryGuard,
}

impl PreparedScan {
    pub fn repository_id(&self) -> &str {
        self.guard.repository_id()
    }
}

/// Terminal job plus the unit errors worth reporting.
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub job: ScanJob,
    pub unit_errors: Vec<UnitError>,
}

pub struct Scanner {
    resolver: Arc<ChangeSetResolver>,
    pipeline: Arc<BatchPipeline>,
    store: Arc<dyn Store>,
    locks: RepositoryLocks,
}

impl Scanner {
    pub fn new(resolver: Arc<ChangeSetResolver>, pipeline: Arc<BatchPipeline>, store: Arc<dyn Store>) -> Self {
        Self {
            resolver,
            pipeline,
            store,
            locks: RepositoryLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Create and persist a queued job for `repository_id`. Fails if the
    /// repository is unknown or already being scanned.
    pub async fn prepare(&self, repository_id: &str, incremental: bool) -> Result<PreparedScan> {
        self.prepare_job(ScanJob::new(repository_id, incremental)).await
    }

    /// Like [`Scanner::prepare`] for a job built by the caller, e.g. a bulk
    /// scan child.
    pub async fn prepare_job(&self, job: ScanJob) -> Result<PreparedScan> {
        if self.store.get_repository(&job.repository_id).await?.is_none() {
            return Err(PipelineError::RepositoryNotFound(job.repository_id.clone()));
        }
        let guard = self
            .locks
            .try_acquire(&job.repository_id, &job.id)
            .map_err(|holder| PipelineError::ScanInProgress {
                repository_id: job.repository_id.clone(),
                scan_job_id: holder,
            })?;
        self.store.save_progress(&job).await?;
        info!(scan_id = %job.id, repository_id = %job.repository_id, incremental = job.incremental, "scan queued");
        Ok(PreparedScan { job, guard })
    }

    /// Run a prepared scan to a terminal state. Fatal errors end the job in
    /// `Failed`; they are recorded on the job rather than returned.
    pub async fn run(&self, prepared: PreparedScan, cancel: &CancelFlag) -> ScanReport {
        let PreparedScan { mut job, guard } = prepared;
        let mut unit_errors = Vec::new();

        if cancel.is_cancelled() && job.status == ScanStatus::Queued {
            if let Err(e) = job.cancel() {
                warn!(scan_id = %job.id, error = %e, "cancel of queued scan rejected");
            }
            info!(scan_id = %job.id, "scan cancelled before start");
        } else if let Err(e) = self.drive(&mut job, cancel, &mut unit_errors).await {
            error!(scan_id = %job.id, repository_id = %job.repository_id, error = %e, "scan failed");
            job.fail(e.to_string());
            self.mark_repository(&job.repository_id, RepositoryStatus::Error).await;
        }

        if let Err(e) = self.store.save_progress(&job).await {
            error!(scan_id = %job.id, error = %e, "failed to persist terminal scan state");
        }
        drop(guard);

        info!(
            scan_id = %job.id,
            status = %job.status,
            files = job.files_scanned,
            policies = job.policies_extracted,
            errors = job.errors_count,
            duration_ms = job.telemetry.duration_ms,
            "scan finished"
        );
        ScanReport { job, unit_errors }
    }

    async fn drive(&self, job: &mut ScanJob, cancel: &CancelFlag, unit_errors: &mut Vec<UnitError>) -> Result<()> {
        let mut repo = self
            .store
            .get_repository(&job.repository_id)
            .await?
            .ok_or_else(|| PipelineError::RepositoryNotFound(job.repository_id.clone()))?;

        job.transition(acquiring_state(&repo))?;
        self.store.save_progress(job).await?;
        repo.set_status(RepositoryStatus::Scanning);
        self.store.save_repository(&repo).await?;

        let acquired = self.resolver.acquire(&repo).await?;

        job.transition(ScanStatus::Enumerating)?;
        let since = if job.incremental { repo.checkpoint.clone() } else { None };
        let candidates = self.resolver.resolve(acquired, since.as_deref()).await?;
        if candidates.is_incremental() {
            job.base_checkpoint = since;
        }
        job.target_checkpoint = candidates.target_checkpoint().map(str::to_string);
        let total = self.pipeline.count_candidates(&candidates);
        job.set_totals(total, self.pipeline.config().batch_size)?;
        self.store.save_progress(job).await?;
        info!(
            scan_id = %job.id,
            incremental = candidates.is_incremental(),
            total_files = job.total_files,
            total_batches = job.total_batches,
            "candidates enumerated"
        );

        job.transition(ScanStatus::Processing)?;
        self.store.save_progress(job).await?;
        self.pipeline
            .clear_deleted(&repo.id, candidates.deleted_paths())
            .await?;

        let outcome = self.pipeline.process(job, &candidates, cancel).await?;
        *unit_errors = outcome.errors;

        match outcome.status {
            PipelineStatus::Drained => {
                job.finish()?;
                repo.advance_checkpoint(job.target_checkpoint.clone());
            }
            PipelineStatus::Cancelled => {
                job.cancel()?;
                repo.set_status(if repo.checkpoint.is_some() {
                    RepositoryStatus::Ready
                } else {
                    RepositoryStatus::Registered
                });
            }
        }
        self.store.save_repository(&repo).await?;
        Ok(())
    }

    async fn mark_repository(&self, repository_id: &str, status: RepositoryStatus) {
        let result = async {
            if let Some(mut repo) = self.store.get_repository(repository_id).await? {
                repo.set_status(status);
                self.store.save_repository(&repo).await?;
            }
            Ok::<_, authscan_storage::StorageError>(())
        }
        .await;
        if let Err(e) = result {
            warn!(repository_id, error = %e, "failed to update repository status");
        }
    }
}

fn acquiring_state(repo: &RepositorySource) -> ScanStatus {
    match repo.kind {
        SourceKind::VersionControl => ScanStatus::Cloning,
        SourceKind::ProcedureCatalog => ScanStatus::Connecting,
    }
}
