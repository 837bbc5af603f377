//! Caller-facing scan service
//!
//! Wraps the scanner, the shared job queue, the bulk coordinator and the
//! autoscaler behind the operations a front end needs.

use std::sync::Arc;

use authscan_core::{BulkScanJob, BulkScanStatus, ScanJob};
use authscan_engine::Scanner;
use authscan_storage::Store;
use tracing::{info, warn};

use crate::autoscaler::{AutoscalerController, AutoscalerMetrics, RestartReport};
use crate::bulk::BulkCoordinator;
use crate::dispatch::Dispatcher;
use crate::error::{FleetError, ServiceError, ServiceResult};
use crate::queue::JobQueue;

pub struct ScanService {
    store: Arc<dyn Store>,
    dispatcher: Arc<Dispatcher>,
    bulk: Arc<BulkCoordinator>,
    autoscaler: Arc<AutoscalerController>,
}

impl ScanService {
    pub fn new(scanner: Arc<Scanner>, queue: Arc<dyn JobQueue>, autoscaler: Arc<AutoscalerController>) -> Self {
        let store = Arc::clone(scanner.store());
        let dispatcher = Arc::new(Dispatcher::new(scanner, queue));
        let bulk = Arc::new(BulkCoordinator::new(Arc::clone(&dispatcher), Arc::clone(&store)));
        Self {
            store,
            dispatcher,
            bulk,
            autoscaler,
        }
    }

    /// Queue a scan of one repository and return its job id.
    pub async fn start_scan(&self, repository_id: &str, incremental: bool) -> ServiceResult<String> {
        let prepared = self.dispatcher.scanner().prepare(repository_id, incremental).await?;
        let scan_id = self
            .dispatcher
            .submit(prepared, None, |report| async move {
                if let Some(message) = &report.job.error_message {
                    warn!(scan_id = %report.job.id, error = %message, "scan ended with error");
                }
            })?;
        info!(scan_id = %scan_id, repository_id, "scan started");
        Ok(scan_id)
    }

    pub async fn get_scan_progress(&self, scan_id: &str) -> ServiceResult<ScanJob> {
        self.store
            .get_scan_job(scan_id)
            .await?
            .ok_or_else(|| ServiceError::ScanNotFound(scan_id.to_string()))
    }

    /// Request cooperative cancellation. Returns false when the scan has
    /// already finished.
    pub async fn cancel_scan(&self, scan_id: &str) -> ServiceResult<bool> {
        if self.dispatcher.cancel(scan_id) {
            info!(scan_id, "scan cancellation requested");
            return Ok(true);
        }
        self.get_scan_progress(scan_id).await?;
        Ok(false)
    }

    pub async fn start_bulk_scan(
        &self,
        tenant_id: &str,
        repository_ids: &[String],
        max_parallel_workers: usize,
        incremental: bool,
    ) -> ServiceResult<String> {
        let job = self
            .bulk
            .initiate(tenant_id, repository_ids, max_parallel_workers, incremental)
            .await?;
        Ok(job.id)
    }

    pub async fn cancel_bulk_scan(&self, bulk_id: &str) -> ServiceResult<bool> {
        self.bulk.cancel(bulk_id).await
    }

    pub async fn get_bulk_scan(&self, bulk_id: &str) -> ServiceResult<BulkScanJob> {
        self.bulk.get(bulk_id).await
    }

    pub async fn wait_for_bulk_scan(&self, bulk_id: &str) -> ServiceResult<BulkScanStatus> {
        self.bulk.wait(bulk_id).await
    }

    pub fn get_autoscaler_metrics(&self) -> AutoscalerMetrics {
        self.autoscaler.metrics()
    }

    /// Resize the worker pool by hand. Targets outside the configured
    /// bounds are rejected without touching the pool.
    pub fn request_manual_scale(&self, target: usize) -> ServiceResult<()> {
        let config = self.autoscaler.metrics().config;
        if !config.contains(target) {
            return Err(FleetError::OutOfBounds {
                target,
                min: config.min_workers,
                max: config.max_workers,
            }
            .into());
        }
        if !self.autoscaler.request_manual_scale(target) {
            return Err(FleetError::InvalidRequest(format!("worker pool could not be resized to {target}")).into());
        }
        Ok(())
    }

    pub fn restart_failed_workers(&self) -> RestartReport {
        self.autoscaler.restart_failed_workers()
    }
}
