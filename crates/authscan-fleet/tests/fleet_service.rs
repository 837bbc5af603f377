use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use authscan_core::{BulkScanStatus, ChildState, RepositorySource, ScanStatus, SourceKind};
use authscan_engine::{BatchPipeline, ExtractionFailed, ExtractionModel, PipelineConfig, Scanner};
use authscan_fleet::{
    AutoscalerConfig, AutoscalerController, FleetError, FleetSnapshot, JobQueue, LocalWorkerPool,
    PoolConfig, QueuedJob, ScaleDecision, ScanService, ServiceError, TelemetrySample, WorkerFleet,
};
use authscan_patterns::MatcherRegistry;
use authscan_security::SecretGate;
use authscan_sources::{ChangeSet, ChangeSetResolver, JsonCatalogReader, UnitFilter, VersionControl};
use authscan_storage::{MemoryStore, Store};
use tokio::sync::Semaphore;

const GUARDED_JAVA: &str = "class Svc {\n  @PreAuthorize(\"hasRole('ADMIN')\")\n  void close() {\n  }\n}\n";
const ANSWER: &str = "{\"policies\": [{\"subject\": \"ADMIN\", \"resource\": \"account\", \"action\": \"close\"}]}";

struct StaticTree {
    root: PathBuf,
}

#[async_trait]
impl VersionControl for StaticTree {
    async fn checkout(&self, _locator: &str) -> authscan_sources::Result<PathBuf> {
        Ok(self.root.clone())
    }

    async fn diff(&self, _tree: &Path, _since_ref: &str) -> authscan_sources::Result<ChangeSet> {
        Ok(ChangeSet::default())
    }

    async fn current_ref(&self, _tree: &Path) -> authscan_sources::Result<String> {
        Ok("c1".to_string())
    }
}

/// Holds every call until the test hands out permits.
struct GatedModel {
    gate: Semaphore,
    calls: AtomicUsize,
}

impl GatedModel {
    fn open() -> Self {
        Self {
            gate: Semaphore::new(Semaphore::MAX_PERMITS),
            calls: AtomicUsize::new(0),
        }
    }

    fn closed() -> Self {
        Self {
            gate: Semaphore::new(0),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ExtractionModel for GatedModel {
    async fn complete(&self, _prompt: &str, _max_tokens: u32, _temperature: f32) -> Result<String, ExtractionFailed> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| ExtractionFailed::new("gate closed"))?;
        Ok(ANSWER.to_string())
    }
}

struct Harness {
    service: ScanService,
    store: Arc<MemoryStore>,
    pool: LocalWorkerPool,
    model: Arc<GatedModel>,
    _dir: tempfile::TempDir,
}

fn autoscaler_config() -> AutoscalerConfig {
    AutoscalerConfig {
        min_workers: 1,
        max_workers: 4,
        consecutive_samples: 2,
        cooldown: Duration::ZERO,
        ..Default::default()
    }
}

async fn harness(model: GatedModel, workers: usize) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("src/Svc.java"), GUARDED_JAVA).unwrap();

    let store = Arc::new(MemoryStore::new());
    let model = Arc::new(model);
    let tree = Arc::new(StaticTree {
        root: dir.path().to_path_buf(),
    });
    let resolver = ChangeSetResolver::new(tree, Arc::new(JsonCatalogReader), UnitFilter::default());
    let pipeline = BatchPipeline::new(
        Arc::new(MatcherRegistry::default()),
        Arc::new(SecretGate::default()),
        model.clone(),
        store.clone(),
        PipelineConfig::default(),
    );
    let scanner = Arc::new(Scanner::new(Arc::new(resolver), Arc::new(pipeline), store.clone()));

    let pool = LocalWorkerPool::new(PoolConfig {
        initial_workers: workers,
        heartbeat_interval: Duration::from_millis(50),
        ..Default::default()
    });
    let controller = Arc::new(
        AutoscalerController::new(autoscaler_config(), Arc::new(pool.clone()), Arc::new(pool.clone()))
            .unwrap(),
    );
    let service = ScanService::new(scanner, Arc::new(pool.clone()), controller);

    Harness {
        service,
        store,
        pool,
        model,
        _dir: dir,
    }
}

async fn add_repository(store: &MemoryStore, tenant: &str, name: &str) -> String {
    let repo = RepositorySource::new(tenant, name, SourceKind::VersionControl, format!("/srv/{name}"));
    store.save_repository(&repo).await.unwrap();
    repo.id
}

async fn wait_terminal(service: &ScanService, scan_id: &str) -> ScanStatus {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let job = service.get_scan_progress(scan_id).await.unwrap();
            if job.is_terminal() {
                return job.status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("scan did not finish")
}

#[tokio::test]
async fn test_single_scan_through_the_queue() {
    let h = harness(GatedModel::open(), 2).await;
    let repo_id = add_repository(&h.store, "tenant-a", "billing").await;

    let scan_id = h.service.start_scan(&repo_id, false).await.unwrap();
    assert_eq!(wait_terminal(&h.service, &scan_id).await, ScanStatus::Completed);

    let job = h.service.get_scan_progress(&scan_id).await.unwrap();
    assert_eq!(job.files_scanned, 1);
    assert_eq!(job.policies_extracted, 1);

    let err = h.service.cancel_scan("no-such-scan").await.unwrap_err();
    assert!(matches!(err, ServiceError::ScanNotFound(_)));
}

#[tokio::test]
async fn test_bulk_scan_with_missing_repository() {
    let h = harness(GatedModel::open(), 2).await;
    let mut ids = Vec::new();
    for name in ["one", "two", "three", "four", "five"] {
        ids.push(add_repository(&h.store, "tenant-a", name).await);
    }
    ids[2] = "does-not-exist".to_string();

    let bulk_id = h.service.start_bulk_scan("tenant-a", &ids, 2, false).await.unwrap();
    let started = h.service.get_bulk_scan(&bulk_id).await.unwrap();
    assert_eq!(started.total_applications, 5);
    assert_eq!(started.initiated_scans, 4);
    assert_eq!(started.failed_initiations, 1);

    let status = tokio::time::timeout(Duration::from_secs(10), h.service.wait_for_bulk_scan(&bulk_id))
        .await
        .expect("bulk scan did not settle")
        .unwrap();
    assert_eq!(status, BulkScanStatus::CompletedWithErrors);

    let bulk = h.service.get_bulk_scan(&bulk_id).await.unwrap();
    assert_eq!(bulk.completed_applications, 4);
    assert_eq!(bulk.failed_applications, 1);
    assert_eq!(bulk.resolved(), bulk.total_applications);
    assert_eq!(bulk.total_policies, 4);
    assert!(bulk.average_duration_ms.is_some());
    let missing = bulk.children.iter().find(|c| c.repository_id == "does-not-exist").unwrap();
    assert_eq!(missing.state, ChildState::Failed);
    assert!(missing.scan_job_id.is_none());

    let stored = h.store.get_bulk_job(&bulk_id).await.unwrap().unwrap();
    assert_eq!(stored.status, BulkScanStatus::CompletedWithErrors);
}

#[tokio::test]
async fn test_bulk_scan_rejects_foreign_tenant() {
    let h = harness(GatedModel::open(), 1).await;
    let own = add_repository(&h.store, "tenant-a", "mine").await;
    let foreign = add_repository(&h.store, "tenant-b", "theirs").await;

    let bulk_id = h
        .service
        .start_bulk_scan("tenant-a", &[own, foreign.clone()], 1, false)
        .await
        .unwrap();
    let status = tokio::time::timeout(Duration::from_secs(10), h.service.wait_for_bulk_scan(&bulk_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status, BulkScanStatus::CompletedWithErrors);

    let bulk = h.service.get_bulk_scan(&bulk_id).await.unwrap();
    let child = bulk.children.iter().find(|c| c.repository_id == foreign).unwrap();
    assert!(child.error.as_deref().unwrap().contains("tenant-a"));
    assert!(h.store.list_scan_jobs(&foreign).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_bulk_scan_requires_parallelism() {
    let h = harness(GatedModel::open(), 1).await;
    let id = add_repository(&h.store, "tenant-a", "one").await;
    let err = h.service.start_bulk_scan("tenant-a", &[id], 0, false).await.unwrap_err();
    assert!(matches!(err, ServiceError::Fleet(FleetError::InvalidRequest(_))));
}

#[tokio::test]
async fn test_cancel_bulk_scan_stops_pending_children() {
    let h = harness(GatedModel::closed(), 2).await;
    let mut ids = Vec::new();
    for name in ["one", "two", "three"] {
        ids.push(add_repository(&h.store, "tenant-a", name).await);
    }

    let bulk_id = h.service.start_bulk_scan("tenant-a", &ids, 1, false).await.unwrap();

    // Wait for the first child to reach the model.
    tokio::time::timeout(Duration::from_secs(10), async {
        while h.model.calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert!(h.service.cancel_bulk_scan(&bulk_id).await.unwrap());
    assert!(!h.service.cancel_bulk_scan(&bulk_id).await.unwrap());
    h.model.gate.add_permits(16);

    let mut statuses = Vec::new();
    for id in &ids {
        let scan_id = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let jobs = h.store.list_scan_jobs(id).await.unwrap();
                if let Some(job) = jobs.into_iter().find(|j| j.is_terminal()) {
                    return job.id;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        statuses.push(h.service.get_scan_progress(&scan_id).await.unwrap().status);
    }

    assert_eq!(statuses.iter().filter(|s| **s == ScanStatus::Completed).count(), 1);
    assert_eq!(statuses.iter().filter(|s| **s == ScanStatus::Cancelled).count(), 2);
    assert_eq!(h.model.calls.load(Ordering::SeqCst), 1);

    let bulk = h.service.get_bulk_scan(&bulk_id).await.unwrap();
    assert_eq!(bulk.status, BulkScanStatus::Cancelled);
}

#[tokio::test]
async fn test_bulk_children_waiting_for_a_slot_leave_workers_free() {
    let h = harness(GatedModel::closed(), 2).await;
    let mut ids = Vec::new();
    for name in ["one", "two", "three"] {
        ids.push(add_repository(&h.store, "tenant-a", name).await);
    }
    let other = add_repository(&h.store, "tenant-b", "ledger").await;

    let bulk_id = h.service.start_bulk_scan("tenant-a", &ids, 1, false).await.unwrap();
    let scan_id = h.service.start_scan(&other, false).await.unwrap();

    // One bulk child and the unrelated scan both reach the model.
    tokio::time::timeout(Duration::from_secs(10), async {
        while h.model.calls.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("unrelated scan never got a worker");

    let snapshot = h.pool.inspect();
    assert_eq!(snapshot.active_jobs, 2);
    assert_eq!(snapshot.queue_depth, 0);
    assert_eq!(
        h.service.get_scan_progress(&scan_id).await.unwrap().status,
        ScanStatus::Processing
    );

    h.model.gate.add_permits(16);
    assert_eq!(wait_terminal(&h.service, &scan_id).await, ScanStatus::Completed);
    let status = tokio::time::timeout(Duration::from_secs(10), h.service.wait_for_bulk_scan(&bulk_id))
        .await
        .expect("bulk scan did not settle")
        .unwrap();
    assert_eq!(status, BulkScanStatus::Completed);
    assert_eq!(h.model.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_manual_scale_outside_bounds_is_rejected() {
    let h = harness(GatedModel::open(), 2).await;

    let err = h.service.request_manual_scale(0).unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Fleet(FleetError::OutOfBounds { target: 0, min: 1, max: 4 })
    ));
    assert!(h.service.request_manual_scale(5).is_err());

    let metrics = h.service.get_autoscaler_metrics();
    assert_eq!(metrics.state.current_worker_count, 2);
    assert!(metrics.state.last_scale_at.is_none());
    assert_eq!(h.pool.worker_count(), 2);

    h.service.request_manual_scale(3).unwrap();
    assert_eq!(h.pool.worker_count(), 3);
    assert_eq!(h.service.get_autoscaler_metrics().state.current_worker_count, 3);
}

#[tokio::test]
async fn test_controller_steps_down_per_consecutive_samples() {
    let pool = LocalWorkerPool::new(PoolConfig {
        initial_workers: 4,
        heartbeat_interval: Duration::from_millis(50),
        ..Default::default()
    });
    let controller =
        AutoscalerController::new(autoscaler_config(), Arc::new(pool.clone()), Arc::new(pool.clone())).unwrap();

    let sample = |sequence| TelemetrySample {
        sequence,
        queue_depth: 0,
        active_jobs: 0,
    };
    assert_eq!(controller.apply_sample(&sample(1)), ScaleDecision::Hold);
    assert_eq!(controller.apply_sample(&sample(2)), ScaleDecision::ScaleDown { from: 4, to: 3 });
    assert_eq!(pool.worker_count(), 3);
    assert_eq!(controller.apply_sample(&sample(2)), ScaleDecision::Ignored);
    assert_eq!(controller.apply_sample(&sample(3)), ScaleDecision::Hold);
    assert_eq!(controller.apply_sample(&sample(4)), ScaleDecision::ScaleDown { from: 3, to: 2 });
    assert_eq!(pool.worker_count(), 2);

    let report = controller.restart_failed_workers();
    assert!(report.success);
    assert_eq!(report.restarted, 0);
}

/// Fleet whose resizes always fail.
struct RigidFleet;

impl WorkerFleet for RigidFleet {
    fn inspect(&self) -> FleetSnapshot {
        FleetSnapshot {
            queue_depth: 0,
            active_jobs: 0,
            worker_count: 4,
            workers: Vec::new(),
        }
    }

    fn worker_count(&self) -> usize {
        4
    }

    fn scale_to(&self, _target: usize) -> authscan_fleet::Result<usize> {
        Err(FleetError::InvalidRequest("resize refused".to_string()))
    }

    fn restart_failed(&self) -> usize {
        0
    }
}

impl JobQueue for RigidFleet {
    fn enqueue(&self, _job: QueuedJob) -> authscan_fleet::Result<()> {
        Ok(())
    }

    fn depth(&self) -> usize {
        0
    }
}

#[test]
fn test_failed_resize_keeps_recorded_worker_count() {
    let controller =
        AutoscalerController::new(autoscaler_config(), Arc::new(RigidFleet), Arc::new(RigidFleet)).unwrap();
    let sample = |sequence| TelemetrySample {
        sequence,
        queue_depth: 0,
        active_jobs: 0,
    };

    assert_eq!(controller.apply_sample(&sample(1)), ScaleDecision::Hold);
    assert_eq!(
        controller.apply_sample(&sample(2)),
        ScaleDecision::ScaleFailed { from: 4, to: 3 }
    );

    let metrics = controller.metrics();
    assert_eq!(metrics.state.current_worker_count, 4);
    assert_eq!(metrics.state.current_worker_count, metrics.status.live_workers);
    assert!(metrics.state.last_scale_at.is_none());
    assert_eq!(metrics.state.last_decision, ScaleDecision::ScaleFailed { from: 4, to: 3 });
}
