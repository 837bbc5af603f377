//! Shared job queue and local worker pool
//!
//! Workers are tokio tasks pulling from one unbounded queue. Each worker
//! heartbeats while idle and while its job runs, so a worker whose task died
//! or stopped making progress can be told apart from a busy one.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{FleetError, Result};

pub type JobTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A unit of work on the shared queue.
pub struct QueuedJob {
    /// Scan job id, reported by the worker running it
    pub id: String,
    pub task: JobTask,
}

impl QueuedJob {
    pub fn new<F>(id: impl Into<String>, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            id: id.into(),
            task: Box::pin(task),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Busy,
    /// Finishing its current job, then exits
    Retiring,
    /// Task ended unexpectedly or heartbeat went stale
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerInfo {
    pub id: u64,
    pub state: WorkerState,
    pub current_job: Option<String>,
    pub jobs_completed: u64,
    /// Milliseconds since the last heartbeat
    pub heartbeat_age_ms: u64,
}

/// Point-in-time view of queue and workers.
#[derive(Debug, Clone, Serialize)]
pub struct FleetSnapshot {
    pub queue_depth: usize,
    pub active_jobs: usize,
    pub worker_count: usize,
    pub workers: Vec<WorkerInfo>,
}

impl FleetSnapshot {
    pub fn failed_workers(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| w.state == WorkerState::Failed)
            .count()
    }
}

pub trait JobQueue: Send + Sync {
    fn enqueue(&self, job: QueuedJob) -> Result<()>;

    /// Jobs waiting for a worker.
    fn depth(&self) -> usize;
}

pub trait WorkerFleet: Send + Sync {
    fn inspect(&self) -> FleetSnapshot;

    /// Live workers, excluding retiring and failed ones.
    fn worker_count(&self) -> usize;

    /// Grow or shrink to `target` workers. Shrinking retires idle workers
    /// first; busy ones finish their job before exiting.
    fn scale_to(&self, target: usize) -> Result<usize>;

    /// Replace the workers `inspect` reports as failed. Returns how many
    /// were replaced.
    fn restart_failed(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub initial_workers: usize,
    /// How often an idle worker wakes to heartbeat and check for retirement
    pub heartbeat_interval: Duration,
    /// A busy worker silent for longer than this counts as failed
    pub heartbeat_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_workers: 2,
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(120),
        }
    }
}

struct WorkerStatus {
    state: WorkerState,
    current_job: Option<String>,
    jobs_completed: u64,
    last_heartbeat: Instant,
}

struct WorkerSlot {
    handle: JoinHandle<()>,
    retire: Arc<AtomicBool>,
    status: Arc<Mutex<WorkerStatus>>,
}

struct PoolInner {
    sender: mpsc::UnboundedSender<QueuedJob>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<QueuedJob>>,
    workers: DashMap<u64, WorkerSlot>,
    pending: AtomicUsize,
    next_worker_id: AtomicU64,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
}

/// In-process worker pool. Must be created inside a tokio runtime.
#[derive(Clone)]
pub struct LocalWorkerPool {
    inner: Arc<PoolInner>,
}

fn lock(status: &Mutex<WorkerStatus>) -> std::sync::MutexGuard<'_, WorkerStatus> {
    status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl LocalWorkerPool {
    pub fn new(config: PoolConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let pool = Self {
            inner: Arc::new(PoolInner {
                sender,
                receiver: tokio::sync::Mutex::new(receiver),
                workers: DashMap::new(),
                pending: AtomicUsize::new(0),
                next_worker_id: AtomicU64::new(1),
                heartbeat_interval: config.heartbeat_interval,
                heartbeat_timeout: config.heartbeat_timeout,
            }),
        };
        for _ in 0..config.initial_workers {
            pool.spawn_worker();
        }
        pool
    }

    fn spawn_worker(&self) -> u64 {
        let id = self.inner.next_worker_id.fetch_add(1, Ordering::SeqCst);
        let retire = Arc::new(AtomicBool::new(false));
        let status = Arc::new(Mutex::new(WorkerStatus {
            state: WorkerState::Idle,
            current_job: None,
            jobs_completed: 0,
            last_heartbeat: Instant::now(),
        }));

        let handle = tokio::spawn(worker_loop(
            id,
            Arc::clone(&self.inner),
            Arc::clone(&retire),
            Arc::clone(&status),
        ));
        self.inner.workers.insert(
            id,
            WorkerSlot {
                handle,
                retire,
                status,
            },
        );
        debug!(worker = id, "worker started");
        id
    }

    fn is_failed(slot: &WorkerSlot, heartbeat_timeout: Duration) -> bool {
        if slot.retire.load(Ordering::SeqCst) {
            return false;
        }
        if slot.handle.is_finished() {
            return true;
        }
        let status = lock(&slot.status);
        status.state == WorkerState::Busy && status.last_heartbeat.elapsed() > heartbeat_timeout
    }
}

async fn worker_loop(
    id: u64,
    inner: Arc<PoolInner>,
    retire: Arc<AtomicBool>,
    status: Arc<Mutex<WorkerStatus>>,
) {
    let interval = inner.heartbeat_interval;
    loop {
        if retire.load(Ordering::SeqCst) {
            break;
        }
        lock(&status).last_heartbeat = Instant::now();

        let next = tokio::time::timeout(interval, async {
            inner.receiver.lock().await.recv().await
        })
        .await;
        let job = match next {
            Err(_) => continue,
            Ok(None) => break,
            Ok(Some(job)) => job,
        };

        inner.pending.fetch_sub(1, Ordering::SeqCst);
        {
            let mut s = lock(&status);
            s.state = WorkerState::Busy;
            s.current_job = Some(job.id.clone());
            s.last_heartbeat = Instant::now();
        }
        debug!(worker = id, job = %job.id, "job started");

        let mut task = job.task;
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = &mut task => break,
                _ = ticker.tick() => lock(&status).last_heartbeat = Instant::now(),
            }
        }

        let mut s = lock(&status);
        s.state = if retire.load(Ordering::SeqCst) {
            WorkerState::Retiring
        } else {
            WorkerState::Idle
        };
        s.current_job = None;
        s.jobs_completed += 1;
    }

    inner.workers.remove(&id);
    debug!(worker = id, "worker exited");
}

impl JobQueue for LocalWorkerPool {
    fn enqueue(&self, job: QueuedJob) -> Result<()> {
        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        if self.inner.sender.send(job).is_err() {
            self.inner.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(FleetError::QueueClosed);
        }
        Ok(())
    }

    fn depth(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }
}

impl WorkerFleet for LocalWorkerPool {
    fn inspect(&self) -> FleetSnapshot {
        let heartbeat_timeout = self.inner.heartbeat_timeout;
        let mut workers: Vec<WorkerInfo> = self
            .inner
            .workers
            .iter()
            .map(|entry| {
                let slot = entry.value();
                let failed = Self::is_failed(slot, heartbeat_timeout);
                let status = lock(&slot.status);
                let state = if failed {
                    WorkerState::Failed
                } else if slot.retire.load(Ordering::SeqCst) {
                    WorkerState::Retiring
                } else {
                    status.state
                };
                WorkerInfo {
                    id: *entry.key(),
                    state,
                    current_job: status.current_job.clone(),
                    jobs_completed: status.jobs_completed,
                    heartbeat_age_ms: status.last_heartbeat.elapsed().as_millis() as u64,
                }
            })
            .collect();
        workers.sort_by_key(|w| w.id);

        FleetSnapshot {
            queue_depth: self.depth(),
            active_jobs: workers.iter().filter(|w| w.current_job.is_some()).count(),
            worker_count: workers
                .iter()
                .filter(|w| matches!(w.state, WorkerState::Idle | WorkerState::Busy))
                .count(),
            workers,
        }
    }

    fn worker_count(&self) -> usize {
        self.inner
            .workers
            .iter()
            .filter(|w| !w.retire.load(Ordering::SeqCst) && !w.handle.is_finished())
            .count()
    }

    fn scale_to(&self, target: usize) -> Result<usize> {
        let current = self.worker_count();
        if target > current {
            for _ in current..target {
                self.spawn_worker();
            }
        } else if target < current {
            let mut live: Vec<(u64, bool)> = self
                .inner
                .workers
                .iter()
                .filter(|w| !w.retire.load(Ordering::SeqCst) && !w.handle.is_finished())
                .map(|w| (*w.key(), lock(&w.status).state == WorkerState::Busy))
                .collect();
            // Idle workers first, then the newest.
            live.sort_by_key(|(id, busy)| (*busy, std::cmp::Reverse(*id)));
            for (id, _) in live.into_iter().take(current - target) {
                if let Some(slot) = self.inner.workers.get(&id) {
                    slot.retire.store(true, Ordering::SeqCst);
                }
            }
        }
        info!(from = current, to = target, "worker pool resized");
        Ok(target)
    }

    fn restart_failed(&self) -> usize {
        let heartbeat_timeout = self.inner.heartbeat_timeout;
        let failed: Vec<u64> = self
            .inner
            .workers
            .iter()
            .filter(|entry| Self::is_failed(entry.value(), heartbeat_timeout))
            .map(|entry| *entry.key())
            .collect();

        for id in &failed {
            if let Some((_, slot)) = self.inner.workers.remove(id) {
                slot.handle.abort();
                let job = lock(&slot.status).current_job.clone();
                warn!(worker = id, job = ?job, "replacing failed worker");
            }
            self.spawn_worker();
        }
        failed.len()
    }
}
