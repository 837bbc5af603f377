//! Hands prepared scans to the job queue and tracks their cancel flags.

use std::future::Future;
use std::sync::Arc;

use authscan_engine::{CancelFlag, PreparedScan, ScanReport, Scanner};
use dashmap::DashMap;
use tokio::sync::OwnedSemaphorePermit;
use tracing::debug;

use crate::error::Result;
use crate::queue::{JobQueue, QueuedJob};

pub struct Dispatcher {
    scanner: Arc<Scanner>,
    queue: Arc<dyn JobQueue>,
    active: DashMap<String, CancelFlag>,
}

impl Dispatcher {
    pub fn new(scanner: Arc<Scanner>, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            scanner,
            queue,
            active: DashMap::new(),
        }
    }

    pub fn scanner(&self) -> &Arc<Scanner> {
        &self.scanner
    }

    /// Register `scan_id` as live before it is queued, so it can be
    /// cancelled while it waits. Returns the existing flag if already live.
    pub fn reserve(&self, scan_id: &str) -> CancelFlag {
        self.active
            .entry(scan_id.to_string())
            .or_insert_with(CancelFlag::new)
            .clone()
    }

    /// Queue `prepared`; `on_complete` receives the terminal report. A
    /// `slot` permit is held until the scan reaches a terminal state.
    pub fn submit<F, Fut>(
        self: &Arc<Self>,
        prepared: PreparedScan,
        slot: Option<OwnedSemaphorePermit>,
        on_complete: F,
    ) -> Result<String>
    where
        F: FnOnce(ScanReport) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let scan_id = prepared.job.id.clone();
        let flag = self.reserve(&scan_id);

        let dispatcher = Arc::clone(self);
        let id = scan_id.clone();
        let task = async move {
            let report = dispatcher.scanner.run(prepared, &flag).await;
            dispatcher.active.remove(&id);
            drop(slot);
            on_complete(report).await;
        };

        if let Err(e) = self.queue.enqueue(QueuedJob::new(scan_id.clone(), task)) {
            self.active.remove(&scan_id);
            return Err(e);
        }
        debug!(scan_id = %scan_id, "scan submitted");
        Ok(scan_id)
    }

    /// Settle a scan that will never be queued as cancelled, without
    /// taking a worker.
    pub async fn abandon(&self, prepared: PreparedScan) -> ScanReport {
        let scan_id = prepared.job.id.clone();
        let flag = self.reserve(&scan_id);
        flag.cancel();
        let report = self.scanner.run(prepared, &flag).await;
        self.active.remove(&scan_id);
        report
    }

    /// Request cooperative cancellation. False if the scan is not live here.
    pub fn cancel(&self, scan_id: &str) -> bool {
        match self.active.get(scan_id) {
            Some(flag) => {
                flag.cancel();
                true
            }
            None => false,
        }
    }
}
