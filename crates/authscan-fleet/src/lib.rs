//! Fleet layer for authscan
//!
//! This crate provides:
//! - The shared job queue and the local worker pool that drains it
//! - The autoscaler control law and its periodic controller
//! - Bulk scan coordination across many repositories
//! - [`ScanService`], the operations exposed to callers

pub mod autoscaler;
pub mod bulk;
pub mod dispatch;
pub mod error;
pub mod queue;
pub mod service;

pub use autoscaler::{
    Autoscaler, AutoscalerConfig, AutoscalerController, AutoscalerMetrics, AutoscalerState,
    FleetStatus, RestartReport, ScaleDecision, TelemetrySample,
};
pub use bulk::BulkCoordinator;
pub use dispatch::Dispatcher;
pub use error::{FleetError, Result, ServiceError, ServiceResult};
pub use queue::{
    FleetSnapshot, JobQueue, LocalWorkerPool, PoolConfig, QueuedJob, WorkerFleet, WorkerInfo,
    WorkerState,
};
pub use service::ScanService;
