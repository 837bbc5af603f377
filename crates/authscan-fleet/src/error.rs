//! Error types for authscan-fleet

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FleetError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FleetError {
    #[error("Job queue is closed")]
    QueueClosed,

    #[error("Invalid autoscaler config: {0}")]
    InvalidConfig(String),

    #[error("Worker count {target} outside [{min}, {max}]")]
    OutOfBounds { target: usize, min: usize, max: usize },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Errors surfaced by [`crate::ScanService`] and the bulk coordinator.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Pipeline(#[from] authscan_engine::PipelineError),

    #[error("Storage error: {0}")]
    Storage(#[from] authscan_storage::StorageError),

    #[error(transparent)]
    Fleet(#[from] FleetError),

    #[error("Scan job not found: {0}")]
    ScanNotFound(String),

    #[error("Bulk scan not found: {0}")]
    BulkScanNotFound(String),
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
