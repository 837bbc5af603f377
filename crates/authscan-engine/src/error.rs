//! Error types for authscan-engine

use authscan_security::SecretLeak;
use authscan_sources::SourceError;
use authscan_storage::StorageError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that end a scan. Per-unit failures are [`crate::UnitError`]s and
/// never surface here.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("Scan already in progress for repository {repository_id} (job {scan_job_id})")]
    ScanInProgress {
        repository_id: String,
        scan_job_id: String,
    },

    #[error("Source unavailable: {0}")]
    Source(#[from] SourceError),

    #[error("Secret gate: {0}")]
    SecretLeak(#[from] SecretLeak),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Job(#[from] authscan_core::Error),
}
