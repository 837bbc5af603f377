use thiserror::Error;

use crate::scan::ScanStatus;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("Scan job not found: {0}")]
    ScanJobNotFound(String),

    #[error("Bulk scan job not found: {0}")]
    BulkScanJobNotFound(String),

    #[error("Invalid scan transition: {from} -> {to}")]
    InvalidTransition { from: ScanStatus, to: ScanStatus },

    #[error("Progress invariant violated: {0}")]
    ProgressInvariant(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
