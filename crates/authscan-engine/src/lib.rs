//! Scanning engine for authscan
//!
//! This crate provides:
//! - The extraction model client and tolerant response parsing
//! - The batch pipeline (pre-filter, redact, extract, persist, checkpoint)
//! - The per-repository scan state machine and its advisory locks

pub mod error;
pub mod extraction;
pub mod locks;
pub mod pipeline;
pub mod response;
pub mod scanner;

pub use error::{PipelineError, Result};
pub use extraction::{ExtractionFailed, ExtractionModel, ExtractionSettings, HttpExtractionModel};
pub use locks::{RepositoryGuard, RepositoryLocks};
pub use pipeline::{
    BatchPipeline, CancelFlag, PipelineConfig, PipelineOutcome, PipelineStatus, UnitError,
    UnitErrorKind,
};
pub use response::{MalformedResponse, backfill_evidence, parse_policies};
pub use scanner::{PreparedScan, ScanReport, Scanner};
