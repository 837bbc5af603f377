//! Core domain models for authscan
//!
//! This crate contains:
//! - Repository sources and their checkpoints
//! - Scan and bulk-scan job records with their progress invariants
//! - Ephemeral candidates and authorization details produced by matchers
//! - Extracted policy records handed to persistence

pub mod bulk;
pub mod candidate;
pub mod error;
pub mod language;
pub mod policy;
pub mod repository;
pub mod scan;

pub use bulk::{BulkChild, BulkScanJob, BulkScanStatus, ChildOutcome, ChildState};
pub use candidate::{AuthorizationCandidate, AuthorizationDetail, ConstructKind, Match};
pub use error::{Error, Result};
pub use language::Language;
pub use policy::{Evidence, ExtractedPolicyRecord, PolicyId};
pub use repository::{RepositorySource, RepositoryStatus, SourceKind};
pub use scan::{BatchProgress, ScanJob, ScanStatus, ScanTelemetry};
