//! Repository acquisition and candidate enumeration

pub mod catalog;
pub mod denylist;
pub mod error;
pub mod resolver;
pub mod vcs;

pub use catalog::{CatalogManifest, CatalogReader, JsonCatalogReader, ProcedureDefinition, checkpoint_label};
pub use denylist::{DEFAULT_DENYLIST, Denylist};
pub use error::{Result, SourceError};
pub use resolver::{AcquiredSource, CandidateSet, ChangeSetResolver, SourceUnit, SourceUnits, UnitFilter};
pub use vcs::{ChangeSet, GitCli, VersionControl};
