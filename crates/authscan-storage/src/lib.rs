//! Storage layer for authscan
//!
//! Handles persistence of:
//! - Registered repositories and their checkpoints
//! - Scan job progress (one row per job, rewritten at every batch commit)
//! - Bulk scan aggregates
//! - Extracted policies and their evidence

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod store;

pub use error::{Result, StorageError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{PolicyScope, Store, StoredPolicy};
