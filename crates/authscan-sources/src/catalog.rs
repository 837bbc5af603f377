//! Database procedure catalogs

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SourceError};

/// Hex digits kept from each blake3 digest
const DIGEST_LEN: usize = 16;

/// A stored procedure, function, trigger or package body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureDefinition {
    #[serde(default)]
    pub schema: String,
    pub name: String,
    #[serde(default = "default_object_type")]
    pub object_type: String,
    pub definition: String,
    /// RFC 3339 timestamp of the last DDL change, as exported
    #[serde(default)]
    pub modified_at: Option<String>,
}

fn default_object_type() -> String {
    "procedure".to_string()
}

impl ProcedureDefinition {
    /// Stable virtual path used as the unit's file path, e.g. `billing/close_account.sql`.
    pub fn virtual_path(&self) -> String {
        if self.schema.is_empty() {
            format!("{}.sql", self.name)
        } else {
            format!("{}/{}.sql", self.schema, self.name)
        }
    }

    /// Content digest of the object type and body.
    pub fn digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.object_type.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.definition.as_bytes());
        short_hex(&hasher.finalize())
    }
}

fn short_hex(hash: &blake3::Hash) -> String {
    hash.to_hex().as_str()[..DIGEST_LEN].to_string()
}

/// Checkpoint of a catalog scan: one digest per procedure plus a snapshot
/// digest over all of them. Serialized as JSON into the repository checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogManifest {
    pub snapshot: String,
    /// Virtual path to procedure digest
    pub units: BTreeMap<String, String>,
}

impl CatalogManifest {
    pub fn build(procedures: &[ProcedureDefinition]) -> Self {
        let units: BTreeMap<String, String> = procedures
            .iter()
            .map(|p| (p.virtual_path(), p.digest()))
            .collect();
        let mut hasher = blake3::Hasher::new();
        for (path, digest) in &units {
            hasher.update(path.as_bytes());
            hasher.update(b"\0");
            hasher.update(digest.as_bytes());
            hasher.update(b"\n");
        }
        Self {
            snapshot: short_hex(&hasher.finalize()),
            units,
        }
    }

    /// None when `checkpoint` was not written by [`CatalogManifest::to_checkpoint`].
    pub fn parse(checkpoint: &str) -> Option<Self> {
        serde_json::from_str(checkpoint).ok()
    }

    pub fn to_checkpoint(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }

    /// True when `procedure` is new or its body changed since this manifest.
    pub fn is_stale(&self, procedure: &ProcedureDefinition) -> bool {
        self.units.get(&procedure.virtual_path()) != Some(&procedure.digest())
    }

    /// Paths recorded in `previous` that this manifest no longer has.
    pub fn removed_since(&self, previous: &CatalogManifest) -> Vec<String> {
        previous
            .units
            .keys()
            .filter(|path| !self.units.contains_key(*path))
            .cloned()
            .collect()
    }
}

/// Short label for a repository checkpoint.
pub fn checkpoint_label(checkpoint: &str) -> String {
    match CatalogManifest::parse(checkpoint) {
        Some(manifest) => format!(
            "catalog snapshot {} ({} procedures)",
            manifest.snapshot,
            manifest.units.len()
        ),
        None => checkpoint.to_string(),
    }
}

#[async_trait]
pub trait CatalogReader: Send + Sync {
    async fn list_procedures(&self, descriptor: &str) -> Result<Vec<ProcedureDefinition>>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogExport {
    Wrapped { procedures: Vec<ProcedureDefinition> },
    Bare(Vec<ProcedureDefinition>),
}

/// Reads a JSON catalog export. The descriptor is the export's path,
/// optionally prefixed with `json:`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCatalogReader;

#[async_trait]
impl CatalogReader for JsonCatalogReader {
    async fn list_procedures(&self, descriptor: &str) -> Result<Vec<ProcedureDefinition>> {
        let path = descriptor.strip_prefix("json:").unwrap_or(descriptor);
        let raw = tokio::fs::read_to_string(Path::new(path))
            .await
            .map_err(|e| SourceError::Connection {
                descriptor: descriptor.to_string(),
                reason: e.to_string(),
            })?;

        let procedures = match serde_json::from_str::<CatalogExport>(&raw)? {
            CatalogExport::Wrapped { procedures } => procedures,
            CatalogExport::Bare(procedures) => procedures,
        };
        debug!(descriptor, count = procedures.len(), "loaded procedure catalog");
        Ok(procedures)
    }
}
