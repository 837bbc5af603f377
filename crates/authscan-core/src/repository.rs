//! Repository source domain model

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A registered scan target: a version-controlled tree or a procedure catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositorySource {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub kind: SourceKind,
    /// Clone URL / local path, or catalog connection descriptor
    pub locator: String,
    /// Commit id or catalog snapshot marker of the last successful scan
    pub checkpoint: Option<String>,
    pub status: RepositoryStatus,
    #[serde(with = "time::serde::timestamp")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::timestamp")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::timestamp::option", default)]
    pub last_scanned_at: Option<OffsetDateTime>,
}

impl RepositorySource {
    pub fn new(
        tenant_id: impl Into<String>,
        name: impl Into<String>,
        kind: SourceKind,
        locator: impl Into<String>,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            name: name.into(),
            kind,
            locator: locator.into(),
            checkpoint: None,
            status: RepositoryStatus::Registered,
            created_at: now,
            updated_at: now,
            last_scanned_at: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Record a successful scan that reached `checkpoint`.
    pub fn advance_checkpoint(&mut self, checkpoint: Option<String>) {
        let now = OffsetDateTime::now_utc();
        if checkpoint.is_some() {
            self.checkpoint = checkpoint;
        }
        self.status = RepositoryStatus::Ready;
        self.last_scanned_at = Some(now);
        self.updated_at = now;
    }

    pub fn set_status(&mut self, status: RepositoryStatus) {
        self.status = status;
        self.updated_at = OffsetDateTime::now_utc();
    }

    pub fn belongs_to(&self, tenant_id: &str) -> bool {
        self.tenant_id == tenant_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    VersionControl,
    ProcedureCatalog,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::VersionControl => "version_control",
            SourceKind::ProcedureCatalog => "procedure_catalog",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "version_control" | "git" => Some(SourceKind::VersionControl),
            "procedure_catalog" | "catalog" | "database" => Some(SourceKind::ProcedureCatalog),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryStatus {
    Registered,
    Scanning,
    Ready,
    Error,
}

impl RepositoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepositoryStatus::Registered => "registered",
            RepositoryStatus::Scanning => "scanning",
            RepositoryStatus::Ready => "ready",
            RepositoryStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "registered" => Some(RepositoryStatus::Registered),
            "scanning" => Some(RepositoryStatus::Scanning),
            "ready" => Some(RepositoryStatus::Ready),
            "error" => Some(RepositoryStatus::Error),
            _ => None,
        }
    }
}
