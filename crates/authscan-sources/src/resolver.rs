//! Change-set resolution and lazy unit enumeration
//!
//! A [`CandidateSet`] describes what to scan without loading any of it.
//! Each call to [`CandidateSet::units`] starts a fresh, single-pass walk that
//! reads one unit at a time, so memory stays bounded by the consumer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use authscan_core::{Language, RepositorySource, SourceKind};
use ignore::WalkBuilder;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogManifest, CatalogReader, ProcedureDefinition};
use crate::denylist::Denylist;
use crate::error::{Result, SourceError};
use crate::vcs::VersionControl;

/// One file or procedure, loaded on demand.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    pub path: String,
    pub language: Language,
    pub content: String,
}

pub type SourceUnits<'a> = Box<dyn Iterator<Item = Result<SourceUnit>> + Send + 'a>;

/// Which paths may become units.
#[derive(Debug, Clone)]
pub struct UnitFilter {
    denylist: Denylist,
    max_file_bytes: u64,
    languages: Vec<Language>,
}

impl UnitFilter {
    pub fn new(denylist: Denylist, max_file_bytes: u64) -> Self {
        Self {
            denylist,
            max_file_bytes,
            languages: Language::ALL.to_vec(),
        }
    }

    pub fn with_languages(mut self, languages: &[Language]) -> Self {
        self.languages = languages.to_vec();
        self
    }

    /// Language of an acceptable path, None when it is denied or unsupported.
    pub fn language_for(&self, rel_path: &str) -> Option<Language> {
        if let Some(pattern) = self.denylist.matching_pattern(rel_path) {
            debug!(path = rel_path, pattern, "denied by pattern");
            return None;
        }
        Language::from_path(Path::new(rel_path)).filter(|l| self.languages.contains(l))
    }

    fn load_file(&self, abs: &Path, rel_path: String) -> Option<Result<SourceUnit>> {
        let language = self.language_for(&rel_path)?;

        let size = match std::fs::metadata(abs) {
            Ok(meta) => meta.len(),
            Err(source) => return Some(Err(SourceError::Read { path: rel_path, source })),
        };
        if size > self.max_file_bytes {
            debug!(path = %rel_path, size, "skipping oversized file");
            return None;
        }

        match std::fs::read(abs) {
            Ok(bytes) => Some(Ok(SourceUnit {
                content: String::from_utf8_lossy(&bytes).into_owned(),
                path: rel_path,
                language,
            })),
            Err(source) => Some(Err(SourceError::Read { path: rel_path, source })),
        }
    }

    fn load_procedure(&self, procedure: &ProcedureDefinition) -> Option<Result<SourceUnit>> {
        let path = procedure.virtual_path();
        if !self.languages.contains(&Language::ProceduralSql) {
            return None;
        }
        if let Some(pattern) = self.denylist.matching_pattern(&path) {
            debug!(path = %path, pattern, "denied by pattern");
            return None;
        }
        if procedure.definition.len() as u64 > self.max_file_bytes {
            debug!(path = %path, "skipping oversized procedure");
            return None;
        }
        Some(Ok(SourceUnit {
            path,
            language: Language::ProceduralSql,
            content: procedure.definition.clone(),
        }))
    }
}

impl Default for UnitFilter {
    fn default() -> Self {
        Self::new(Denylist::with_defaults(), 1024 * 1024)
    }
}

/// Repository content made available by `acquire`.
#[derive(Debug, Clone)]
pub enum AcquiredSource {
    Tree { root: PathBuf, head: String },
    Catalog { procedures: Vec<ProcedureDefinition> },
}

impl AcquiredSource {
    /// Checkpoint a successful scan of this content would record.
    pub fn checkpoint(&self) -> Option<String> {
        match self {
            AcquiredSource::Tree { head, .. } => Some(head.clone()),
            AcquiredSource::Catalog { procedures } => CatalogManifest::build(procedures).to_checkpoint(),
        }
    }
}

enum Scope {
    FullTree(PathBuf),
    ChangedFiles { root: PathBuf, paths: Vec<PathBuf> },
    Procedures(Vec<ProcedureDefinition>),
}

/// The resolved set of units for one scan.
pub struct CandidateSet {
    scope: Scope,
    filter: UnitFilter,
    target_checkpoint: Option<String>,
    incremental: bool,
    deleted: Vec<String>,
}

impl CandidateSet {
    pub fn target_checkpoint(&self) -> Option<&str> {
        self.target_checkpoint.as_deref()
    }

    /// True when only changes since a checkpoint are enumerated.
    pub fn is_incremental(&self) -> bool {
        self.incremental
    }

    /// Paths removed since the checkpoint. Their stored policies are stale.
    pub fn deleted_paths(&self) -> &[String] {
        &self.deleted
    }

    /// Start a fresh enumeration.
    pub fn units(&self) -> SourceUnits<'_> {
        let filter = &self.filter;
        match &self.scope {
            Scope::FullTree(root) => {
                let walker = WalkBuilder::new(root)
                    .sort_by_file_path(|a, b| a.cmp(b))
                    .build();
                Box::new(walker.filter_map(move |entry| match entry {
                    Err(e) => Some(Err(SourceError::Walk(e))),
                    Ok(entry) => {
                        if !entry.file_type().is_some_and(|t| t.is_file()) {
                            return None;
                        }
                        filter.load_file(entry.path(), relative(root, entry.path()))
                    }
                }))
            }
            Scope::ChangedFiles { root, paths } => Box::new(paths.iter().filter_map(move |rel| {
                let abs = root.join(rel);
                if !abs.is_file() {
                    return None;
                }
                filter.load_file(&abs, relative(root, &abs))
            })),
            Scope::Procedures(procedures) => {
                Box::new(procedures.iter().filter_map(move |p| filter.load_procedure(p)))
            }
        }
    }
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Acquires repository content and decides which units a scan covers.
pub struct ChangeSetResolver {
    vcs: Arc<dyn VersionControl>,
    catalogs: Arc<dyn CatalogReader>,
    filter: UnitFilter,
}

impl ChangeSetResolver {
    pub fn new(
        vcs: Arc<dyn VersionControl>,
        catalogs: Arc<dyn CatalogReader>,
        filter: UnitFilter,
    ) -> Self {
        Self {
            vcs,
            catalogs,
            filter,
        }
    }

    /// Checkout the tree or connect to the catalog. Any error here is fatal
    /// for the scan.
    pub async fn acquire(&self, repo: &RepositorySource) -> Result<AcquiredSource> {
        match repo.kind {
            SourceKind::VersionControl => {
                let root = self.vcs.checkout(&repo.locator).await?;
                let head = self.vcs.current_ref(&root).await?;
                Ok(AcquiredSource::Tree { root, head })
            }
            SourceKind::ProcedureCatalog => {
                let procedures = self.catalogs.list_procedures(&repo.locator).await?;
                Ok(AcquiredSource::Catalog { procedures })
            }
        }
    }

    /// Full set when `since` is None, otherwise only units changed after it.
    /// A checkpoint git can no longer diff against falls back to a full scan.
    pub async fn resolve(&self, acquired: AcquiredSource, since: Option<&str>) -> Result<CandidateSet> {
        let target_checkpoint = acquired.checkpoint();
        let mut deleted = Vec::new();
        let (scope, incremental) = match (acquired, since) {
            (AcquiredSource::Tree { root, .. }, None) => (Scope::FullTree(root), false),
            (AcquiredSource::Tree { root, head }, Some(since)) if since == head => {
                debug!(checkpoint = since, "tree unchanged since checkpoint");
                (Scope::ChangedFiles { root, paths: Vec::new() }, true)
            }
            (AcquiredSource::Tree { root, .. }, Some(since)) => match self.vcs.diff(&root, since).await {
                Ok(change_set) => {
                    info!(
                        checkpoint = since,
                        changed = change_set.changed.len(),
                        deleted = change_set.deleted.len(),
                        "resolved incremental change set"
                    );
                    deleted = change_set
                        .deleted
                        .iter()
                        .map(|p| p.to_string_lossy().replace('\\', "/"))
                        .collect();
                    let paths = change_set.changed;
                    (Scope::ChangedFiles { root, paths }, true)
                }
                Err(e) => {
                    warn!(checkpoint = since, error = %e, "diff failed, falling back to full scan");
                    (Scope::FullTree(root), false)
                }
            },
            (AcquiredSource::Catalog { procedures }, None) => (Scope::Procedures(procedures), false),
            (AcquiredSource::Catalog { procedures }, Some(since)) => match CatalogManifest::parse(since) {
                Some(previous) => {
                    let current = CatalogManifest::build(&procedures);
                    if current.snapshot == previous.snapshot {
                        debug!(snapshot = %current.snapshot, "catalog unchanged since checkpoint");
                        (Scope::Procedures(Vec::new()), true)
                    } else {
                        deleted = current.removed_since(&previous);
                        let changed: Vec<ProcedureDefinition> = procedures
                            .into_iter()
                            .filter(|p| previous.is_stale(p))
                            .collect();
                        info!(
                            snapshot = %current.snapshot,
                            changed = changed.len(),
                            deleted = deleted.len(),
                            "resolved incremental catalog change set"
                        );
                        (Scope::Procedures(changed), true)
                    }
                }
                None => {
                    warn!(checkpoint = since, "unrecognised catalog checkpoint, falling back to full scan");
                    (Scope::Procedures(procedures), false)
                }
            },
        };

        Ok(CandidateSet {
            scope,
            filter: self.filter.clone(),
            target_checkpoint,
            incremental,
            deleted,
        })
    }
}
