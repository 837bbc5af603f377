//! Batch pipeline
//!
//! enumerate -> pre-filter -> batch -> structural extraction -> redact ->
//! extract -> parse -> persist -> checkpoint
//!
//! Units are pulled lazily from a [`CandidateSet`] and only one batch of
//! candidates is held in memory. Extraction calls inside a batch run
//! concurrently up to `extraction_concurrency`; the progress row is committed
//! after every batch, before the next one is pulled.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use authscan_core::{AuthorizationCandidate, AuthorizationDetail, BatchProgress, ScanJob};
use authscan_patterns::MatcherRegistry;
use authscan_security::SecretGate;
use authscan_sources::{CandidateSet, SourceError, SourceUnit, SourceUnits};
use authscan_storage::{PolicyScope, Store};
use futures_util::{StreamExt, TryStreamExt, stream};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::extraction::{ExtractionModel, build_prompt, render_context};
use crate::response::{backfill_evidence, parse_policies};

/// Unit errors kept on the outcome for reporting
const MAX_REPORTED_ERRORS: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub extraction_concurrency: usize,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            extraction_concurrency: 4,
            max_tokens: 4096,
            temperature: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitErrorKind {
    Read,
    StructuralParse,
    Extraction,
    MalformedResponse,
    Persistence,
}

impl fmt::Display for UnitErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitErrorKind::Read => "read",
            UnitErrorKind::StructuralParse => "structural_parse",
            UnitErrorKind::Extraction => "extraction",
            UnitErrorKind::MalformedResponse => "malformed_response",
            UnitErrorKind::Persistence => "persistence",
        };
        f.write_str(s)
    }
}

/// A recoverable failure of one unit. Counted on the job, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitError {
    pub path: String,
    pub kind: UnitErrorKind,
    pub message: String,
}

impl UnitError {
    fn new(path: &str, kind: UnitErrorKind, message: impl fmt::Display) -> Self {
        Self {
            path: path.to_string(),
            kind,
            message: message.to_string(),
        }
    }
}

impl fmt::Display for UnitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.path, self.kind, self.message)
    }
}

/// Cooperative cancellation, checked between batches.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    Drained,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub status: PipelineStatus,
    /// First unit errors, for reporting. The full count is on the job.
    pub errors: Vec<UnitError>,
}

/// A pre-filtered unit, or the read error that stood in for it.
type BatchItem = std::result::Result<AuthorizationCandidate, UnitError>;

struct UnitResult {
    policies: u64,
    error: Option<UnitError>,
}

pub struct BatchPipeline {
    registry: Arc<MatcherRegistry>,
    gate: Arc<SecretGate>,
    model: Arc<dyn ExtractionModel>,
    store: Arc<dyn Store>,
    config: PipelineConfig,
}

impl BatchPipeline {
    pub fn new(
        registry: Arc<MatcherRegistry>,
        gate: Arc<SecretGate>,
        model: Arc<dyn ExtractionModel>,
        store: Arc<dyn Store>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            registry,
            gate,
            model,
            store,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Number of units that pass the pre-filter. Unreadable units count,
    /// since processing reports each of them as an error.
    pub fn count_candidates(&self, candidates: &CandidateSet) -> u64 {
        candidates
            .units()
            .filter(|unit| match unit {
                Ok(unit) => self.passes_prefilter(unit),
                Err(e) => e.is_unit_error(),
            })
            .count() as u64
    }

    fn passes_prefilter(&self, unit: &SourceUnit) -> bool {
        self.registry
            .matcher(unit.language)
            .is_some_and(|m| m.detect(&unit.content))
    }

    /// Promote a pre-filtered unit, recording its located hits in line order.
    fn candidate(&self, unit: SourceUnit) -> AuthorizationCandidate {
        let matches = self
            .registry
            .matcher(unit.language)
            .map(|m| m.find_matches(&unit.content))
            .unwrap_or_default();
        AuthorizationCandidate {
            path: unit.path,
            language: unit.language,
            content: unit.content,
            matches,
        }
    }

    /// Detail copies whose context went through the redaction pass, for
    /// anything persisted from them.
    fn redacted_details(&self, details: &[AuthorizationDetail]) -> Vec<AuthorizationDetail> {
        details
            .iter()
            .map(|detail| AuthorizationDetail {
                context: self.gate.redact(&detail.context).text,
                ..detail.clone()
            })
            .collect()
    }

    /// Drop stored policies of units deleted since the checkpoint.
    pub async fn clear_deleted(&self, repository_id: &str, paths: &[String]) -> Result<u64> {
        let mut removed = 0;
        for path in paths {
            removed += self.store.clear_policies(repository_id, path).await?;
        }
        if removed > 0 {
            info!(repository_id, removed, "cleared policies of deleted units");
        }
        Ok(removed)
    }

    /// Process every candidate of `candidates`, committing `job` after each
    /// batch. `job` must be in `Processing` with its totals set.
    pub async fn process(
        &self,
        job: &mut ScanJob,
        candidates: &CandidateSet,
        cancel: &CancelFlag,
    ) -> Result<PipelineOutcome> {
        let batch_size = self.config.batch_size.max(1);
        let repository_id = job.repository_id.clone();
        let scan_job_id = job.id.clone();
        let mut reported = Vec::new();
        let mut remaining = job.total_files;
        let mut units = candidates.units();

        while remaining > 0 {
            if cancel.is_cancelled() {
                info!(scan_id = %scan_job_id, batches = job.batches_processed, "scan cancelled between batches");
                return Ok(PipelineOutcome {
                    status: PipelineStatus::Cancelled,
                    errors: reported,
                });
            }

            let batch = self
                .next_batch(&mut units, batch_size, &mut remaining, &repository_id, candidates.is_incremental())
                .await?;
            if batch.is_empty() {
                break;
            }

            let started = Instant::now();
            let files = batch.len() as u64;
            let bytes: u64 = batch
                .iter()
                .filter_map(|item| item.as_ref().ok())
                .map(|c| c.size_bytes() as u64)
                .sum();

            let results: Vec<UnitResult> = stream::iter(
                batch
                    .into_iter()
                    .map(|item| self.process_unit(item, &repository_id, &scan_job_id)),
            )
            .buffer_unordered(self.config.extraction_concurrency.max(1))
            .try_collect()
            .await?;

            let mut progress = BatchProgress {
                files,
                bytes,
                ..Default::default()
            };
            for result in results {
                progress.policies += result.policies;
                if let Some(error) = result.error {
                    progress.errors += 1;
                    warn!(scan_id = %scan_job_id, path = %error.path, kind = %error.kind, "{}", error.message);
                    if reported.len() < MAX_REPORTED_ERRORS {
                        reported.push(error);
                    }
                }
            }
            progress.elapsed_ms = started.elapsed().as_millis() as u64;

            job.record_batch(&progress)?;
            self.store.save_progress(job).await?;
            info!(
                scan_id = %scan_job_id,
                batch = job.batches_processed,
                total_batches = job.total_batches,
                files = progress.files,
                policies = progress.policies,
                errors = progress.errors,
                "batch committed"
            );
        }

        // Changed units past the last candidate may have lost their
        // authorization code; their old policies are stale.
        if candidates.is_incremental() {
            let mut late = 0u64;
            for unit in units {
                match unit {
                    Ok(unit) if self.passes_prefilter(&unit) => late += 1,
                    Ok(unit) => {
                        self.store.clear_policies(&repository_id, &unit.path).await?;
                    }
                    Err(_) => {}
                }
            }
            if late > 0 {
                warn!(scan_id = %scan_job_id, late, "units appeared after counting; left for the next scan");
            }
        }
        Ok(PipelineOutcome {
            status: PipelineStatus::Drained,
            errors: reported,
        })
    }

    /// Pull up to `batch_size` candidates. Units rejected by the pre-filter
    /// are discarded; in incremental scans their stale policies go with them.
    async fn next_batch(
        &self,
        units: &mut SourceUnits<'_>,
        batch_size: usize,
        remaining: &mut u64,
        repository_id: &str,
        incremental: bool,
    ) -> Result<Vec<BatchItem>> {
        let mut batch = Vec::with_capacity(batch_size.min(*remaining as usize));
        while batch.len() < batch_size && *remaining > 0 {
            let Some(unit) = units.next() else { break };
            let item = match unit {
                Ok(unit) if self.passes_prefilter(&unit) => Ok(self.candidate(unit)),
                Ok(unit) => {
                    if incremental {
                        self.store.clear_policies(repository_id, &unit.path).await?;
                    }
                    continue;
                }
                Err(e) if e.is_unit_error() => Err(read_error(e)),
                Err(e) => return Err(e.into()),
            };
            *remaining -= 1;
            batch.push(item);
        }
        Ok(batch)
    }

    async fn process_unit(
        &self,
        item: BatchItem,
        repository_id: &str,
        scan_job_id: &str,
    ) -> Result<UnitResult> {
        let candidate = match item {
            Ok(candidate) => candidate,
            Err(error) => return Ok(UnitResult { policies: 0, error: Some(error) }),
        };
        let path = candidate.path.as_str();
        let failed = |kind, message: &dyn fmt::Display| {
            Ok(UnitResult {
                policies: 0,
                error: Some(UnitError::new(path, kind, message)),
            })
        };

        let Some(matcher) = self.registry.matcher(candidate.language) else {
            return Ok(UnitResult { policies: 0, error: None });
        };
        // No located hit means structural extraction would find nothing.
        let details = if candidate.matches.is_empty() {
            Vec::new()
        } else {
            match matcher.extract(&candidate.content, path) {
                Ok(details) => details,
                Err(e) => return failed(UnitErrorKind::StructuralParse, &e),
            }
        };
        debug!(path, matches = candidate.matches.len(), details = details.len(), "unit matched");

        let scope = PolicyScope {
            repository_id: repository_id.to_string(),
            scan_job_id: scan_job_id.to_string(),
            file_path: candidate.path.clone(),
        };
        if details.is_empty() {
            if let Err(e) = self.store.clear_policies(repository_id, path).await {
                return failed(UnitErrorKind::Persistence, &e);
            }
            return Ok(UnitResult { policies: 0, error: None });
        }

        let context = render_context(path, &details);
        let sanitized = self.gate.sanitize(&context)?;
        if sanitized.count > 0 {
            let kinds: Vec<&str> = sanitized.redactions.iter().map(|r| r.redaction_type.as_str()).collect();
            info!(path, count = sanitized.count, kinds = ?kinds, "redacted secrets before extraction");
        }
        let prompt = build_prompt(path, candidate.language, &sanitized.text);
        self.gate.assert_clean(&prompt)?;

        let raw = match self
            .model
            .complete(&prompt, self.config.max_tokens, self.config.temperature)
            .await
        {
            Ok(raw) => raw,
            Err(e) => return failed(UnitErrorKind::Extraction, &e),
        };
        let mut records = match parse_policies(&raw) {
            Ok(records) => records,
            Err(e) => return failed(UnitErrorKind::MalformedResponse, &e),
        };
        backfill_evidence(&mut records, path, &self.redacted_details(&details));

        if let Err(e) = self.store.clear_policies(repository_id, path).await {
            return failed(UnitErrorKind::Persistence, &e);
        }
        let mut saved = 0;
        for record in &records {
            if let Err(e) = self.store.save_policy(&scope, record).await {
                return Ok(UnitResult {
                    policies: saved,
                    error: Some(UnitError::new(path, UnitErrorKind::Persistence, e)),
                });
            }
            saved += 1;
        }
        debug!(path, policies = saved, "unit extracted");
        Ok(UnitResult { policies: saved, error: None })
    }
}

fn read_error(error: SourceError) -> UnitError {
    let path = match &error {
        SourceError::Read { path, .. } => path.clone(),
        _ => String::new(),
    };
    UnitError::new(&path, UnitErrorKind::Read, error)
}
