//! Scan job domain model and lifecycle
//!
//! A `ScanJob` is the durable progress row of one repository scan. Counters
//! only move forward while the job is live, and the checks in
//! [`ScanJob::record_batch`] keep `files_scanned <= total_files` and
//! `batches_processed <= total_batches` at every commit.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Queued,
    /// Checking out a version-controlled tree
    Cloning,
    /// Opening a procedure catalog
    Connecting,
    Enumerating,
    Processing,
    Completed,
    CompletedWithErrors,
    Failed,
    Cancelled,
}

impl ScanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanStatus::Completed
                | ScanStatus::CompletedWithErrors
                | ScanStatus::Failed
                | ScanStatus::Cancelled
        )
    }

    /// Terminal states that count as a successful scan.
    pub fn is_success(&self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::CompletedWithErrors)
    }

    pub fn can_transition_to(&self, next: ScanStatus) -> bool {
        use ScanStatus::*;

        if self.is_terminal() {
            return false;
        }
        // Fatal errors may end a scan from any live state.
        if next == Failed {
            return true;
        }
        matches!(
            (*self, next),
            (Queued, Cloning)
                | (Queued, Connecting)
                | (Queued, Cancelled)
                | (Cloning, Enumerating)
                | (Connecting, Enumerating)
                | (Enumerating, Processing)
                | (Processing, Completed)
                | (Processing, CompletedWithErrors)
                | (Processing, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Queued => "queued",
            ScanStatus::Cloning => "cloning",
            ScanStatus::Connecting => "connecting",
            ScanStatus::Enumerating => "enumerating",
            ScanStatus::Processing => "processing",
            ScanStatus::Completed => "completed",
            ScanStatus::CompletedWithErrors => "completed_with_errors",
            ScanStatus::Failed => "failed",
            ScanStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let status = match s {
            "queued" => ScanStatus::Queued,
            "cloning" => ScanStatus::Cloning,
            "connecting" => ScanStatus::Connecting,
            "enumerating" => ScanStatus::Enumerating,
            "processing" => ScanStatus::Processing,
            "completed" => ScanStatus::Completed,
            "completed_with_errors" => ScanStatus::CompletedWithErrors,
            "failed" => ScanStatus::Failed,
            "cancelled" => ScanStatus::Cancelled,
            _ => return None,
        };
        Some(status)
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Memory and duration telemetry captured at each progress commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanTelemetry {
    /// Bytes of file content held by the largest batch so far
    pub peak_batch_bytes: u64,
    pub last_batch_bytes: u64,
    pub last_batch_ms: u64,
    /// Wall time since the scan left the queue
    pub duration_ms: u64,
}

/// Counters produced by one processed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchProgress {
    pub files: u64,
    pub policies: u64,
    pub errors: u64,
    pub bytes: u64,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: String,
    pub repository_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bulk_scan_id: Option<String>,
    pub incremental: bool,
    pub status: ScanStatus,
    pub total_files: u64,
    pub total_batches: u64,
    pub files_scanned: u64,
    pub batches_processed: u64,
    pub policies_extracted: u64,
    pub errors_count: u64,
    /// Checkpoint the change set was diffed against (None = full scan)
    #[serde(default)]
    pub base_checkpoint: Option<String>,
    /// Checkpoint the repository reached; stored on the repository on success
    #[serde(default)]
    pub target_checkpoint: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub telemetry: ScanTelemetry,
    #[serde(with = "time::serde::timestamp")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::timestamp::option", default)]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::timestamp::option", default)]
    pub completed_at: Option<OffsetDateTime>,
}

impl ScanJob {
    pub fn new(repository_id: impl Into<String>, incremental: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            repository_id: repository_id.into(),
            bulk_scan_id: None,
            incremental,
            status: ScanStatus::Queued,
            total_files: 0,
            total_batches: 0,
            files_scanned: 0,
            batches_processed: 0,
            policies_extracted: 0,
            errors_count: 0,
            base_checkpoint: None,
            target_checkpoint: None,
            error_message: None,
            telemetry: ScanTelemetry::default(),
            created_at: OffsetDateTime::now_utc(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_bulk_scan(mut self, bulk_scan_id: impl Into<String>) -> Self {
        self.bulk_scan_id = Some(bulk_scan_id.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn transition(&mut self, next: ScanStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        let now = OffsetDateTime::now_utc();
        if self.started_at.is_none() && next != ScanStatus::Cancelled {
            self.started_at = Some(now);
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(now);
            self.refresh_duration();
        }
        Ok(())
    }

    /// Fix the unit and batch totals once enumeration has counted candidates.
    pub fn set_totals(&mut self, total_files: u64, batch_size: usize) -> Result<()> {
        if self.status != ScanStatus::Enumerating {
            return Err(Error::ProgressInvariant(format!(
                "totals can only be set while enumerating (status: {})",
                self.status
            )));
        }
        let batch_size = batch_size.max(1) as u64;
        self.total_files = total_files;
        self.total_batches = total_files.div_ceil(batch_size);
        Ok(())
    }

    /// Apply one batch's counters. Rejects commits that would break the
    /// progress bounds.
    pub fn record_batch(&mut self, progress: &BatchProgress) -> Result<()> {
        if self.status != ScanStatus::Processing {
            return Err(Error::ProgressInvariant(format!(
                "batch recorded outside processing (status: {})",
                self.status
            )));
        }
        let files_scanned = self.files_scanned + progress.files;
        if files_scanned > self.total_files {
            return Err(Error::ProgressInvariant(format!(
                "files_scanned {} would exceed total_files {}",
                files_scanned, self.total_files
            )));
        }
        if self.batches_processed + 1 > self.total_batches {
            return Err(Error::ProgressInvariant(format!(
                "batches_processed would exceed total_batches {}",
                self.total_batches
            )));
        }

        self.files_scanned = files_scanned;
        self.batches_processed += 1;
        self.policies_extracted += progress.policies;
        self.errors_count += progress.errors;
        self.telemetry.last_batch_bytes = progress.bytes;
        self.telemetry.peak_batch_bytes = self.telemetry.peak_batch_bytes.max(progress.bytes);
        self.telemetry.last_batch_ms = progress.elapsed_ms;
        self.refresh_duration();
        Ok(())
    }

    /// Settle a processed scan into its terminal status.
    pub fn finish(&mut self) -> Result<ScanStatus> {
        let status = if self.errors_count == 0 {
            ScanStatus::Completed
        } else {
            ScanStatus::CompletedWithErrors
        };
        self.transition(status)?;
        Ok(status)
    }

    /// Mark the scan failed. No-op if it already ended.
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.is_terminal() {
            return;
        }
        self.error_message = Some(message.into());
        // Failed is reachable from every live state.
        let _ = self.transition(ScanStatus::Failed);
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.transition(ScanStatus::Cancelled)
    }

    pub fn duration_ms(&self) -> Option<u64> {
        let started = self.started_at?;
        let ended = self.completed_at?;
        Some((ended - started).whole_milliseconds().max(0) as u64)
    }

    fn refresh_duration(&mut self) {
        if let Some(started) = self.started_at {
            let end = self.completed_at.unwrap_or_else(OffsetDateTime::now_utc);
            self.telemetry.duration_ms = (end - started).whole_milliseconds().max(0) as u64;
        }
    }
}
