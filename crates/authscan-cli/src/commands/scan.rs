use anyhow::Result;
use authscan_core::ScanJob;
use authscan_engine::CancelFlag;
use authscan_sources::checkpoint_label;
use authscan_storage::Store;
use tracing::info;

use crate::runtime::Runtime;

/// Run a scan in the foreground. Ctrl-C requests cancellation; the scan
/// stops after the batch in flight.
pub async fn run(runtime: &Runtime, repository_id: &str, incremental: bool, json: bool) -> Result<()> {
    let prepared = runtime.scanner.prepare(repository_id, incremental).await?;
    println!("Scan {} queued", prepared.job.id);

    let cancel = CancelFlag::new();
    let on_interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling after the current batch");
            on_interrupt.cancel();
        }
    });

    let report = runtime.scanner.run(prepared, &cancel).await;
    watcher.abort();

    if json {
        println!("{}", serde_json::to_string_pretty(&report.job)?);
        return Ok(());
    }

    print_job(&report.job);
    if !report.unit_errors.is_empty() {
        println!("\nUnit errors ({}):", report.unit_errors.len());
        for error in &report.unit_errors {
            println!("  {}", error);
        }
    }

    Ok(())
}

pub async fn status(store: &dyn Store, scan_id: &str) -> Result<()> {
    let Some(job) = store.get_scan_job(scan_id).await? else {
        anyhow::bail!("scan job not found: {scan_id}");
    };
    print_job(&job);
    Ok(())
}

fn print_job(job: &ScanJob) {
    println!("Scan: {}", job.id);
    println!("  Repository: {}", job.repository_id);
    println!("  Status: {}", job.status);
    println!(
        "  Files: {}/{}  Batches: {}/{}",
        job.files_scanned, job.total_files, job.batches_processed, job.total_batches
    );
    println!("  Policies: {}  Errors: {}", job.policies_extracted, job.errors_count);
    match &job.base_checkpoint {
        Some(base) => println!("  Incremental since: {}", checkpoint_label(base)),
        None => println!("  Full scan"),
    }
    if let Some(target) = &job.target_checkpoint {
        println!("  Checkpoint: {}", checkpoint_label(target));
    }
    println!(
        "  Duration: {} ms  Peak batch: {} bytes",
        job.telemetry.duration_ms, job.telemetry.peak_batch_bytes
    );
    if let Some(message) = &job.error_message {
        println!("  Error: {}", message);
    }
}
