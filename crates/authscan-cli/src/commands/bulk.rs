use std::sync::Arc;

use anyhow::Result;

use crate::runtime::Runtime;

pub async fn handle(
    runtime: &Runtime,
    tenant: &str,
    repositories: &[String],
    max_parallel: usize,
    incremental: bool,
) -> Result<()> {
    let sampler = Arc::clone(&runtime.controller).spawn();

    let bulk_id = runtime
        .service
        .start_bulk_scan(tenant, repositories, max_parallel, incremental)
        .await?;
    println!("Bulk scan {} started", bulk_id);

    let status = tokio::select! {
        status = runtime.service.wait_for_bulk_scan(&bulk_id) => status?,
        _ = tokio::signal::ctrl_c() => {
            runtime.service.cancel_bulk_scan(&bulk_id).await?;
            runtime.service.wait_for_bulk_scan(&bulk_id).await?
        }
    };
    sampler.abort();

    let bulk = runtime.service.get_bulk_scan(&bulk_id).await?;
    println!("Bulk scan {}: {}", bulk.id, status.as_str());
    println!(
        "  Repositories: {}  Initiated: {}  Failed to start: {}",
        bulk.total_applications, bulk.initiated_scans, bulk.failed_initiations
    );
    println!(
        "  Completed: {}  Failed: {}",
        bulk.completed_applications, bulk.failed_applications
    );
    println!(
        "  Policies: {}  Files: {}",
        bulk.total_policies, bulk.total_files_scanned
    );
    if let Some(avg) = bulk.average_duration_ms {
        println!("  Average scan: {} ms", avg);
    }
    for child in &bulk.children {
        if let Some(error) = &child.error {
            println!("  ✗ {}: {}", child.repository_id, error);
        }
    }

    Ok(())
}
