use anyhow::Result;

use crate::cli::AutoscalerCommands;
use crate::runtime::Runtime;

pub fn handle(cmd: AutoscalerCommands, runtime: &Runtime) -> Result<()> {
    match cmd {
        AutoscalerCommands::Show => {
            let metrics = runtime.service.get_autoscaler_metrics();
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        }
        AutoscalerCommands::Scale { target } => {
            runtime.service.request_manual_scale(target)?;
            let metrics = runtime.service.get_autoscaler_metrics();
            println!("✓ Worker pool scaled to {}", metrics.state.current_worker_count);
        }
    }
    Ok(())
}
