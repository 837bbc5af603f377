mod cli;
mod commands;
mod runtime;

use anyhow::Result;
use authscan_config::Config;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = cli::Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        cli::Commands::Detect { path, json } => commands::detect::handle(&config, &path, json),
        cli::Commands::Secrets { path } => commands::secrets::handle(&config, &path),
        cli::Commands::Repo(cmd) => {
            let store = runtime::open_store(&config).await?;
            commands::repo::handle(cmd, store.as_ref()).await
        }
        cli::Commands::Policies { repository, json } => {
            let store = runtime::open_store(&config).await?;
            commands::repo::policies(store.as_ref(), &repository, json).await
        }
        cli::Commands::Status { scan_id } => {
            let store = runtime::open_store(&config).await?;
            commands::scan::status(store.as_ref(), &scan_id).await
        }
        cli::Commands::Scan {
            repository,
            full,
            json,
        } => {
            let runtime = runtime::Runtime::build(&config, runtime::open_store(&config).await?)?;
            commands::scan::run(&runtime, &repository, !full, json).await
        }
        cli::Commands::Bulk {
            tenant,
            repositories,
            max_parallel,
            full,
        } => {
            let runtime = runtime::Runtime::build(&config, runtime::open_store(&config).await?)?;
            commands::bulk::handle(&runtime, &tenant, &repositories, max_parallel, !full).await
        }
        cli::Commands::Autoscaler(cmd) => {
            let runtime = runtime::Runtime::build(&config, runtime::open_store(&config).await?)?;
            commands::autoscaler::handle(cmd, &runtime)
        }
    }
}
