use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "authscan")]
#[command(about = "Extract authorization policies from source trees and procedure catalogs", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file (default: platform config dir)
    #[arg(long, global = true, env = "AUTHSCAN_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage registered repositories
    #[command(subcommand)]
    Repo(RepoCommands),

    /// Scan one repository and wait for it to finish
    Scan {
        /// Repository ID
        repository: String,

        /// Rescan everything instead of changes since the last checkpoint
        #[arg(long)]
        full: bool,

        /// Print the finished job as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a scan job
    Status {
        /// Scan job ID
        scan_id: String,
    },

    /// List policies extracted for a repository
    Policies {
        /// Repository ID
        repository: String,

        #[arg(long)]
        json: bool,
    },

    /// Scan several repositories of one tenant
    Bulk {
        /// Tenant that owns the repositories
        #[arg(long)]
        tenant: String,

        /// Repository IDs
        #[arg(required = true)]
        repositories: Vec<String>,

        /// Child scans allowed to run at once
        #[arg(long, default_value = "2")]
        max_parallel: usize,

        #[arg(long)]
        full: bool,
    },

    /// Run the authorization matchers over files without extraction
    Detect {
        /// File or directory
        path: PathBuf,

        /// Print details as JSON
        #[arg(long)]
        json: bool,
    },

    /// Report secrets the redaction gate would remove
    Secrets {
        /// File to check
        path: PathBuf,
    },

    /// Inspect the worker pool autoscaler
    #[command(subcommand)]
    Autoscaler(AutoscalerCommands),
}

#[derive(Subcommand)]
pub enum RepoCommands {
    /// Register a repository
    Add {
        /// Tenant that owns the repository
        #[arg(long)]
        tenant: String,

        /// Display name
        name: String,

        /// Clone URL, local path, or catalog export path
        locator: String,

        #[arg(long, value_enum, default_value = "git")]
        kind: RepoKind,
    },

    /// List registered repositories
    List {
        #[arg(long)]
        tenant: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum RepoKind {
    Git,
    Catalog,
}

#[derive(Subcommand)]
pub enum AutoscalerCommands {
    /// Show config, state and pool status
    Show,

    /// Validate and apply a manual worker count
    Scale {
        target: usize,
    },
}
