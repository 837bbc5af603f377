use anyhow::Result;
use authscan_core::{RepositorySource, SourceKind};
use authscan_sources::checkpoint_label;
use authscan_storage::Store;

use crate::cli::{RepoCommands, RepoKind};

pub async fn handle(cmd: RepoCommands, store: &dyn Store) -> Result<()> {
    match cmd {
        RepoCommands::Add {
            tenant,
            name,
            locator,
            kind,
        } => add(store, tenant, name, locator, kind).await,
        RepoCommands::List { tenant } => list(store, tenant.as_deref()).await,
    }
}

async fn add(store: &dyn Store, tenant: String, name: String, locator: String, kind: RepoKind) -> Result<()> {
    let kind = match kind {
        RepoKind::Git => SourceKind::VersionControl,
        RepoKind::Catalog => SourceKind::ProcedureCatalog,
    };
    let repo = RepositorySource::new(tenant, name.clone(), kind, locator);
    store.save_repository(&repo).await?;

    println!("✓ Registered repository: {}", name);
    println!("  ID: {}", repo.id);
    println!("  Kind: {}", repo.kind.as_str());

    Ok(())
}

async fn list(store: &dyn Store, tenant: Option<&str>) -> Result<()> {
    let repos = store.list_repositories(tenant).await?;

    if repos.is_empty() {
        println!("No repositories found.");
        return Ok(());
    }

    println!("Repositories:");
    for repo in repos {
        println!("  {} ({})", repo.name, repo.id);
        println!(
            "    Tenant: {}  Kind: {}  Status: {}",
            repo.tenant_id,
            repo.kind.as_str(),
            repo.status.as_str()
        );
        if let Some(checkpoint) = &repo.checkpoint {
            println!("    Checkpoint: {}", checkpoint_label(checkpoint));
        }
    }

    Ok(())
}

pub async fn policies(store: &dyn Store, repository_id: &str, json: bool) -> Result<()> {
    let Some(repo) = store.get_repository(repository_id).await? else {
        anyhow::bail!("repository not found: {repository_id}");
    };
    let policies = store.list_policies(&repo.id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&policies)?);
        return Ok(());
    }

    if policies.is_empty() {
        println!("No policies extracted for {}.", repo.name);
        return Ok(());
    }

    println!("Policies for {} ({}):", repo.name, policies.len());
    for policy in policies {
        let record = &policy.record;
        println!(
            "  {} may {} on {}",
            record.subject, record.action, record.resource
        );
        if let Some(conditions) = &record.conditions {
            println!("    When: {}", conditions);
        }
        for evidence in &record.evidence {
            println!(
                "    at {}:{}-{}",
                evidence.file_path, evidence.line_start, evidence.line_end
            );
        }
    }

    Ok(())
}
