//! Builds the scanning stack from configuration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use authscan_config::Config;
use authscan_engine::{BatchPipeline, ExtractionSettings, HttpExtractionModel, PipelineConfig, Scanner};
use authscan_fleet::{AutoscalerConfig, AutoscalerController, LocalWorkerPool, PoolConfig, ScanService};
use authscan_patterns::{MatcherConfig, MatcherRegistry};
use authscan_security::{CustomSecretPattern, SecretCatalog, SecretGate};
use authscan_sources::{ChangeSetResolver, DEFAULT_DENYLIST, Denylist, GitCli, JsonCatalogReader, UnitFilter};
use authscan_storage::{SqliteStore, Store};

pub struct Runtime {
    pub store: Arc<dyn Store>,
    pub scanner: Arc<Scanner>,
    pub service: ScanService,
    pub controller: Arc<AutoscalerController>,
}

pub fn matcher_registry(config: &Config) -> MatcherRegistry {
    MatcherRegistry::new(MatcherConfig {
        context_lines: config.pipeline.context_lines,
        ..Default::default()
    })
}

pub fn secret_gate(config: &Config) -> Result<SecretGate> {
    let custom: Vec<CustomSecretPattern> = config
        .redaction
        .custom_patterns
        .iter()
        .map(|p| CustomSecretPattern {
            name: p.name.clone(),
            pattern: p.pattern.clone(),
            description: p.description.clone(),
        })
        .collect();
    let catalog = SecretCatalog::builtin()
        .with_custom(&custom)
        .context("invalid custom secret pattern")?;
    Ok(SecretGate::new(catalog).with_redaction(config.redaction.enabled))
}

pub fn autoscaler_config(config: &Config) -> AutoscalerConfig {
    let section = &config.autoscaler;
    AutoscalerConfig {
        min_workers: section.min_workers,
        max_workers: section.max_workers,
        scale_up_threshold: section.scale_up_threshold,
        scale_down_threshold: section.scale_down_threshold,
        scale_step: section.scale_step,
        consecutive_samples: section.consecutive_samples,
        sample_interval: Duration::from_secs(section.sample_interval_secs),
        cooldown: Duration::from_secs(section.cooldown_secs),
    }
}

pub async fn open_store(config: &Config) -> Result<Arc<SqliteStore>> {
    let url = config.database_url();
    if let Some(path) = url.strip_prefix("sqlite://")
        && let Some(parent) = std::path::Path::new(path).parent()
    {
        std::fs::create_dir_all(parent)?;
    }
    let store = SqliteStore::connect(&url)
        .await
        .with_context(|| format!("failed to open database {url}"))?;
    Ok(Arc::new(store))
}

impl Runtime {
    /// Must be called inside a tokio runtime; the worker pool spawns tasks.
    pub fn build(config: &Config, store: Arc<dyn Store>) -> Result<Self> {
        let filter = UnitFilter::new(
            Denylist::new(
                DEFAULT_DENYLIST
                    .iter()
                    .map(|p| p.to_string())
                    .chain(config.denylist.patterns.iter().cloned()),
            ),
            config.pipeline.max_file_bytes,
        );
        let resolver = ChangeSetResolver::new(
            Arc::new(GitCli::new(config.workspace_dir())),
            Arc::new(JsonCatalogReader),
            filter,
        );

        let mut settings = ExtractionSettings {
            endpoint: config.extraction.endpoint.clone(),
            model: config.extraction.model.clone(),
            ..Default::default()
        }
        .with_timeout(Duration::from_secs(config.extraction.timeout_secs));
        if let Some(key) = config.extraction.api_key() {
            settings = settings.with_api_key(key);
        }
        let model = HttpExtractionModel::new(settings)?;

        let pipeline = BatchPipeline::new(
            Arc::new(matcher_registry(config)),
            Arc::new(secret_gate(config)?),
            Arc::new(model),
            Arc::clone(&store),
            PipelineConfig {
                batch_size: config.pipeline.batch_size,
                extraction_concurrency: config.pipeline.extraction_concurrency,
                max_tokens: config.extraction.max_tokens,
                temperature: config.extraction.temperature,
            },
        );
        let scanner = Arc::new(Scanner::new(Arc::new(resolver), Arc::new(pipeline), Arc::clone(&store)));

        let pool = LocalWorkerPool::new(PoolConfig {
            initial_workers: config.autoscaler.initial_workers,
            heartbeat_timeout: Duration::from_secs(config.autoscaler.heartbeat_timeout_secs),
            ..Default::default()
        });
        let controller = Arc::new(AutoscalerController::new(
            autoscaler_config(config),
            Arc::new(pool.clone()),
            Arc::new(pool.clone()),
        )?);
        let service = ScanService::new(Arc::clone(&scanner), Arc::new(pool), Arc::clone(&controller));

        Ok(Self {
            store,
            scanner,
            service,
            controller,
        })
    }
}
