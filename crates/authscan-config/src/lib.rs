use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Global configuration for authscan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// SQLite URL; defaults to `authscan.db` in the data directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    /// Where repositories are checked out; defaults to the cache directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_dir: Option<PathBuf>,

    #[serde(default)]
    pub pipeline: PipelineSection,

    #[serde(default)]
    pub redaction: RedactionSection,

    #[serde(default)]
    pub extraction: ExtractionSection,

    #[serde(default)]
    pub autoscaler: AutoscalerSection,

    #[serde(default)]
    pub denylist: DenylistSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub batch_size: usize,
    pub extraction_concurrency: usize,
    pub context_lines: usize,
    pub max_file_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedactionSection {
    pub enabled: bool,
    pub custom_patterns: Vec<CustomPattern>,
}

/// Extra secret pattern appended to the built-in catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomPattern {
    pub name: String,
    pub pattern: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSection {
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the API key, if the endpoint needs one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoscalerSection {
    pub min_workers: usize,
    pub max_workers: usize,
    pub initial_workers: usize,
    pub scale_up_threshold: usize,
    pub scale_down_threshold: usize,
    pub scale_step: usize,
    pub consecutive_samples: u32,
    pub sample_interval_secs: u64,
    pub cooldown_secs: u64,
    pub heartbeat_timeout_secs: u64,
}

/// Patterns denied in addition to the built-in denylist
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DenylistSection {
    pub patterns: Vec<String>,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            batch_size: 50,
            extraction_concurrency: 4,
            context_lines: 6,
            max_file_bytes: 1024 * 1024,
        }
    }
}

impl Default for RedactionSection {
    fn default() -> Self {
        Self {
            enabled: true,
            custom_patterns: Vec::new(),
        }
    }
}

impl Default for ExtractionSection {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434/v1/chat/completions".to_string(),
            model: "policy-extractor".to_string(),
            api_key_env: Some("AUTHSCAN_API_KEY".to_string()),
            max_tokens: 4096,
            temperature: 0.0,
            timeout_secs: 120,
        }
    }
}

impl Default for AutoscalerSection {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 8,
            initial_workers: 2,
            scale_up_threshold: 10,
            scale_down_threshold: 2,
            scale_step: 1,
            consecutive_samples: 3,
            sample_interval_secs: 30,
            cooldown_secs: 60,
            heartbeat_timeout_secs: 120,
        }
    }
}

impl ExtractionSection {
    /// API key read from the configured environment variable, if set.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|key| !key.is_empty())
    }
}

impl Config {
    /// Load config from default location or create default if not found
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`, writing the defaults there if it is missing
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let content = toml::to_string_pretty(&config)?;
            std::fs::write(path, content)?;
            Ok(config)
        }
    }

    /// Get config file path
    pub fn config_path() -> PathBuf {
        match project_dirs() {
            Some(dirs) => dirs.config_dir().join("config.toml"),
            None => PathBuf::from(".authscan/config.toml"),
        }
    }

    pub fn database_url(&self) -> String {
        if let Some(url) = &self.database_url {
            return url.clone();
        }
        let dir = match project_dirs() {
            Some(dirs) => dirs.data_dir().to_path_buf(),
            None => PathBuf::from(".authscan"),
        };
        format!("sqlite://{}", dir.join("authscan.db").display())
    }

    pub fn workspace_dir(&self) -> PathBuf {
        if let Some(dir) = &self.workspace_dir {
            return dir.clone();
        }
        match project_dirs() {
            Some(dirs) => dirs.cache_dir().join("checkouts"),
            None => PathBuf::from(".authscan/checkouts"),
        }
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "authscan", "authscan")
}
