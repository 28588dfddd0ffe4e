use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PipelineConfig {
    pub storage: StorageSection,
    #[serde(default)]
    pub ledger: LedgerSection,
    pub encoder: EncoderSection,
    pub distribution: DistributionSection,
    pub notifications: NotificationsSection,
}

impl PipelineConfig {
    /// Resolves relative paths against the object store root.
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.storage.root_dir).join(path)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.manifest_key.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "storage.manifest_key",
                reason: "must not be empty".to_string(),
            });
        }
        if self.distribution.public_base_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "distribution.public_base_url",
                reason: "must not be empty".to_string(),
            });
        }
        if self.ledger.backend == LedgerBackend::Sqlite && self.ledger.sqlite_path.is_none() {
            return Err(ConfigError::Invalid {
                field: "ledger.sqlite_path",
                reason: "is required when backend = \"sqlite\"".to_string(),
            });
        }
        if self.notifications.timeout_seconds == 0 {
            return Err(ConfigError::Invalid {
                field: "notifications.timeout_seconds",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    pub root_dir: String,
    pub source_bucket: String,
    pub destination_bucket: String,
    #[serde(default = "default_manifest_key")]
    pub manifest_key: String,
}

fn default_manifest_key() -> String {
    "jobs-manifest.json".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerBackend {
    #[default]
    Manifest,
    Sqlite,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedgerSection {
    #[serde(default)]
    pub backend: LedgerBackend,
    #[serde(default)]
    pub sqlite_path: Option<String>,
    #[serde(default = "default_true")]
    pub create_if_missing: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct EncoderSection {
    pub endpoint: String,
    pub role: String,
    #[serde(default = "default_settings_file")]
    pub settings_file: String,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl EncoderSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn default_settings_file() -> String {
    "job-settings.json".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct DistributionSection {
    pub public_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationsSection {
    pub topic: String,
    pub region: String,
    #[serde(default = "default_stack_name")]
    pub stack_name: String,
    #[serde(default)]
    pub log_group: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl NotificationsSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn default_stack_name() -> String {
    "vodflow".to_string()
}

pub fn load_pipeline_config<P: AsRef<Path>>(path: P) -> Result<PipelineConfig> {
    let config: PipelineConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
