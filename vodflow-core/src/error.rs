use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures loading `vodflow.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read pipeline config {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("pipeline config {path} is not valid TOML: {source}")]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
    #[error("pipeline config field {field} {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
