use std::path::PathBuf;

use thiserror::Error;

use super::models::JobRecord;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("failed to read job manifest {location}: {source}")]
    Read {
        location: String,
        source: StorageError,
    },
    #[error("failed to parse job manifest {location}: {source}")]
    Parse {
        location: String,
        source: serde_json::Error,
    },
    #[error("failed to write job manifest {location}: {source}")]
    Write {
        location: String,
        source: StorageError,
    },
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("failed to open job database at {path}: {source}")]
    OpenDatabase {
        path: PathBuf,
        source: rusqlite::Error,
    },
    #[error("job store path not configured")]
    MissingStore,
    #[error("ledger task failed: {0}")]
    Task(String),
    #[error("failed to update the job ledger for job {job_id}: {source}")]
    Update {
        job_id: String,
        payload: Box<JobRecord>,
        source: Box<LedgerError>,
    },
}

impl LedgerError {
    /// Wraps a low-level failure with the update that triggered it.
    pub fn update(payload: JobRecord, source: LedgerError) -> Self {
        LedgerError::Update {
            job_id: payload.id.clone(),
            payload: Box::new(payload),
            source: Box::new(source),
        }
    }

    pub fn payload(&self) -> Option<&JobRecord> {
        match self {
            LedgerError::Update { payload, .. } => Some(payload),
            _ => None,
        }
    }
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;
