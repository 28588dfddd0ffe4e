use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object {location} not found")]
    NotFound { location: ObjectLocation },
    #[error("io error for object {location}: {source}")]
    Io {
        source: std::io::Error,
        location: ObjectLocation,
    },
    #[error("invalid object key {key:?}")]
    InvalidKey { key: String },
    #[error("object store unavailable: {0}")]
    Unavailable(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Bucket plus key, the addressing unit of every object store backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub fn uri(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri())
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, location: &ObjectLocation) -> StorageResult<Vec<u8>>;
    async fn put(&self, location: &ObjectLocation, body: Vec<u8>) -> StorageResult<()>;
}

/// Maps buckets to directories under a root: `<root>/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, location: &ObjectLocation) -> StorageResult<PathBuf> {
        for value in [&location.bucket, &location.key] {
            let escapes = Path::new(value).components().any(|component| {
                !matches!(component, Component::Normal(_) | Component::CurDir)
            });
            if value.is_empty() || escapes {
                return Err(StorageError::InvalidKey { key: value.clone() });
            }
        }
        Ok(self.root.join(&location.bucket).join(&location.key))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn get(&self, location: &ObjectLocation) -> StorageResult<Vec<u8>> {
        let path = self.object_path(location)?;
        match fs::read(&path).await {
            Ok(body) => Ok(body),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound {
                    location: location.clone(),
                })
            }
            Err(source) => Err(StorageError::Io {
                source,
                location: location.clone(),
            }),
        }
    }

    async fn put(&self, location: &ObjectLocation, body: Vec<u8>) -> StorageResult<()> {
        let path = self.object_path(location)?;
        let io_err = |source| StorageError::Io {
            source,
            location: location.clone(),
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        // Readers never observe a half-written object.
        let staging = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        let staged = match fs::write(&staging, body).await {
            Ok(()) => fs::rename(&staging, &path).await,
            Err(err) => Err(err),
        };
        if let Err(source) = staged {
            let _ = fs::remove_file(&staging).await;
            return Err(io_err(source));
        }
        Ok(())
    }
}

/// Process-local store, used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<ObjectLocation, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, location: ObjectLocation, body: impl Into<Vec<u8>>) {
        self.lock().insert(location, body.into());
    }

    pub fn snapshot(&self, location: &ObjectLocation) -> Option<Vec<u8>> {
        self.lock().get(location).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ObjectLocation, Vec<u8>>> {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, location: &ObjectLocation) -> StorageResult<Vec<u8>> {
        self.lock()
            .get(location)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                location: location.clone(),
            })
    }

    async fn put(&self, location: &ObjectLocation, body: Vec<u8>) -> StorageResult<()> {
        self.lock().insert(location.clone(), body);
        Ok(())
    }
}
