use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::models::{JobRecord, Manifest};
use super::{LedgerError, LedgerResult};
use crate::storage::{ObjectLocation, ObjectStore, StorageError};

/// Durable job-id to job-record mapping.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get(&self, id: &str) -> LedgerResult<Option<JobRecord>>;

    /// Merges `patch` into the record with the same id, creating it when absent,
    /// and returns the stored result.
    async fn upsert(&self, patch: JobRecord) -> LedgerResult<JobRecord>;

    async fn list(&self) -> LedgerResult<Vec<JobRecord>>;
}

#[derive(Clone)]
pub struct ManifestLedgerBuilder {
    store: Option<Arc<dyn ObjectStore>>,
    location: Option<ObjectLocation>,
    create_if_missing: bool,
}

impl Default for ManifestLedgerBuilder {
    fn default() -> Self {
        Self {
            store: None,
            location: None,
            create_if_missing: true,
        }
    }
}

impl ManifestLedgerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn location(mut self, location: ObjectLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> LedgerResult<ManifestLedger> {
        let store = self.store.ok_or(LedgerError::MissingStore)?;
        let location = self.location.ok_or(LedgerError::MissingStore)?;
        Ok(ManifestLedger {
            store,
            location,
            create_if_missing: self.create_if_missing,
        })
    }
}

/// Job ledger kept as one JSON blob in an object store.
///
/// Every mutation reads the whole manifest, merges in memory and writes the
/// whole manifest back. Nothing guards the window between the read and the
/// write: two upserts racing on the same blob can both read the old state and
/// the second write silently drops the first writer's update. Callers that
/// need serialized updates should use [`SqliteJobStore`](super::SqliteJobStore)
/// behind the same [`JobStore`] trait.
#[derive(Clone)]
pub struct ManifestLedger {
    store: Arc<dyn ObjectStore>,
    location: ObjectLocation,
    create_if_missing: bool,
}

impl std::fmt::Debug for ManifestLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestLedger")
            .field("location", &self.location)
            .field("create_if_missing", &self.create_if_missing)
            .finish()
    }
}

impl ManifestLedger {
    pub fn builder() -> ManifestLedgerBuilder {
        ManifestLedgerBuilder::new()
    }

    pub fn new(store: Arc<dyn ObjectStore>, location: ObjectLocation) -> Self {
        Self {
            store,
            location,
            create_if_missing: true,
        }
    }

    pub fn location(&self) -> &ObjectLocation {
        &self.location
    }

    pub async fn read_manifest(&self) -> LedgerResult<Manifest> {
        debug!(location = %self.location, "reading job manifest");
        let body = match self.store.get(&self.location).await {
            Ok(body) => body,
            Err(StorageError::NotFound { .. }) if self.create_if_missing => {
                info!(location = %self.location, "job manifest missing, starting empty");
                return Ok(Manifest::default());
            }
            Err(source) => {
                return Err(LedgerError::Read {
                    location: self.location.to_string(),
                    source,
                })
            }
        };
        serde_json::from_slice(&body).map_err(|source| LedgerError::Parse {
            location: self.location.to_string(),
            source,
        })
    }

    async fn write_manifest(&self, manifest: &Manifest) -> LedgerResult<()> {
        let body = serde_json::to_vec(manifest)?;
        self.store
            .put(&self.location, body)
            .await
            .map_err(|source| LedgerError::Write {
                location: self.location.to_string(),
                source,
            })
    }

    async fn apply(&self, patch: JobRecord) -> LedgerResult<JobRecord> {
        let mut manifest = self.read_manifest().await?;
        let existed = manifest.find(&patch.id).is_some();
        let record = manifest.upsert(patch);
        self.write_manifest(&manifest).await?;
        if existed {
            info!(job_id = %record.id, "merged job into manifest");
        } else {
            info!(job_id = %record.id, "no manifest entry for job, created one");
        }
        Ok(record)
    }
}

#[async_trait]
impl JobStore for ManifestLedger {
    async fn get(&self, id: &str) -> LedgerResult<Option<JobRecord>> {
        let manifest = self.read_manifest().await?;
        Ok(manifest.find(id).cloned())
    }

    async fn upsert(&self, patch: JobRecord) -> LedgerResult<JobRecord> {
        match self.apply(patch.clone()).await {
            Ok(record) => Ok(record),
            Err(source) => Err(LedgerError::update(patch, source)),
        }
    }

    async fn list(&self) -> LedgerResult<Vec<JobRecord>> {
        Ok(self.read_manifest().await?.jobs)
    }
}
