use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, TransactionBehavior};
use tracing::info;

use super::models::JobRecord;
use super::store::JobStore;
use super::{LedgerError, LedgerResult};
use crate::sqlite::configure_connection;

const JOBS_SCHEMA: &str = include_str!("../../../sql/jobs.sql");

#[derive(Debug, Clone)]
pub struct SqliteJobStoreBuilder {
    path: Option<PathBuf>,
    create_if_missing: bool,
}

impl Default for SqliteJobStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            create_if_missing: true,
        }
    }
}

impl SqliteJobStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> LedgerResult<SqliteJobStore> {
        let path = self.path.ok_or(LedgerError::MissingStore)?;
        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE;
        if self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }

        Ok(SqliteJobStore { path, flags })
    }
}

/// Job ledger in SQLite. Upserts run inside an immediate transaction, so
/// concurrent writers are serialized instead of losing updates.
#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl SqliteJobStore {
    pub fn builder() -> SqliteJobStoreBuilder {
        SqliteJobStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> LedgerResult<Self> {
        SqliteJobStoreBuilder::new().path(path).build()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> LedgerResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            LedgerError::OpenDatabase {
                path: self.path.clone(),
                source,
            }
        })?;
        configure_connection(&conn).map_err(|source| LedgerError::OpenDatabase {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> LedgerResult<()> {
        let conn = self.open()?;
        conn.execute_batch(JOBS_SCHEMA)?;
        Ok(())
    }

    pub fn fetch_by_id(&self, id: &str) -> LedgerResult<Option<JobRecord>> {
        let conn = self.open()?;
        let raw: Option<String> = conn
            .query_row("SELECT record FROM jobs WHERE job_id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;
        raw.map(|raw| serde_json::from_str(&raw).map_err(LedgerError::from))
            .transpose()
    }

    pub fn upsert_record(&self, patch: JobRecord) -> LedgerResult<JobRecord> {
        let mut conn = self.open()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let existing: Option<String> = tx
            .query_row(
                "SELECT record FROM jobs WHERE job_id = ?1",
                [&patch.id],
                |row| row.get(0),
            )
            .optional()?;
        let created = existing.is_none();
        let record = match existing {
            Some(raw) => {
                let mut record: JobRecord = serde_json::from_str(&raw)?;
                record.merge(patch);
                record
            }
            None => patch.into_new_record(),
        };
        let now = Utc::now();
        tx.execute(
            "INSERT INTO jobs (job_id, record, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(job_id) DO UPDATE SET
                record = excluded.record,
                updated_at = excluded.updated_at",
            params![&record.id, serde_json::to_string(&record)?, now],
        )?;
        tx.commit()?;
        if created {
            info!(job_id = %record.id, "created job ledger row");
        } else {
            info!(job_id = %record.id, "merged job ledger row");
        }
        Ok(record)
    }

    pub fn list_records(&self) -> LedgerResult<Vec<JobRecord>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT record FROM jobs ORDER BY created_at ASC, rowid ASC")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|raw| serde_json::from_str(raw).map_err(LedgerError::from))
            .collect()
    }
}

async fn run_blocking<T, F>(task: F) -> LedgerResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> LedgerResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| LedgerError::Task(err.to_string()))?
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn get(&self, id: &str) -> LedgerResult<Option<JobRecord>> {
        let store = self.clone();
        let id = id.to_string();
        run_blocking(move || store.fetch_by_id(&id)).await
    }

    async fn upsert(&self, patch: JobRecord) -> LedgerResult<JobRecord> {
        let store = self.clone();
        let pending = patch.clone();
        run_blocking(move || store.upsert_record(pending))
            .await
            .map_err(|source| LedgerError::update(patch, source))
    }

    async fn list(&self) -> LedgerResult<Vec<JobRecord>> {
        let store = self.clone();
        run_blocking(move || store.list_records()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn upsert_record_merges_rows() {
        let dir = tempdir().unwrap();
        let store = SqliteJobStore::new(dir.path().join("jobs.sqlite")).unwrap();
        store.initialize().unwrap();

        let created = store.upsert_record(JobRecord::new("job-1")).unwrap();
        assert_eq!(created.input_details, Some(json!({})));

        let mut patch = JobRecord::new("job-1");
        patch.input_file = Some("s3://src/a.mp4".into());
        let merged = store.upsert_record(patch).unwrap();
        assert_eq!(merged.input_file.as_deref(), Some("s3://src/a.mp4"));
        assert_eq!(merged.input_details, Some(json!({})));

        let fetched = store.fetch_by_id("job-1").unwrap().unwrap();
        assert_eq!(fetched, merged);
        assert_eq!(store.list_records().unwrap().len(), 1);
        assert!(store.fetch_by_id("missing").unwrap().is_none());
    }

    #[test]
    fn builder_requires_path() {
        let err = SqliteJobStore::builder().build().unwrap_err();
        assert!(matches!(err, LedgerError::MissingStore));
    }
}
