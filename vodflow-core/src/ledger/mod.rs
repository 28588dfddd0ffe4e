pub mod error;
pub mod models;
pub mod sqlite;
pub mod store;

pub use error::{LedgerError, LedgerResult};
pub use models::{JobOutputs, JobRecord, JobStatus, Manifest, OutputGroupKind};
pub use sqlite::{SqliteJobStore, SqliteJobStoreBuilder};
pub use store::{JobStore, ManifestLedger, ManifestLedgerBuilder};
