pub mod classifier;
pub mod config;
pub mod encoder;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod notify;
pub mod settings;
pub mod sqlite;
pub mod storage;
pub mod submission;

pub use classifier::{
    ArtifactClassifier, ClassifyError, ClassifyResult, OutputDetail, OutputGroupDetail,
};
pub use config::{
    load_pipeline_config, DistributionSection, EncoderSection, LedgerBackend, LedgerSection,
    NotificationsSection, PipelineConfig, StorageSection,
};
pub use encoder::{EncoderClient, EncoderError, EncoderResult, HttpEncoderClient};
pub use error::{ConfigError, Result};
pub use ledger::{
    JobOutputs, JobRecord, JobStatus, JobStore, LedgerError, LedgerResult, Manifest,
    ManifestLedger, ManifestLedgerBuilder, OutputGroupKind, SqliteJobStore, SqliteJobStoreBuilder,
};
pub use lifecycle::{
    JobLifecycle, LifecycleError, LifecycleEvent, LifecycleOutcome, LifecycleResult,
};
pub use notify::{
    CommandPublisher, ConsoleLinks, LogPublisher, Notice, Notification, NotificationPublisher,
    Notifier, NotifyError, NotifyResult, ProcessingFailure, SubmissionFailure,
};
pub use settings::{
    GroupType, JobRequest, JobSettingsBuilder, JobTemplate, KindCounters, SettingsError,
    SettingsResult,
};
pub use storage::{
    LocalObjectStore, MemoryObjectStore, ObjectLocation, ObjectStore, StorageError, StorageResult,
};
pub use submission::{Submission, SubmissionError, SubmissionResult, SubmissionTrigger, Submitter};
