use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::encoder::{EncoderClient, EncoderError};
use crate::notify::{Notice, Notifier, SubmissionFailure};
use crate::settings::{JobRequest, JobSettingsBuilder, JobTemplate, SettingsError};
use crate::storage::{ObjectLocation, ObjectStore, StorageError};

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("invalid submission trigger: {0}")]
    InvalidTrigger(String),
    #[error("failed to load job settings from {location}: {source}")]
    Settings {
        location: String,
        #[source]
        source: StorageError,
    },
    #[error("job settings template rejected: {0}")]
    Template(#[from] SettingsError),
    #[error("encoder refused job: {0}")]
    Encoder(#[from] EncoderError),
}

pub type SubmissionResult<T> = Result<T, SubmissionError>;

/// Source object that should be encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionTrigger {
    pub bucket: String,
    pub key: String,
}

impl SubmissionTrigger {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Reads the first record of an object-created notification. Keys arrive
    /// form-encoded (`+` for space, then percent escapes).
    pub fn from_s3_event(event: &Value) -> SubmissionResult<Self> {
        let record = event
            .pointer("/Records/0/s3")
            .ok_or_else(|| SubmissionError::InvalidTrigger("event has no s3 record".into()))?;
        let field = |pointer: &str| {
            record
                .pointer(pointer)
                .and_then(Value::as_str)
                .ok_or_else(|| SubmissionError::InvalidTrigger(format!("missing {pointer}")))
        };
        let bucket = decode_component(field("/bucket/name")?)?;
        let key = decode_component(field("/object/key")?)?;
        if key.is_empty() {
            return Err(SubmissionError::InvalidTrigger("object key is empty".into()));
        }
        Ok(Self { bucket, key })
    }

    /// Queue messages carry the notification either directly or inside a
    /// pub/sub envelope whose `Message` field is the serialized event.
    pub fn from_queue_body(body: &str) -> SubmissionResult<Self> {
        let parsed: Value = serde_json::from_str(body)
            .map_err(|err| SubmissionError::InvalidTrigger(format!("queue body: {err}")))?;
        match parsed.get("Message").and_then(Value::as_str) {
            Some(inner) => {
                let event: Value = serde_json::from_str(inner).map_err(|err| {
                    SubmissionError::InvalidTrigger(format!("envelope message: {err}"))
                })?;
                Self::from_s3_event(&event)
            }
            None => Self::from_s3_event(&parsed),
        }
    }

    pub fn input_uri(&self) -> String {
        ObjectLocation::new(&self.bucket, &self.key).uri()
    }

    /// Settings live beside the upload, under the key's first path segment.
    pub fn settings_location(&self, settings_file: &str) -> ObjectLocation {
        let prefix = self.key.split('/').next().unwrap_or_default();
        ObjectLocation::new(&self.bucket, format!("{prefix}/{settings_file}"))
    }
}

fn decode_component(raw: &str) -> SubmissionResult<String> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .map_err(|err| SubmissionError::InvalidTrigger(format!("{raw:?}: {err}")))
}

/// A job handed to the encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub guid: String,
    pub job_id: String,
    pub request: JobRequest,
}

pub struct Submitter {
    store: Arc<dyn ObjectStore>,
    encoder: Arc<dyn EncoderClient>,
    notifier: Notifier,
    settings_file: String,
    destination_bucket: String,
    role: String,
}

impl std::fmt::Debug for Submitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Submitter")
            .field("settings_file", &self.settings_file)
            .field("destination_bucket", &self.destination_bucket)
            .field("role", &self.role)
            .finish()
    }
}

impl Submitter {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        encoder: Arc<dyn EncoderClient>,
        notifier: Notifier,
        settings_file: impl Into<String>,
        destination_bucket: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            store,
            encoder,
            notifier,
            settings_file: settings_file.into(),
            destination_bucket: destination_bucket.into(),
            role: role.into(),
        }
    }

    /// Submits one upload. Failures send a submit-failed notice and are
    /// returned unchanged.
    pub async fn submit(&self, trigger: &SubmissionTrigger) -> SubmissionResult<Submission> {
        match self.try_submit(trigger).await {
            Ok(submission) => Ok(submission),
            Err(err) => {
                error!(input = %trigger.input_uri(), error = %err, "job submission failed");
                let failure = SubmissionFailure::new(&err, trigger.input_uri());
                if let Err(notify_err) = self.notifier.notify(Notice::SubmitFailed(&failure)).await
                {
                    warn!(error = %notify_err, "submit failure notification was not delivered");
                }
                Err(err)
            }
        }
    }

    async fn try_submit(&self, trigger: &SubmissionTrigger) -> SubmissionResult<Submission> {
        let location = trigger.settings_location(&self.settings_file);
        let raw = self
            .store
            .get(&location)
            .await
            .map_err(|source| SubmissionError::Settings {
                location: location.uri(),
                source,
            })?;
        let template = JobTemplate::from_slice(&raw)?;

        let guid = Uuid::new_v4().to_string();
        let output = ObjectLocation::new(&self.destination_bucket, &guid).uri();
        let request = JobSettingsBuilder::new(trigger.input_uri(), output, &self.role)
            .metadata_entry("Guid", guid.clone())
            .build(&template)?;

        let job_id = self.encoder.create_job(&request).await?;
        info!(job_id = %job_id, guid = %guid, input = %trigger.input_uri(), "encoding job created");
        Ok(Submission {
            guid,
            job_id,
            request,
        })
    }
}
