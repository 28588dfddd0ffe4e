use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::classifier::{ArtifactClassifier, ClassifyError, OutputGroupDetail};
use crate::encoder::{EncoderClient, EncoderError};
use crate::ledger::{JobRecord, JobStore, LedgerError};
use crate::notify::{Notice, Notifier, NotifyError, ProcessingFailure};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("unrecognized job status {status:?} for job {job_id}")]
    UnknownStatus { status: String, job_id: String },
    #[error("malformed lifecycle event: {0}")]
    MalformedEvent(String),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("encoder error: {0}")]
    Encoder(#[from] EncoderError),
    #[error("output classification failed: {0}")]
    Classify(#[from] ClassifyError),
    #[error("notification failed: {0}")]
    Notify(#[from] NotifyError),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventHeader {
    status: String,
    job_id: String,
}

/// Encoder state-change event.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    InputInformation {
        job_id: String,
        input_details: Vec<Value>,
    },
    Complete {
        job_id: String,
        /// `outputGroupDetails` exactly as received.
        raw_output_group_details: Value,
        output_group_details: Vec<OutputGroupDetail>,
    },
    Canceled {
        job_id: String,
    },
    Error {
        job_id: String,
    },
}

impl LifecycleEvent {
    /// Accepts `{ "detail": {...} }` envelopes and bare details. Only the
    /// fields a status needs are read; a null list counts as absent.
    pub fn parse(event: &Value) -> LifecycleResult<Self> {
        let detail = event.get("detail").unwrap_or(event);
        let EventHeader { status, job_id } = EventHeader::deserialize(detail)
            .map_err(|err| LifecycleError::MalformedEvent(err.to_string()))?;
        match status.as_str() {
            "INPUT_INFORMATION" | "SUBMITTED_INPUT_INFO" => {
                let input_details = detail_list(detail, "inputDetails")?;
                Ok(LifecycleEvent::InputInformation {
                    job_id,
                    input_details,
                })
            }
            "COMPLETE" => {
                let output_group_details = detail_list(detail, "outputGroupDetails")?;
                let raw_output_group_details = detail
                    .get("outputGroupDetails")
                    .filter(|value| !value.is_null())
                    .cloned()
                    .unwrap_or_else(|| Value::Array(Vec::new()));
                Ok(LifecycleEvent::Complete {
                    job_id,
                    raw_output_group_details,
                    output_group_details,
                })
            }
            "CANCELED" => Ok(LifecycleEvent::Canceled { job_id }),
            "ERROR" => Ok(LifecycleEvent::Error { job_id }),
            _ => Err(LifecycleError::UnknownStatus { status, job_id }),
        }
    }

    pub fn job_id(&self) -> &str {
        match self {
            LifecycleEvent::InputInformation { job_id, .. }
            | LifecycleEvent::Complete { job_id, .. }
            | LifecycleEvent::Canceled { job_id }
            | LifecycleEvent::Error { job_id } => job_id,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            LifecycleEvent::InputInformation { .. } => "INPUT_INFORMATION",
            LifecycleEvent::Complete { .. } => "COMPLETE",
            LifecycleEvent::Canceled { .. } => "CANCELED",
            LifecycleEvent::Error { .. } => "ERROR",
        }
    }
}

fn detail_list<T: DeserializeOwned>(detail: &Value, field: &str) -> LifecycleResult<Vec<T>> {
    match detail.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => Vec::<T>::deserialize(value)
            .map_err(|err| LifecycleError::MalformedEvent(format!("{field}: {err}"))),
    }
}

/// What a handled event did.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleOutcome {
    InputRecorded(JobRecord),
    Completed(JobRecord),
    Canceled { job_id: String },
    Failed { job_id: String },
}

/// Dispatches encoder events to the ledger and the notifier.
pub struct JobLifecycle {
    store: Arc<dyn JobStore>,
    encoder: Arc<dyn EncoderClient>,
    notifier: Notifier,
    classifier: ArtifactClassifier,
}

impl std::fmt::Debug for JobLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobLifecycle")
            .field("notifier", &self.notifier)
            .field("classifier", &self.classifier)
            .finish()
    }
}

impl JobLifecycle {
    pub fn new(
        store: Arc<dyn JobStore>,
        encoder: Arc<dyn EncoderClient>,
        notifier: Notifier,
        classifier: ArtifactClassifier,
    ) -> Self {
        Self {
            store,
            encoder,
            notifier,
            classifier,
        }
    }

    /// Handles one raw event. On failure a PROCESSING ERROR notice is
    /// attempted before the original error is returned.
    pub async fn handle(&self, event: &Value) -> LifecycleResult<LifecycleOutcome> {
        match self.dispatch(event).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                error!(error = %err, "failed to handle lifecycle event");
                let failure = ProcessingFailure::new(&err, event.clone());
                if let Err(notify_err) = self
                    .notifier
                    .notify(Notice::ProcessingError(&failure))
                    .await
                {
                    warn!(error = %notify_err, "processing error notification was not delivered");
                }
                Err(err)
            }
        }
    }

    async fn dispatch(&self, event: &Value) -> LifecycleResult<LifecycleOutcome> {
        let parsed = LifecycleEvent::parse(event)?;
        info!(job_id = %parsed.job_id(), status = parsed.status(), "handling lifecycle event");
        match parsed {
            LifecycleEvent::InputInformation {
                job_id,
                input_details,
            } => self.record_input(job_id, input_details).await,
            LifecycleEvent::Complete {
                job_id,
                raw_output_group_details,
                output_group_details,
            } => {
                self.complete(job_id, raw_output_group_details, output_group_details)
                    .await
            }
            LifecycleEvent::Canceled { job_id } => {
                self.notifier
                    .notify(Notice::Canceled {
                        job_id: &job_id,
                        event,
                    })
                    .await?;
                Ok(LifecycleOutcome::Canceled { job_id })
            }
            LifecycleEvent::Error { job_id } => {
                self.notifier
                    .notify(Notice::Error {
                        job_id: &job_id,
                        event,
                    })
                    .await?;
                Ok(LifecycleOutcome::Failed { job_id })
            }
        }
    }

    async fn record_input(
        &self,
        job_id: String,
        input_details: Vec<Value>,
    ) -> LifecycleResult<LifecycleOutcome> {
        let input = input_details.into_iter().next().ok_or_else(|| {
            LifecycleError::MalformedEvent(format!("job {job_id} reported no input details"))
        })?;
        let mut patch = JobRecord::new(job_id);
        patch.input_file = input.get("uri").and_then(Value::as_str).map(str::to_string);
        patch.input_details = Some(input);
        let record = self.store.upsert(patch).await?;
        debug!(job_id = %record.id, "input information recorded");
        Ok(LifecycleOutcome::InputRecorded(record))
    }

    async fn complete(
        &self,
        job_id: String,
        raw_output_group_details: Value,
        output_group_details: Vec<OutputGroupDetail>,
    ) -> LifecycleResult<LifecycleOutcome> {
        let job = self.encoder.get_job(&job_id).await?;
        let outputs = self.classifier.classify_all(&output_group_details)?;

        let mut patch = JobRecord::new(job_id);
        patch.job = Some(job);
        patch.output_group_details = Some(raw_output_group_details);
        patch.outputs = Some(outputs);
        let record = self.store.upsert(patch).await?;
        info!(
            job_id = %record.id,
            urls = record.outputs.as_ref().map(|o| o.url_count()).unwrap_or(0),
            "job complete"
        );
        self.notifier.notify(Notice::Complete(&record)).await?;
        Ok(LifecycleOutcome::Completed(record))
    }
}
