use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{error, info};

use crate::ledger::JobRecord;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to render notification: {0}")]
    Render(#[from] serde_json::Error),
    #[error("command not found: {command}")]
    CommandNotFound { command: String },
    #[error("io error while publishing notification: {0}")]
    Io(#[from] std::io::Error),
    #[error("command {command} failed (status {status:?}): {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("command {command} did not finish within {timeout:?}")]
    Timeout { command: String, timeout: Duration },
    #[error("notification publisher unavailable: {0}")]
    Unavailable(String),
}

pub type NotifyResult<T> = Result<T, NotifyError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub subject: String,
    pub message: String,
}

/// Delivery transport for rendered notifications.
#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    async fn publish(&self, topic: &str, notification: &Notification) -> NotifyResult<()>;
}

/// Publishes by running an external command (for example a pub/sub CLI).
///
/// `{topic}`, `{subject}` and `{message}` in the arguments are substituted;
/// the message body is also written to the command's stdin. A command still
/// running after the timeout is killed.
#[derive(Debug, Clone)]
pub struct CommandPublisher {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(30);

impl CommandPublisher {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        let args = if args.is_empty() {
            vec!["{topic}".to_string(), "{subject}".to_string()]
        } else {
            args
        };
        Self {
            command: command.into(),
            args,
            timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn render_args(&self, topic: &str, notification: &Notification) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{topic}", topic)
                    .replace("{subject}", &notification.subject)
                    .replace("{message}", &notification.message)
            })
            .collect()
    }
}

#[async_trait]
impl NotificationPublisher for CommandPublisher {
    async fn publish(&self, topic: &str, notification: &Notification) -> NotifyResult<()> {
        let mut child = Command::new(&self.command)
            .args(self.render_args(topic, notification))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| map_command_error(err, &self.command))?;
        let message = notification.message.as_bytes();
        let delivery = async move {
            if let Some(mut stdin) = child.stdin.take() {
                // Commands that take the message as an argument may exit unread.
                if let Err(err) = stdin.write_all(message).await {
                    if err.kind() != std::io::ErrorKind::BrokenPipe {
                        return Err(err);
                    }
                }
            }
            child.wait_with_output().await
        };
        let output = tokio::time::timeout(self.timeout, delivery)
            .await
            .map_err(|_| NotifyError::Timeout {
                command: self.command.clone(),
                timeout: self.timeout,
            })??;
        if output.status.success() {
            Ok(())
        } else {
            Err(NotifyError::CommandFailed {
                command: self.command.clone(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

fn map_command_error(err: std::io::Error, command: &str) -> NotifyError {
    if err.kind() == std::io::ErrorKind::NotFound {
        NotifyError::CommandNotFound {
            command: command.to_string(),
        }
    } else {
        NotifyError::Io(err)
    }
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Clone, Default)]
pub struct LogPublisher;

#[async_trait]
impl NotificationPublisher for LogPublisher {
    async fn publish(&self, topic: &str, notification: &Notification) -> NotifyResult<()> {
        info!(
            topic,
            subject = %notification.subject,
            message = %notification.message,
            "notification (dry-run)"
        );
        Ok(())
    }
}

/// Payload of the synthesized PROCESSING ERROR notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProcessingFailure {
    pub error: String,
    pub job: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl ProcessingFailure {
    pub fn new(error: &dyn std::error::Error, job: Value) -> Self {
        let job_id = event_job_id(&job).map(str::to_string);
        Self {
            error: error_chain(error),
            job,
            job_id,
            occurred_at: Utc::now(),
        }
    }
}

/// A job submission that never reached the encoder.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubmissionFailure {
    pub error: String,
    pub source_object: String,
}

impl SubmissionFailure {
    pub fn new(error: &dyn std::error::Error, source_object: impl Into<String>) -> Self {
        Self {
            error: error_chain(error),
            source_object: source_object.into(),
        }
    }
}

fn error_chain(error: &dyn std::error::Error) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !rendered.contains(&cause_text) {
            rendered.push_str(": ");
            rendered.push_str(&cause_text);
        }
        source = cause.source();
    }
    rendered
}

/// Job id of a raw encoder event, enveloped (`detail.jobId`) or bare (`jobId`).
pub fn event_job_id(event: &Value) -> Option<&str> {
    event
        .pointer("/detail/jobId")
        .or_else(|| event.get("jobId"))
        .and_then(Value::as_str)
}

/// One status message per lifecycle transition.
#[derive(Debug, Clone, Copy)]
pub enum Notice<'a> {
    Complete(&'a JobRecord),
    Canceled { job_id: &'a str, event: &'a Value },
    Error { job_id: &'a str, event: &'a Value },
    ProcessingError(&'a ProcessingFailure),
    SubmitFailed(&'a SubmissionFailure),
}

impl Notice<'_> {
    pub fn status_label(&self) -> &'static str {
        match self {
            Notice::Complete(_) => "COMPLETE",
            Notice::Canceled { .. } => "CANCELED",
            Notice::Error { .. } => "ERROR",
            Notice::ProcessingError(_) => "PROCESSING ERROR",
            Notice::SubmitFailed(_) => "SUBMIT FAILED",
        }
    }

    pub fn job_id(&self) -> &str {
        match self {
            Notice::Complete(record) => record.id.as_str(),
            Notice::Canceled { job_id, .. } | Notice::Error { job_id, .. } => *job_id,
            Notice::ProcessingError(failure) => failure.job_id.as_deref().unwrap_or("unknown"),
            Notice::SubmitFailed(failure) => failure.source_object.as_str(),
        }
    }
}

/// Operator console deep links.
#[derive(Debug, Clone)]
pub struct ConsoleLinks {
    pub region: String,
    pub log_group: Option<String>,
}

impl ConsoleLinks {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            log_group: None,
        }
    }

    pub fn with_log_group(mut self, log_group: Option<String>) -> Self {
        self.log_group = log_group;
        self
    }

    pub fn job(&self, job_id: &str) -> String {
        format!(
            "https://console.aws.amazon.com/mediaconvert/home?region={}#/jobs/summary/{}",
            self.region, job_id
        )
    }

    pub fn logs(&self) -> Option<String> {
        self.log_group.as_ref().map(|group| {
            format!(
                "https://console.aws.amazon.com/cloudwatch/home?region={}#logStream:group={}",
                self.region, group
            )
        })
    }
}

#[derive(Clone)]
pub struct Notifier {
    publisher: Arc<dyn NotificationPublisher>,
    topic: String,
    links: ConsoleLinks,
    stack_name: String,
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("topic", &self.topic)
            .field("links", &self.links)
            .field("stack_name", &self.stack_name)
            .finish()
    }
}

impl Notifier {
    pub fn new(
        publisher: Arc<dyn NotificationPublisher>,
        topic: impl Into<String>,
        links: ConsoleLinks,
    ) -> Self {
        Self {
            publisher,
            topic: topic.into(),
            links,
            stack_name: "vodflow".to_string(),
        }
    }

    pub fn with_stack_name(mut self, stack_name: impl Into<String>) -> Self {
        self.stack_name = stack_name.into();
        self
    }

    pub fn render(&self, notice: &Notice<'_>) -> NotifyResult<Notification> {
        let subject = match notice {
            Notice::SubmitFailed(_) => format!("{}: Encoding Job Submit Failed", self.stack_name),
            other => format!("Job {} id:{}", other.status_label(), other.job_id()),
        };
        let body = match notice {
            Notice::Complete(record) => json!({
                "Id": record.id,
                "InputFile": record.input_file,
                "InputDetails": record.input_details,
                "Outputs": record.outputs,
            }),
            Notice::Canceled { job_id, event } | Notice::Error { job_id, event } => json!({
                "Details": self.links.job(job_id),
                "ErrorMsg": event,
            }),
            Notice::ProcessingError(failure) => serde_json::to_value(failure)?,
            Notice::SubmitFailed(failure) => json!({
                "Details": self.links.logs(),
                "Error": failure,
            }),
        };
        Ok(Notification {
            subject,
            message: serde_json::to_string_pretty(&body)?,
        })
    }

    /// Renders and publishes one message. Failures are logged and returned.
    pub async fn notify(&self, notice: Notice<'_>) -> NotifyResult<Notification> {
        let notification = self.render(&notice)?;
        info!(status = notice.status_label(), job_id = %notice.job_id(), "sending notification");
        match self.publisher.publish(&self.topic, &notification).await {
            Ok(()) => Ok(notification),
            Err(err) => {
                error!(
                    status = notice.status_label(),
                    job_id = %notice.job_id(),
                    error = %err,
                    "failed to publish notification"
                );
                Err(err)
            }
        }
    }
}
