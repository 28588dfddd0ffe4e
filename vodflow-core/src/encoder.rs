use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::settings::JobRequest;

#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("invalid encoder endpoint {endpoint}: {reason}")]
    Endpoint { endpoint: String, reason: String },
    #[error("network error talking to encoder: {0}")]
    Network(String),
    #[error("encoder job {job_id} not found")]
    NotFound { job_id: String },
    #[error("encoder rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("unexpected encoder response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for EncoderError {
    fn from(error: reqwest::Error) -> Self {
        EncoderError::Network(error.to_string())
    }
}

pub type EncoderResult<T> = Result<T, EncoderError>;

/// The external encoding service.
#[async_trait]
pub trait EncoderClient: Send + Sync {
    /// Authoritative job description.
    async fn get_job(&self, job_id: &str) -> EncoderResult<Value>;

    /// Submits a resolved request and returns the encoder-assigned job id.
    async fn create_job(&self, request: &JobRequest) -> EncoderResult<String>;
}

/// JSON-over-HTTP encoder API: `GET jobs/{id}` and `POST jobs`.
#[derive(Debug, Clone)]
pub struct HttpEncoderClient {
    endpoint: Url,
    http: Client,
}

impl HttpEncoderClient {
    pub fn new(
        endpoint: &str,
        user_agent: Option<&str>,
        timeout: Duration,
    ) -> EncoderResult<Self> {
        let mut endpoint = Url::parse(endpoint).map_err(|err| EncoderError::Endpoint {
            endpoint: endpoint.to_string(),
            reason: err.to_string(),
        })?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }
        let http = Client::builder()
            .user_agent(user_agent.unwrap_or("vodflow/0.1"))
            .timeout(timeout)
            .build()?;
        Ok(Self { endpoint, http })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn url(&self, path: &str) -> EncoderResult<Url> {
        self.endpoint
            .join(path)
            .map_err(|err| EncoderError::Endpoint {
                endpoint: self.endpoint.to_string(),
                reason: err.to_string(),
            })
    }

    /// `jobs/{id}` with the id escaped as a single path segment.
    fn job_url(&self, job_id: &str) -> EncoderResult<Url> {
        let mut url = self.url("jobs")?;
        url.path_segments_mut()
            .map_err(|()| EncoderError::Endpoint {
                endpoint: self.endpoint.to_string(),
                reason: "endpoint cannot hold path segments".to_string(),
            })?
            .push(job_id);
        Ok(url)
    }
}

#[async_trait]
impl EncoderClient for HttpEncoderClient {
    async fn get_job(&self, job_id: &str) -> EncoderResult<Value> {
        let url = self.job_url(job_id)?;
        debug!(%url, "querying encoder job");
        let response = self.http.get(url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(EncoderError::NotFound {
                job_id: job_id.to_string(),
            }),
            status if status.is_success() => {
                let body: Value = response.json().await?;
                Ok(unwrap_job(body))
            }
            status => Err(EncoderError::Rejected {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn create_job(&self, request: &JobRequest) -> EncoderResult<String> {
        let url = self.url("jobs")?;
        let response = self.http.post(url).json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(EncoderError::Rejected {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        let body: Value = response.json().await?;
        let job_id = unwrap_job(body)
            .get("Id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| EncoderError::InvalidResponse("job id missing from response".into()))?;
        info!(job_id = %job_id, "job submitted to encoder");
        Ok(job_id)
    }
}

/// Responses wrap the job as `{ "Job": {...} }`; bare jobs are accepted too.
fn unwrap_job(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.contains_key("Job") => {
            map.remove("Job").unwrap_or(Value::Null)
        }
        other => other,
    }
}
