use crate::config::{DispatchConfig, RetryConfig};
use crate::counter;
use crate::id::{JobId, canonical};
use crate::metrics_defs::QUEUE_RETRIES;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, sleep};
use url::Url;

const RETRIABLE_STATUS_CODES: &[StatusCode] = &[
    StatusCode::INTERNAL_SERVER_ERROR, // 500
    StatusCode::BAD_GATEWAY,           // 502
    StatusCode::SERVICE_UNAVAILABLE,   // 503
    StatusCode::GATEWAY_TIMEOUT,       // 504
];

/// The job handed to the dispatch appliance and echoed back on produce.
///
/// Every field defaults to empty when deserializing so that a missing field
/// is reported by the handler rather than as a JSON error.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub stop: String,
}

impl JobDescriptor {
    pub fn new(id: &JobId, start: DateTime<Utc>, stop: DateTime<Utc>) -> Self {
        JobDescriptor {
            id: id.to_string(),
            start: canonical(start),
            stop: canonical(stop),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum QueueError {
    #[error("dispatch request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("dispatch appliance answered {status} after {attempts} attempt(s)")]
    UnexpectedStatus { status: StatusCode, attempts: u32 },

    #[error("invalid dispatch endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Schedules digest jobs for asynchronous production
#[async_trait]
pub trait Queuer: Send + Sync {
    async fn queue(
        &self,
        id: &JobId,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> Result<(), QueueError>;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }
}

/// Posts jobs to `<endpoint>/<topic>/<event>` on the dispatch appliance.
pub struct DigestQueuer {
    client: reqwest::Client,
    url: Url,
    retry: RetryPolicy,
}

impl DigestQueuer {
    pub fn new(config: &DispatchConfig) -> Result<Self, QueueError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(DigestQueuer {
            client,
            url: event_url(&config.endpoint, &config.topic, &config.event)?,
            retry: RetryPolicy::from(&config.retry),
        })
    }
}

fn event_url(base: &Url, topic: &str, event: &str) -> Result<Url, QueueError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| QueueError::InvalidEndpoint(base.to_string()))?
        .pop_if_empty()
        .push(topic)
        .push(event);
    Ok(url)
}

#[async_trait]
impl Queuer for DigestQueuer {
    async fn queue(
        &self,
        id: &JobId,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let descriptor = JobDescriptor::new(id, start, stop);
        let mut attempts = 0;

        loop {
            attempts += 1;
            let response = self
                .client
                .post(self.url.clone())
                .json(&descriptor)
                .send()
                .await?;

            let status = response.status();
            if status == StatusCode::OK {
                tracing::debug!(%id, attempts, "Queued digest job");
                return Ok(());
            }

            if RETRIABLE_STATUS_CODES.contains(&status) && attempts < self.retry.max_attempts {
                tracing::warn!(%id, %status, attempts, "Dispatch appliance failed, retrying");
                counter!(QUEUE_RETRIES).increment(1);
                sleep(self.retry.backoff).await;
                continue;
            }

            return Err(QueueError::UnexpectedStatus { status, attempts });
        }
    }
}
