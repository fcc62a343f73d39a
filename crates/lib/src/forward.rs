//! Agent backend HTTP client with bounded retries.
//!
//! POSTs canonical requests to `{base}/agent/invoke`. Network failures and
//! 5xx answers are retried with doubling backoff up to the configured count;
//! 4xx means the request itself is wrong and is never retried.

use crate::protocol::{AgentRequest, AgentResponse};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("backend request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("backend rejected request: {status} {body}")]
    Rejected { status: u16, body: String },
    #[error("backend error: {status} {body}")]
    Status { status: u16, body: String },
    #[error("backend unavailable after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

/// Client for the agent backend invoke endpoint.
#[derive(Clone)]
pub struct BackendForwarder {
    base_url: String,
    retries: u32,
    backoff: Duration,
    client: reqwest::Client,
}

impl BackendForwarder {
    /// `timeout` bounds each attempt, not the whole retry loop; the backend
    /// may itself be waiting on a slow generation service.
    pub fn new(base_url: impl Into<String>, timeout: Duration, retries: u32, backoff: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.into(),
            retries,
            backoff,
            client,
        }
    }

    /// Forward one canonical request and return the backend's reply.
    pub async fn forward(&self, request: &AgentRequest) -> Result<AgentResponse, ForwardError> {
        let url = format!("{}/agent/invoke", self.base_url);
        let mut delay = self.backoff;
        let mut last_err = String::new();

        for attempt in 0..=self.retries {
            match self.attempt(&url, request).await {
                Ok(response) => return Ok(response),
                // Client-side problem: retrying an identical request cannot help.
                Err(e @ ForwardError::Rejected { .. }) => return Err(e),
                Err(e) => {
                    log::warn!(
                        "forward attempt {}/{} failed: {}",
                        attempt + 1,
                        self.retries + 1,
                        e
                    );
                    last_err = e.to_string();
                }
            }
            if attempt < self.retries {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
        Err(ForwardError::Exhausted {
            attempts: self.retries + 1,
            last: last_err,
        })
    }

    async fn attempt(
        &self,
        url: &str,
        request: &AgentRequest,
    ) -> Result<AgentResponse, ForwardError> {
        let res = self.client.post(url).json(request).send().await?;
        let status = res.status();
        if status.is_client_error() {
            let body = res.text().await.unwrap_or_default();
            return Err(ForwardError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ForwardError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(res.json().await?)
    }
}
