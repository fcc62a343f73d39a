//! Slack Web API client: chat.postMessage, users.info, auth.test.

use crate::normalize::UserDirectory;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const SLACK_API_BASE: &str = "https://slack.com/api";

/// Per-call deadline for Web API requests. chat.postMessage and users.info are
/// quick calls; anything slower than this is treated as a transient failure.
const API_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum SlackError {
    #[error("slack request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("slack api error: {0}")]
    Api(String),
}

/// Generic Web API response envelope: every method returns `ok` plus an
/// optional `error` code.
#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    user: Option<UserInfo>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    name: Option<String>,
}

/// Client for the Slack Web API. Base URL is overridable for tests.
#[derive(Clone)]
pub struct SlackClient {
    token: String,
    base_url: String,
    client: reqwest::Client,
}

impl SlackClient {
    pub fn new(token: impl Into<String>, base_url: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| SLACK_API_BASE.to_string());
        let client = reqwest::Client::builder()
            .timeout(API_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            token: token.into(),
            base_url,
            client,
        }
    }

    async fn call(&self, method: &str, body: serde_json::Value) -> Result<ApiEnvelope, SlackError> {
        let url = format!("{}/{}", self.base_url, method);
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(SlackError::Api(format!("{} {} {}", method, status, text)));
        }
        let data: ApiEnvelope = res.json().await?;
        if !data.ok {
            return Err(SlackError::Api(format!(
                "{} returned error: {}",
                method,
                data.error.as_deref().unwrap_or("unknown")
            )));
        }
        Ok(data)
    }

    /// chat.postMessage — post text into a channel thread. Single attempt;
    /// retry policy lives in [`ResponsePoster`].
    pub async fn post_message(
        &self,
        channel: &str,
        thread_ts: &str,
        text: &str,
    ) -> Result<(), SlackError> {
        let body = serde_json::json!({
            "channel": channel,
            "thread_ts": thread_ts,
            "text": text,
        });
        self.call("chat.postMessage", body).await?;
        Ok(())
    }

    /// auth.test — resolve the bot's own user id at startup.
    pub async fn auth_test(&self) -> Result<String, SlackError> {
        let data = self.call("auth.test", serde_json::json!({})).await?;
        data.user_id
            .ok_or_else(|| SlackError::Api("auth.test response missing user_id".to_string()))
    }

    /// users.info — resolve a user id to a display name.
    pub async fn users_info(&self, user_id: &str) -> Result<String, SlackError> {
        let data = self
            .call("users.info", serde_json::json!({ "user": user_id }))
            .await?;
        data.user
            .and_then(|u| u.name)
            .ok_or_else(|| SlackError::Api("users.info response missing user.name".to_string()))
    }
}

#[async_trait]
impl UserDirectory for SlackClient {
    async fn resolve(&self, user_id: &str) -> Result<String, String> {
        self.users_info(user_id).await.map_err(|e| e.to_string())
    }
}

/// Posts backend replies onto the originating thread, retrying transient send
/// failures a bounded number of times. By the time this runs the webhook ack
/// has long been returned, so a terminal failure is logged for operators only.
pub struct ResponsePoster {
    client: SlackClient,
    retries: u32,
    backoff: Duration,
}

impl ResponsePoster {
    pub fn new(client: SlackClient, retries: u32, backoff: Duration) -> Self {
        Self {
            client,
            retries,
            backoff,
        }
    }

    pub async fn post(&self, channel: &str, thread_ts: &str, text: &str) -> Result<(), SlackError> {
        let mut delay = self.backoff;
        let mut last_err = None;
        for attempt in 0..=self.retries {
            match self.client.post_message(channel, thread_ts, text).await {
                Ok(()) => {
                    log::info!("posted reply to {} (thread {})", channel, thread_ts);
                    return Ok(());
                }
                Err(e) => {
                    log::warn!(
                        "chat.postMessage attempt {} failed: {}",
                        attempt + 1,
                        e
                    );
                    last_err = Some(e);
                    if attempt < self.retries {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| SlackError::Api("no attempts made".to_string())))
    }

    /// Single-attempt, log-only send. Used for the best-effort failure notice
    /// when the backend is down.
    pub async fn notice(&self, channel: &str, thread_ts: &str, text: &str) {
        if let Err(e) = self.client.post_message(channel, thread_ts, text).await {
            log::warn!("best-effort notice to {} failed: {}", channel, e);
        }
    }
}
