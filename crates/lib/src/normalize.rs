//! Slack event normalization into canonical agent requests.
//!
//! Decides whether an event deserves a backend call at all (skip reasons are
//! not errors), strips bot mentions from the text, resolves the author's
//! display name with a short bounded lookup, and derives the deterministic
//! conversation id the backend keys history on.

use crate::event::SlackEvent;
use crate::protocol::{
    AgentRequest, AgentSelector, MessageBody, RequestContext, Source,
};
use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

/// `<@U12345>` style mention tokens.
static MENTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<@[A-Z0-9]+>").expect("mention regex"));

/// Directory lookup collaborator: user id -> display name.
/// The normalizer bounds each call with its own timeout and falls back to the
/// raw id on failure, so implementations may take as long as the network does.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn resolve(&self, user_id: &str) -> Result<String, String>;
}

/// Why an event was ignored without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Authored by the bot itself or carrying a bot_id / bot_message subtype.
    AutomatedMessage,
    /// Event type outside the supported set.
    UnsupportedType(String),
    /// A `message` event carrying the bot mention; the `app_mention` delivery
    /// of the same message is the one that gets answered.
    MentionHandledElsewhere,
    /// A plain channel message: not addressed to the bot, nothing to forward.
    ContextOnly,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("event missing required field: {0}")]
    MissingField(&'static str),
}

/// Result of normalization: a canonical request, or a reason to ignore.
#[derive(Debug)]
pub enum Normalized {
    Request(AgentRequest),
    Skip(SkipReason),
}

/// Converts Slack events into [`AgentRequest`]s.
pub struct EventNormalizer {
    directory: Arc<dyn UserDirectory>,
    bot_user_id: String,
    agent: AgentSelector,
    lookup_timeout: Duration,
}

impl EventNormalizer {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        bot_user_id: impl Into<String>,
        agent: AgentSelector,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            bot_user_id: bot_user_id.into(),
            agent,
            lookup_timeout,
        }
    }

    /// Normalize one event. Skips are silent (the webhook was already acked);
    /// an error means a required field is missing and the event is dropped.
    pub async fn normalize(
        &self,
        event: &SlackEvent,
        team_id: Option<&str>,
    ) -> Result<Normalized, NormalizeError> {
        if let Some(reason) = self.classify(event) {
            return Ok(Normalized::Skip(reason));
        }

        let user_id = event
            .user
            .as_deref()
            .ok_or(NormalizeError::MissingField("user"))?;
        let channel = event
            .channel
            .as_deref()
            .ok_or(NormalizeError::MissingField("channel"))?;
        let raw_text = event.text.clone().unwrap_or_default();
        let text = clean_mentions(&raw_text);

        let username = self.resolve_username(user_id).await;
        let thread_anchor = event.thread_anchor().to_string();
        let conversation_id = conversation_id(channel, &thread_anchor);

        Ok(Normalized::Request(AgentRequest {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            source: Source {
                platform: "slack".to_string(),
                workspace: team_id.unwrap_or("unknown").to_string(),
                channel: channel.to_string(),
                thread_ts: thread_anchor,
                user_id: user_id.to_string(),
                username,
            },
            agent: self.agent.clone(),
            message: MessageBody {
                text,
                raw_text,
                attachments: Vec::new(),
            },
            context: RequestContext { conversation_id },
        }))
    }

    /// Skip checks, cheapest first. None means the event should be forwarded.
    fn classify(&self, event: &SlackEvent) -> Option<SkipReason> {
        if event.subtype.as_deref() == Some("bot_message") || event.bot_id.is_some() {
            return Some(SkipReason::AutomatedMessage);
        }
        if event.user.as_deref() == Some(self.bot_user_id.as_str()) {
            return Some(SkipReason::AutomatedMessage);
        }
        match event.event_type.as_str() {
            "app_mention" => None,
            "message" => {
                let text = event.text.as_deref().unwrap_or("");
                if !self.bot_user_id.is_empty()
                    && text.contains(&format!("<@{}>", self.bot_user_id))
                {
                    return Some(SkipReason::MentionHandledElsewhere);
                }
                match event.channel_type.as_deref() {
                    Some("im") | Some("mpim") => None,
                    _ => Some(SkipReason::ContextOnly),
                }
            }
            other => Some(SkipReason::UnsupportedType(other.to_string())),
        }
    }

    /// Bounded display-name lookup; falls back to the raw user id rather than
    /// failing the whole normalization.
    async fn resolve_username(&self, user_id: &str) -> String {
        match tokio::time::timeout(self.lookup_timeout, self.directory.resolve(user_id)).await {
            Ok(Ok(name)) => name,
            Ok(Err(e)) => {
                log::warn!("user lookup failed for {}: {}", user_id, e);
                user_id.to_string()
            }
            Err(_) => {
                log::warn!("user lookup timed out for {}", user_id);
                user_id.to_string()
            }
        }
    }
}

/// Strip all `<@U...>` mention tokens and trim surrounding whitespace.
pub fn clean_mentions(text: &str) -> String {
    MENTION_RE.replace_all(text, "").trim().to_string()
}

/// Deterministic thread key: same channel + anchor always yields the same id.
pub fn conversation_id(channel: &str, thread_anchor: &str) -> String {
    format!("{}:{}", channel, thread_anchor)
}
