//! Canonical request/response shapes exchanged with the agent backend.
//!
//! Platform-agnostic contracts: the gateway builds an [`AgentRequest`] from a
//! Slack event and the backend answers with an [`AgentResponse`]. Field names
//! are part of the wire contract with the backend, do not rename casually.

use serde::{Deserialize, Serialize};

/// Canonical request forwarded to `POST {backend}/agent/invoke`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    /// Opaque unique id for this request (uuid v4).
    pub id: String,
    /// ISO-8601 creation time.
    pub timestamp: String,
    pub source: Source,
    pub agent: AgentSelector,
    pub message: MessageBody,
    pub context: RequestContext,
}

/// Where the message came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub platform: String,
    pub workspace: String,
    pub channel: String,
    pub thread_ts: String,
    pub user_id: String,
    pub username: String,
}

/// Which agent should handle the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSelector {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// The message text, both cleaned and as received.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageBody {
    /// Mention-stripped text.
    pub text: String,
    /// Unmodified original text.
    pub raw_text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    /// Deterministic thread key: `{channel}:{thread_anchor}`. The backend keys
    /// its conversation history on this, so it must be stable across calls.
    pub conversation_id: String,
}

/// Backend reply for a forwarded request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    /// Echoes the request id.
    pub id: String,
    pub agent: AgentStatus,
    pub reply: Reply,
    #[serde(default)]
    pub meta: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    pub name: String,
    pub status: String,
}

/// Where and what to post back on the originating platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub text: String,
    pub channel: String,
    pub thread_ts: String,
}
