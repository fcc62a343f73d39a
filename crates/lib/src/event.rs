//! Slack event envelope types.
//!
//! The envelope is decoded once at the HTTP boundary into tagged variants
//! (`url_verification` handshake vs `event_callback`); nothing downstream
//! touches untyped JSON.

use serde::Deserialize;

/// Outer JSON structure Slack POSTs to the events endpoint.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventEnvelope {
    /// Endpoint handshake: echo `challenge` back and do nothing else.
    UrlVerification { challenge: String },

    /// A real event delivery.
    EventCallback {
        #[serde(default)]
        team_id: Option<String>,
        event: SlackEvent,
    },

    /// Envelope types we don't handle (acked and ignored).
    #[serde(other)]
    Other,
}

/// Inner event payload. Ephemeral; lives only for the duration of one request.
#[derive(Debug, Clone, Deserialize)]
pub struct SlackEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub channel_type: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    pub ts: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
}

impl SlackEvent {
    /// Dedup key: `{type}:{ts}`. Slack retries deliver the same pair.
    pub fn event_id(&self) -> String {
        format!("{}:{}", self.event_type, self.ts)
    }

    /// Event age in seconds relative to `now` (unix seconds). None when ts is
    /// not numeric (defensively treated as fresh by callers).
    pub fn age_secs(&self, now: f64) -> Option<f64> {
        self.ts.parse::<f64>().ok().map(|ts| now - ts)
    }

    /// The timestamp the conversation thread anchors on: `thread_ts` inside a
    /// thread, the event's own `ts` otherwise (a thread's first message
    /// anchors to itself).
    pub fn thread_anchor(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_verification_decodes() {
        let body = r#"{"type":"url_verification","challenge":"abc123","token":"t"}"#;
        let env: EventEnvelope = serde_json::from_str(body).expect("decode");
        match env {
            EventEnvelope::UrlVerification { challenge } => assert_eq!(challenge, "abc123"),
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn event_callback_decodes() {
        let body = r#"{
            "type": "event_callback",
            "team_id": "T0123",
            "event": {
                "type": "app_mention",
                "user": "U777",
                "channel": "C42",
                "text": "<@U123> hello",
                "ts": "1700000000.000100"
            }
        }"#;
        let env: EventEnvelope = serde_json::from_str(body).expect("decode");
        let EventEnvelope::EventCallback { team_id, event } = env else {
            panic!("expected event_callback");
        };
        assert_eq!(team_id.as_deref(), Some("T0123"));
        assert_eq!(event.event_type, "app_mention");
        assert_eq!(event.event_id(), "app_mention:1700000000.000100");
        assert_eq!(event.thread_anchor(), "1700000000.000100");
    }

    #[test]
    fn thread_anchor_prefers_thread_ts() {
        let event = SlackEvent {
            event_type: "message".to_string(),
            subtype: None,
            user: Some("U1".to_string()),
            bot_id: None,
            channel: Some("C1".to_string()),
            channel_type: None,
            text: Some("hi".to_string()),
            ts: "1700000002.000000".to_string(),
            thread_ts: Some("1700000000.000100".to_string()),
        };
        assert_eq!(event.thread_anchor(), "1700000000.000100");
    }

    #[test]
    fn unknown_envelope_type_is_other() {
        let env: EventEnvelope =
            serde_json::from_str(r#"{"type":"app_rate_limited"}"#).expect("decode");
        assert!(matches!(env, EventEnvelope::Other));
    }
}
