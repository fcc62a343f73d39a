//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.slackgw/config.json`) and environment.
//! Secrets (signing secret, bot token, backend URL) can come from env vars, which
//! override the file. Required values are checked once at startup; the process
//! refuses to serve without them.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Slack credentials and Web API settings.
    #[serde(default)]
    pub slack: SlackConfig,

    /// Agent backend endpoint and forwarding policy.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Event acceptance windows (replay, dedup TTL, freshness).
    #[serde(default)]
    pub events: EventsConfig,

    /// Which agent canonical requests are addressed to.
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Gateway bind and port settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for the HTTP server (default 8080).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    8080
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

/// Slack app settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlackConfig {
    /// Signing secret from the Slack app's settings page. Overridden by SLACK_SIGNING_SECRET env.
    pub signing_secret: Option<String>,

    /// Bot token (xoxb-...). Overridden by SLACK_BOT_TOKEN env.
    pub bot_token: Option<String>,

    /// Bot user id (UXXXXXXXX). When unset it is resolved via auth.test at startup.
    pub bot_user_id: Option<String>,

    /// Web API base URL. Defaults to https://slack.com/api; settable for tests.
    pub api_base: Option<String>,

    /// Retries for chat.postMessage on transient failure (default 3).
    #[serde(default = "default_post_retries")]
    pub post_retries: u32,

    /// Initial backoff between post retries in milliseconds, doubled per attempt (default 500).
    #[serde(default = "default_backoff_ms")]
    pub post_backoff_ms: u64,

    /// Timeout for users.info lookups in seconds (default 3). Lookup failure
    /// falls back to the raw user id, it never fails the pipeline.
    #[serde(default = "default_user_lookup_timeout_secs")]
    pub user_lookup_timeout_secs: u64,
}

fn default_post_retries() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_user_lookup_timeout_secs() -> u64 {
    3
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            signing_secret: None,
            bot_token: None,
            bot_user_id: None,
            api_base: None,
            post_retries: default_post_retries(),
            post_backoff_ms: default_backoff_ms(),
            user_lookup_timeout_secs: default_user_lookup_timeout_secs(),
        }
    }
}

/// Agent backend settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Base URL of the agent backend (e.g. "http://localhost:8000"). Overridden by AGENT_BACKEND_URL env.
    pub base_url: Option<String>,

    /// Per-attempt timeout in seconds (default 120; the backend may be calling a slow model).
    #[serde(default = "default_forward_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries after the first attempt on network failure or 5xx (default 3). 4xx is never retried.
    #[serde(default = "default_forward_retries")]
    pub retries: u32,

    /// Initial backoff between forward retries in milliseconds, doubled per attempt (default 500).
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_forward_timeout_secs() -> u64 {
    120
}

fn default_forward_retries() -> u32 {
    3
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: default_forward_timeout_secs(),
            retries: default_forward_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

/// Event acceptance windows.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsConfig {
    /// Maximum age of a signed request before it is rejected as a replay (default 300 s).
    #[serde(default = "default_replay_window_secs")]
    pub replay_window_secs: u64,

    /// How long a seen event id blocks duplicates (default 300 s).
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Events whose own ts is older than this are acked and dropped (default 60 s).
    #[serde(default = "default_max_event_age_secs")]
    pub max_age_secs: u64,
}

fn default_replay_window_secs() -> u64 {
    300
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_max_event_age_secs() -> u64 {
    60
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            replay_window_secs: default_replay_window_secs(),
            cache_ttl_secs: default_cache_ttl_secs(),
            max_age_secs: default_max_event_age_secs(),
        }
    }
}

/// Agent selector placed on every canonical request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    #[serde(default = "default_agent_name")]
    pub name: String,

    #[serde(rename = "type", default = "default_agent_type")]
    pub kind: String,
}

fn default_agent_name() -> String {
    "engineer".to_string()
}

fn default_agent_type() -> String {
    "developer".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            kind: default_agent_type(),
        }
    }
}

/// Resolve the signing secret: env SLACK_SIGNING_SECRET overrides config.
pub fn resolve_signing_secret(config: &Config) -> Option<String> {
    env_or(&config.slack.signing_secret, "SLACK_SIGNING_SECRET")
}

/// Resolve the bot token: env SLACK_BOT_TOKEN overrides config.
pub fn resolve_bot_token(config: &Config) -> Option<String> {
    env_or(&config.slack.bot_token, "SLACK_BOT_TOKEN")
}

/// Resolve the backend base URL: env AGENT_BACKEND_URL overrides config.
pub fn resolve_backend_url(config: &Config) -> Option<String> {
    env_or(&config.backend.base_url, "AGENT_BACKEND_URL")
}

fn env_or(config_value: &Option<String>, var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            config_value
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// Validated runtime settings. Construction fails when a required value is
/// absent, which keeps the process from serving half-configured.
#[derive(Debug, Clone)]
pub struct Settings {
    pub signing_secret: String,
    pub bot_token: String,
    pub backend_url: String,
    pub replay_window: Duration,
    pub cache_ttl: Duration,
    pub max_event_age: Duration,
    pub forward_timeout: Duration,
    pub forward_retries: u32,
    pub forward_backoff: Duration,
    pub post_retries: u32,
    pub post_backoff: Duration,
    pub user_lookup_timeout: Duration,
}

impl Settings {
    /// Resolve and validate required configuration. Errors name the missing value.
    pub fn resolve(config: &Config) -> Result<Self> {
        let signing_secret = resolve_signing_secret(config)
            .context("missing slack signing secret (slack.signingSecret or SLACK_SIGNING_SECRET)")?;
        let bot_token = resolve_bot_token(config)
            .context("missing slack bot token (slack.botToken or SLACK_BOT_TOKEN)")?;
        let backend_url = resolve_backend_url(config)
            .context("missing agent backend url (backend.baseUrl or AGENT_BACKEND_URL)")?;
        Ok(Self {
            signing_secret,
            bot_token,
            backend_url: backend_url.trim_end_matches('/').to_string(),
            replay_window: Duration::from_secs(config.events.replay_window_secs),
            cache_ttl: Duration::from_secs(config.events.cache_ttl_secs),
            max_event_age: Duration::from_secs(config.events.max_age_secs),
            forward_timeout: Duration::from_secs(config.backend.timeout_secs),
            forward_retries: config.backend.retries,
            forward_backoff: Duration::from_millis(config.backend.backoff_ms),
            post_retries: config.slack.post_retries,
            post_backoff: Duration::from_millis(config.slack.post_backoff_ms),
            user_lookup_timeout: Duration::from_secs(config.slack.user_lookup_timeout_secs),
        })
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("SLACKGW_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".slackgw").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the default path (or SLACKGW_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_required() -> Config {
        let mut config = Config::default();
        config.slack.signing_secret = Some("s3cret".to_string());
        config.slack.bot_token = Some("xoxb-test".to_string());
        config.backend.base_url = Some("http://localhost:8000/".to_string());
        config
    }

    #[test]
    fn default_gateway_port_and_bind() {
        let g = GatewayConfig::default();
        assert_eq!(g.port, 8080);
        assert_eq!(g.bind, "127.0.0.1");
    }

    #[test]
    fn settings_resolve_trims_backend_slash() {
        let settings = Settings::resolve(&config_with_required()).expect("resolve");
        assert_eq!(settings.backend_url, "http://localhost:8000");
        assert_eq!(settings.replay_window, Duration::from_secs(300));
        assert_eq!(settings.forward_retries, 3);
    }

    #[test]
    fn settings_resolve_fails_without_signing_secret() {
        let mut config = config_with_required();
        config.slack.signing_secret = None;
        let err = Settings::resolve(&config).unwrap_err();
        assert!(err.to_string().contains("signing secret"));
    }

    #[test]
    fn settings_resolve_fails_without_backend_url() {
        let mut config = config_with_required();
        config.backend.base_url = Some("  ".to_string());
        let err = Settings::resolve(&config).unwrap_err();
        assert!(err.to_string().contains("backend url"));
    }

    #[test]
    fn agent_config_defaults() {
        let a = AgentConfig::default();
        assert_eq!(a.name, "engineer");
        assert_eq!(a.kind, "developer");
    }
}
