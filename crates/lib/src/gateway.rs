//! Gateway HTTP server and event pipeline.
//!
//! The webhook handler does only the cheap, bounded work inline: signature
//! verification, envelope decode, freshness gate, dedup check-and-mark. The
//! ack goes back to Slack right after that; normalization, forwarding, and
//! posting run on a detached task whose outcome cannot affect the already
//! returned response.

use crate::cache::EventCache;
use crate::config::{self, Config, Settings};
use crate::event::{EventEnvelope, SlackEvent};
use crate::forward::BackendForwarder;
use crate::normalize::{EventNormalizer, Normalized, SkipReason};
use crate::protocol::AgentSelector;
use crate::slack::{ResponsePoster, SlackClient};
use crate::verify::RequestVerifier;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const SIGNATURE_HEADER: &str = "X-Slack-Signature";
const TIMESTAMP_HEADER: &str = "X-Slack-Request-Timestamp";

/// Shared state for the gateway; everything is an injected component so tests
/// can point the clients at mock servers.
#[derive(Clone)]
pub struct GatewayState {
    pub verifier: Arc<RequestVerifier>,
    pub cache: Arc<EventCache>,
    pub normalizer: Arc<EventNormalizer>,
    pub forwarder: Arc<BackendForwarder>,
    pub poster: Arc<ResponsePoster>,
    /// Events older than this are acked and dropped before dedup.
    pub max_event_age: Duration,
}

/// Build gateway state from config. Resolves required settings and, when the
/// bot user id is not pinned in config, discovers it via auth.test; a lookup
/// failure there is a startup error.
pub async fn build_state(config: &Config) -> Result<GatewayState> {
    let settings = Settings::resolve(config)?;
    let slack = SlackClient::new(settings.bot_token.clone(), config.slack.api_base.clone());

    let bot_user_id = match config.slack.bot_user_id.clone() {
        Some(id) => id,
        None => slack
            .auth_test()
            .await
            .context("resolving bot user id via auth.test")?,
    };
    log::info!("bot user id: {}", bot_user_id);

    let agent = AgentSelector {
        name: config.agent.name.clone(),
        kind: config.agent.kind.clone(),
    };
    let normalizer = EventNormalizer::new(
        Arc::new(slack.clone()),
        bot_user_id,
        agent,
        settings.user_lookup_timeout,
    );
    let forwarder = BackendForwarder::new(
        settings.backend_url.clone(),
        settings.forward_timeout,
        settings.forward_retries,
        settings.forward_backoff,
    );
    let poster = ResponsePoster::new(slack, settings.post_retries, settings.post_backoff);

    Ok(GatewayState {
        verifier: Arc::new(RequestVerifier::new(
            settings.signing_secret,
            settings.replay_window,
        )),
        cache: Arc::new(EventCache::new(settings.cache_ttl)),
        normalizer: Arc::new(normalizer),
        forwarder: Arc::new(forwarder),
        poster: Arc::new(poster),
        max_event_age: settings.max_event_age,
    })
}

/// Routes: the Slack events webhook and a liveness probe.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/slack/events", post(handle_event))
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// Run the gateway server; binds to config.gateway.bind:config.gateway.port.
/// Blocks until shutdown (Ctrl+C or SIGTERM).
pub async fn run_gateway(config: Config) -> Result<()> {
    let state = build_state(&config).await?;
    let app = router(state);

    let bind_addr = format!("{}:{}", config.gateway.bind.trim(), config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

/// GET /healthz — liveness probe.
async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": "slack-gateway" }))
}

/// POST /slack/events — verify, decode, dedup, ack, then process detached.
async fn handle_event(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    let timestamp = headers.get(TIMESTAMP_HEADER).and_then(|v| v.to_str().ok());
    if let Err(e) = state.verifier.verify(&body, signature, timestamp) {
        log::warn!("rejected request: {}", e);
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid signature" })),
        )
            .into_response();
    }

    let envelope: EventEnvelope = match serde_json::from_slice(&body) {
        Ok(env) => env,
        Err(e) => {
            log::warn!("malformed event body: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "malformed body" })),
            )
                .into_response();
        }
    };

    match envelope {
        EventEnvelope::UrlVerification { challenge } => {
            log::info!("answering url_verification challenge");
            Json(json!({ "challenge": challenge })).into_response()
        }
        EventEnvelope::EventCallback { team_id, event } => {
            accept_event(state, team_id, event).into_response()
        }
        EventEnvelope::Other => {
            log::debug!("ignoring unhandled envelope type");
            ack()
        }
    }
}

/// Synchronous half of event handling: freshness gate and atomic dedup, then
/// hand off to a detached task and ack. Duplicates and stale events still ack
/// with 200; Slack must never see an error for an event we chose to ignore.
fn accept_event(state: GatewayState, team_id: Option<String>, event: SlackEvent) -> Response {
    let event_id = event.event_id();

    if let Some(age) = event.age_secs(unix_now_f64()) {
        if age > state.max_event_age.as_secs_f64() {
            log::info!("ignoring stale event {} ({:.1}s old)", event_id, age);
            return ack();
        }
    }

    if !state.cache.check_and_mark(&event_id) {
        log::info!("duplicate event {}, already handled", event_id);
        return ack();
    }

    log::info!("accepted event {} ({})", event_id, event.event_type);
    tokio::spawn(async move {
        process_event(state, team_id, event).await;
    });
    ack()
}

fn ack() -> Response {
    Json(json!({ "ok": true })).into_response()
}

/// Detached pipeline: normalize, forward, post the reply. Runs after the ack;
/// every failure path here ends in a log line, never in a webhook error.
async fn process_event(state: GatewayState, team_id: Option<String>, event: SlackEvent) {
    let request = match state.normalizer.normalize(&event, team_id.as_deref()).await {
        Ok(Normalized::Request(request)) => request,
        Ok(Normalized::Skip(reason)) => {
            log::info!("skipping event {}: {}", event.event_id(), skip_label(&reason));
            return;
        }
        Err(e) => {
            log::warn!("dropping event {}: {}", event.event_id(), e);
            return;
        }
    };

    let conversation_id = request.context.conversation_id.clone();
    log::info!(
        "forwarding request {} for {}",
        request.id,
        conversation_id
    );

    let response = match state.forwarder.forward(&request).await {
        Ok(response) => response,
        Err(e) => {
            log::error!("forward failed for {}: {}", conversation_id, e);
            // Best-effort notice to the thread; a failure here is log-only.
            state
                .poster
                .notice(
                    &request.source.channel,
                    &request.source.thread_ts,
                    "Sorry, I couldn't reach the agent backend. Please try again shortly.",
                )
                .await;
            return;
        }
    };

    if let Err(e) = state
        .poster
        .post(
            &response.reply.channel,
            &response.reply.thread_ts,
            &response.reply.text,
        )
        .await
    {
        log::error!("posting reply failed for {}: {}", conversation_id, e);
    }
}

fn skip_label(reason: &SkipReason) -> String {
    match reason {
        SkipReason::AutomatedMessage => "automated message".to_string(),
        SkipReason::UnsupportedType(t) => format!("unsupported type {}", t),
        SkipReason::MentionHandledElsewhere => "mention handled by app_mention".to_string(),
        SkipReason::ContextOnly => "context-only message".to_string(),
    }
}

fn unix_now_f64() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Load config and run the gateway (entry point used by the CLI).
pub async fn run(config_path: Option<std::path::PathBuf>, port: Option<u16>) -> Result<()> {
    let (mut config, path) = config::load_config(config_path)?;
    log::debug!("config loaded from {}", path.display());
    if let Some(p) = port {
        config.gateway.port = p;
    }
    run_gateway(config).await
}
