//! Integration tests for the events pipeline: real gateway on a free port,
//! mock agent backend and mock Slack Web API as small axum routers. Requests
//! are signed with the same v0 scheme the verifier checks.

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use lib::config::Config;
use lib::gateway;
use lib::protocol::{AgentRequest, AgentResponse, AgentStatus, Reply};
use lib::verify::RequestVerifier;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const SIGNING_SECRET: &str = "test_secret_12345";

#[derive(Clone)]
struct MockBackend {
    /// One entry per /agent/invoke call, recorded on arrival so tests can
    /// check both attempt counts and inter-attempt gaps.
    calls: Arc<Mutex<Vec<Instant>>>,
    /// The first N calls answer with `fail_status` instead of a reply.
    fail_first: usize,
    fail_status: u16,
    delay: Duration,
}

impl MockBackend {
    fn ok() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            fail_first: 0,
            fail_status: 500,
            delay: Duration::ZERO,
        }
    }

    fn failing(fail_first: usize, fail_status: u16) -> Self {
        Self {
            fail_first,
            fail_status,
            ..Self::ok()
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::ok()
        }
    }
}

async fn invoke_handler(
    State(backend): State<MockBackend>,
    Json(request): Json<AgentRequest>,
) -> Response {
    let n = {
        let mut calls = backend.calls.lock().expect("calls lock");
        calls.push(Instant::now());
        calls.len() - 1
    };
    if n < backend.fail_first {
        return StatusCode::from_u16(backend.fail_status)
            .expect("status")
            .into_response();
    }
    if !backend.delay.is_zero() {
        tokio::time::sleep(backend.delay).await;
    }
    let response = AgentResponse {
        id: request.id.clone(),
        agent: AgentStatus {
            name: request.agent.name.clone(),
            status: "ok".to_string(),
        },
        reply: Reply {
            text: format!("echo: {}", request.message.text),
            channel: request.source.channel.clone(),
            thread_ts: request.source.thread_ts.clone(),
        },
        meta: json!({}),
    };
    Json(response).into_response()
}

#[derive(Clone)]
struct MockSlack {
    posts: Arc<Mutex<Vec<Value>>>,
}

async fn post_message_handler(State(slack): State<MockSlack>, Json(body): Json<Value>) -> Json<Value> {
    slack.posts.lock().expect("posts lock").push(body);
    Json(json!({ "ok": true }))
}

async fn users_info_handler() -> Json<Value> {
    Json(json!({ "ok": true, "user": { "name": "tester" } }))
}

async fn auth_test_handler() -> Json<Value> {
    Json(json!({ "ok": true, "user_id": "U123" }))
}

struct Harness {
    events_url: String,
    verifier: RequestVerifier,
    backend: MockBackend,
    slack_posts: Arc<Mutex<Vec<Value>>>,
    client: reqwest::Client,
}

impl Harness {
    async fn start(backend: MockBackend) -> Self {
        Self::start_with_backoff(backend, 10).await
    }

    async fn start_with_backoff(backend: MockBackend, backoff_ms: u64) -> Self {
        let backend_router = Router::new()
            .route("/agent/invoke", post(invoke_handler))
            .with_state(backend.clone());
        let backend_port = spawn_server(backend_router).await;

        let slack_posts = Arc::new(Mutex::new(Vec::new()));
        let slack = MockSlack {
            posts: slack_posts.clone(),
        };
        let slack_router = Router::new()
            .route("/chat.postMessage", post(post_message_handler))
            .route("/users.info", post(users_info_handler))
            .route("/auth.test", post(auth_test_handler))
            .with_state(slack);
        let slack_port = spawn_server(slack_router).await;

        let gateway_port = free_port();
        let mut config = Config::default();
        config.gateway.port = gateway_port;
        config.gateway.bind = "127.0.0.1".to_string();
        config.slack.signing_secret = Some(SIGNING_SECRET.to_string());
        config.slack.bot_token = Some("xoxb-test".to_string());
        config.slack.bot_user_id = Some("U123".to_string());
        config.slack.api_base = Some(format!("http://127.0.0.1:{}", slack_port));
        config.slack.post_backoff_ms = 10;
        config.backend.base_url = Some(format!("http://127.0.0.1:{}", backend_port));
        config.backend.backoff_ms = backoff_ms;
        tokio::spawn(async move {
            let _ = gateway::run_gateway(config).await;
        });

        let client = reqwest::Client::new();
        let health_url = format!("http://127.0.0.1:{}/healthz", gateway_port);
        wait_until(|| {
            let client = client.clone();
            let url = health_url.clone();
            async move { client.get(&url).send().await.is_ok() }
        })
        .await;

        Self {
            events_url: format!("http://127.0.0.1:{}/slack/events", gateway_port),
            verifier: RequestVerifier::new(SIGNING_SECRET, Duration::from_secs(300)),
            backend,
            slack_posts,
            client,
        }
    }

    /// POST a correctly signed body to /slack/events.
    async fn post_signed(&self, body: &str) -> reqwest::Response {
        let ts = unix_now().to_string();
        let sig = self.verifier.sign(&ts, body.as_bytes());
        self.client
            .post(&self.events_url)
            .header("X-Slack-Signature", sig)
            .header("X-Slack-Request-Timestamp", ts)
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .expect("post event")
    }

    fn backend_calls(&self) -> usize {
        self.backend.calls.lock().expect("calls lock").len()
    }

    fn backend_call_times(&self) -> Vec<Instant> {
        self.backend.calls.lock().expect("calls lock").clone()
    }

    fn posts(&self) -> Vec<Value> {
        self.slack_posts.lock().expect("posts lock").clone()
    }
}

async fn spawn_server(router: Router) -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let port = listener.local_addr().expect("local_addr").port();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    port
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_secs()
}

/// Fresh ts so the event passes the freshness gate; unique per call so dedup
/// does not collide across tests.
fn fresh_ts() -> String {
    static SEQ: AtomicUsize = AtomicUsize::new(0);
    format!("{}.{:06}", unix_now(), SEQ.fetch_add(1, Ordering::SeqCst))
}

fn mention_body(text: &str, ts: &str) -> String {
    json!({
        "type": "event_callback",
        "team_id": "T0123",
        "event": {
            "type": "app_mention",
            "user": "U777",
            "channel": "C42",
            "text": text,
            "ts": ts
        }
    })
    .to_string()
}

async fn wait_until<F, Fut>(f: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if f().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not met within 5s");
}

#[tokio::test]
async fn url_verification_echoes_challenge() {
    let h = Harness::start(MockBackend::ok()).await;
    let body = r#"{"type":"url_verification","challenge":"abc123"}"#;
    let res = h.post_signed(body).await;
    assert_eq!(res.status(), 200);
    let json: Value = res.json().await.expect("json");
    assert_eq!(json["challenge"], "abc123");
    assert_eq!(h.backend_calls(), 0);
}

#[tokio::test]
async fn bad_signature_is_rejected_before_processing() {
    let h = Harness::start(MockBackend::ok()).await;
    let body = mention_body("<@U123> hi", &fresh_ts());
    let ts = unix_now().to_string();
    let res = h
        .client
        .post(&h.events_url)
        .header("X-Slack-Signature", "v0=deadbeef")
        .header("X-Slack-Request-Timestamp", ts)
        .body(body)
        .send()
        .await
        .expect("post");
    assert_eq!(res.status(), 401);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.backend_calls(), 0);
}

#[tokio::test]
async fn malformed_body_is_a_400() {
    let h = Harness::start(MockBackend::ok()).await;
    let res = h.post_signed("{not json").await;
    assert_eq!(res.status(), 400);
}

#[tokio::test]
async fn duplicate_deliveries_forward_exactly_once() {
    let h = Harness::start(MockBackend::ok()).await;
    let body = mention_body("<@U123> do X", &fresh_ts());
    for _ in 0..5 {
        let res = h.post_signed(&body).await;
        assert_eq!(res.status(), 200);
    }
    wait_until(|| async { !h.posts().is_empty() }).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.backend_calls(), 1);
    let posts = h.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0]["channel"], "C42");
    assert_eq!(posts[0]["text"], "echo: do X");
}

#[tokio::test]
async fn ack_returns_before_slow_backend_completes() {
    let h = Harness::start(MockBackend::slow(Duration::from_secs(2))).await;
    let body = mention_body("<@U123> slow", &fresh_ts());
    let started = Instant::now();
    let res = h.post_signed(&body).await;
    let elapsed = started.elapsed();
    assert_eq!(res.status(), 200);
    assert!(
        elapsed < Duration::from_millis(1000),
        "ack took {:?}, backend latency leaked into the webhook response",
        elapsed
    );
}

#[tokio::test]
async fn server_errors_are_retried_until_success() {
    let h = Harness::start(MockBackend::failing(3, 500)).await;
    let body = mention_body("<@U123> retry", &fresh_ts());
    let res = h.post_signed(&body).await;
    assert_eq!(res.status(), 200);
    wait_until(|| async { !h.posts().is_empty() }).await;
    // 3 failures + 1 success = default retries (3) exactly exhausted.
    assert_eq!(h.backend_calls(), 4);
    assert_eq!(h.posts()[0]["text"], "echo: retry");
}

#[tokio::test]
async fn retry_backoff_doubles_between_attempts() {
    // 100 ms base so the schedule (100, 200, 400) dominates network jitter.
    let h = Harness::start_with_backoff(MockBackend::failing(3, 500), 100).await;
    let body = mention_body("<@U123> backoff", &fresh_ts());
    let res = h.post_signed(&body).await;
    assert_eq!(res.status(), 200);
    wait_until(|| async { !h.posts().is_empty() }).await;

    let times = h.backend_call_times();
    assert_eq!(times.len(), 4);
    let gaps: Vec<Duration> = times
        .windows(2)
        .map(|w| w[1].duration_since(w[0]))
        .collect();
    for (i, gap) in gaps.iter().enumerate() {
        let scheduled = Duration::from_millis(100 * 2u64.pow(i as u32));
        assert!(
            *gap >= scheduled,
            "gap {} was {:?}, below the scheduled backoff {:?}",
            i + 1,
            gap,
            scheduled
        );
    }
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let h = Harness::start(MockBackend::failing(usize::MAX, 400)).await;
    let body = mention_body("<@U123> bad", &fresh_ts());
    let res = h.post_signed(&body).await;
    assert_eq!(res.status(), 200);
    // Terminal forward failure posts the best-effort notice to the thread.
    wait_until(|| async { !h.posts().is_empty() }).await;
    assert_eq!(h.backend_calls(), 1);
    let posts = h.posts();
    assert_eq!(posts.len(), 1);
    assert!(posts[0]["text"]
        .as_str()
        .expect("text")
        .contains("agent backend"));
}

#[tokio::test]
async fn bot_authored_events_produce_no_backend_call() {
    let h = Harness::start(MockBackend::ok()).await;
    let body = json!({
        "type": "event_callback",
        "team_id": "T0123",
        "event": {
            "type": "message",
            "subtype": "bot_message",
            "bot_id": "B99",
            "channel": "C42",
            "text": "I am a bot",
            "ts": fresh_ts()
        }
    })
    .to_string();
    let res = h.post_signed(&body).await;
    assert_eq!(res.status(), 200);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.backend_calls(), 0);
    assert!(h.posts().is_empty());
}

#[tokio::test]
async fn stale_events_are_acked_and_dropped() {
    let h = Harness::start(MockBackend::ok()).await;
    let stale_ts = format!("{}.000100", unix_now() - 3600);
    let body = mention_body("<@U123> old", &stale_ts);
    let res = h.post_signed(&body).await;
    assert_eq!(res.status(), 200);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.backend_calls(), 0);
}

#[tokio::test]
async fn channel_chatter_is_acked_without_forwarding() {
    let h = Harness::start(MockBackend::ok()).await;
    let body = json!({
        "type": "event_callback",
        "team_id": "T0123",
        "event": {
            "type": "message",
            "user": "U777",
            "channel": "C42",
            "channel_type": "channel",
            "text": "unrelated chatter",
            "ts": fresh_ts()
        }
    })
    .to_string();
    let res = h.post_signed(&body).await;
    assert_eq!(res.status(), 200);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.backend_calls(), 0);
}
