//! End-to-end scenarios: admission layer + virtual channels + a mocked
//! upstream.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mproxy::collection::{ChannelCollection, QueueRegistry, WorkerRegistry};
use mproxy::server::{build_app, AppState, DEFAULT_RETRY_AFTER};

const BOT_ID: &str = "12345:secret-token";
const SEND_PATH: &str = "/bot12345:secret-token/sendMessage";

struct TestProxy {
    app: Router,
    state: Arc<AppState>,
}

/// Build a proxy with one `TestChannel` pointing at `upstream`, activated
/// and out of maintenance.
async fn start_proxy(upstream: &str, queue_size: usize, max_attempts: u32) -> TestProxy {
    let yaml = format!(
        r#"
TestChannel:
  worker:
    class: http
    url: "{upstream}"
    bot_id: "{BOT_ID}"
    chat_id: 42
  queue:
    class: memory
    queue_size: {queue_size}
  minRetryAfter: 0
  maxRetryAfter: 1
  maxAttempts: {max_attempts}
  retryBase: 1.0
"#
    );

    let config = mproxy::config::parse(&yaml).expect("test config parses");
    let channels =
        ChannelCollection::from_config(&config, &QueueRegistry::defaults(), &WorkerRegistry::defaults())
            .expect("collection builds");

    let state = Arc::new(AppState::new(channels, DEFAULT_RETRY_AFTER));
    state.channels.activate_all().expect("channels activate");
    state.set_maintenance(false);

    TestProxy {
        app: build_app(Arc::clone(&state)),
        state,
    }
}

async fn send_form(app: &Router, channel: &str, body: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/send/{channel}"))
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap();
    do_request(app, request).await
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    do_request(app, request).await
}

async fn do_request(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::String(
        String::from_utf8_lossy(&bytes).into_owned(),
    ));
    (status, value)
}

/// Poll the stat endpoint until `check` passes or two seconds elapse.
async fn wait_for_stat(app: &Router, check: impl Fn(&Value) -> bool) -> Value {
    let mut latest = Value::Null;
    for _ in 0..100 {
        let (status, body) = get_json(app, "/api/stat/TestChannel").await;
        assert_eq!(status, StatusCode::OK);
        if check(&body) {
            return body;
        }
        latest = body;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("stat condition not reached within 2s, last: {latest}");
}

fn was_send(stat: &Value) -> u64 {
    stat["channel_stat"]["was_send"].as_u64().unwrap_or(0)
}

fn was_rejected(stat: &Value) -> u64 {
    stat["channel_stat"]["was_rejected"].as_u64().unwrap_or(0)
}

fn ok_response() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "ok": true,
        "result": { "message_id": 42 },
    }))
}

// --- S1: happy path -------------------------------------------------------

#[tokio::test]
async fn happy_path_delivers_one_message() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .and(body_string_contains("text=hello"))
        .and(body_string_contains("chat_id=42"))
        .respond_with(ok_response())
        .expect(1)
        .mount(&upstream)
        .await;

    let proxy = start_proxy(&upstream.uri(), 10, 5).await;

    let (status, body) = send_form(&proxy.app, "TestChannel", "text=hello").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "success" }));

    let stat = wait_for_stat(&proxy.app, |s| was_send(s) == 1).await;
    assert_eq!(was_rejected(&stat), 0);
    assert_eq!(stat["channel_stat"]["in_queue"], 0);
    assert_eq!(stat["is_running"], true);
    assert_eq!(stat["last_error"], Value::Null);

    proxy.state.channels.deactivate_all().await;
}

#[tokio::test]
async fn json_body_is_accepted_too() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .and(body_string_contains("text=from-json"))
        .respond_with(ok_response())
        .expect(1)
        .mount(&upstream)
        .await;

    let proxy = start_proxy(&upstream.uri(), 10, 5).await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/send/TestChannel")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "text": "from-json", "params": { "parse_mode": "Markdown" } }).to_string(),
        ))
        .unwrap();
    let (status, body) = do_request(&proxy.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "success" }));

    wait_for_stat(&proxy.app, |s| was_send(s) == 1).await;
    proxy.state.channels.deactivate_all().await;
}

// --- S2: retry then succeed ----------------------------------------------

#[tokio::test]
async fn transient_failure_is_retried_until_success() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(
            ResponseTemplate::new(502)
                .insert_header("Retry-After", "0")
                .set_body_json(json!({ "ok": false })),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&upstream)
        .await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(ok_response())
        .expect(1)
        .mount(&upstream)
        .await;

    let proxy = start_proxy(&upstream.uri(), 10, 5).await;

    let (status, _) = send_form(&proxy.app, "TestChannel", "text=persistent").await;
    assert_eq!(status, StatusCode::OK);

    let stat = wait_for_stat(&proxy.app, |s| was_send(s) == 1).await;
    assert_eq!(was_rejected(&stat), 0);

    assert_eq!(upstream.received_requests().await.unwrap().len(), 2);
    proxy.state.channels.deactivate_all().await;
}

// --- S3: exhaust attempts -------------------------------------------------

#[tokio::test]
async fn attempts_are_capped_then_message_is_rejected() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(
            ResponseTemplate::new(502)
                .insert_header("Retry-After", "0")
                .set_body_json(json!({ "ok": false })),
        )
        .expect(2)
        .mount(&upstream)
        .await;

    let proxy = start_proxy(&upstream.uri(), 10, 2).await;

    let (status, _) = send_form(&proxy.app, "TestChannel", "text=doomed").await;
    assert_eq!(status, StatusCode::OK);

    let stat = wait_for_stat(&proxy.app, |s| was_rejected(s) == 1).await;
    assert_eq!(was_send(&stat), 0);
    assert!(
        stat["last_error"]["reason"]
            .as_str()
            .is_some_and(|reason| reason.contains("502")),
        "last_error: {}",
        stat["last_error"]
    );

    assert_eq!(upstream.received_requests().await.unwrap().len(), 2);
    proxy.state.channels.deactivate_all().await;
}

// --- S4: terminal reject --------------------------------------------------

#[tokio::test]
async fn terminal_failure_is_not_retried() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({ "ok": false, "description": "bad" })),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let proxy = start_proxy(&upstream.uri(), 10, 5).await;

    let (status, _) = send_form(&proxy.app, "TestChannel", "text=bad").await;
    assert_eq!(status, StatusCode::OK);

    let stat = wait_for_stat(&proxy.app, |s| was_rejected(s) == 1).await;
    assert_eq!(was_send(&stat), 0);
    assert!(
        stat["last_error"]["reason"]
            .as_str()
            .is_some_and(|reason| reason.contains("bad")),
        "last_error: {}",
        stat["last_error"]
    );

    assert_eq!(upstream.received_requests().await.unwrap().len(), 1);
    proxy.state.channels.deactivate_all().await;
}

// --- S5: queue full -------------------------------------------------------

#[tokio::test]
async fn overflowing_the_queue_answers_503() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(ok_response().set_delay(Duration::from_secs(10)))
        .mount(&upstream)
        .await;

    let proxy = start_proxy(&upstream.uri(), 3, 5).await;

    // First message; wait until the delivery task pulls it so it occupies
    // the in-flight slot, not a queue slot.
    let (status, _) = send_form(&proxy.app, "TestChannel", "text=m0").await;
    assert_eq!(status, StatusCode::OK);
    wait_for_stat(&proxy.app, |s| s["channel_stat"]["in_queue"] == 0).await;

    for text in ["text=m1", "text=m2", "text=m3"] {
        let (status, _) = send_form(&proxy.app, "TestChannel", text).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send_form(&proxy.app, "TestChannel", "text=m4").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        body,
        json!({
            "status": "error",
            "error": "Queue of this channel is full. Try again later",
        })
    );

    proxy.state.channels.deactivate_all().await;
}

// --- S6: validation and maintenance --------------------------------------

#[tokio::test]
async fn unknown_channel_is_rejected() {
    let upstream = MockServer::start().await;
    let proxy = start_proxy(&upstream.uri(), 10, 5).await;

    let (status, body) = send_form(&proxy.app, "NoSuchChannel", "text=hello").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        body,
        json!({ "status": "error", "error": "Unknown channel NoSuchChannel" })
    );

    proxy.state.channels.deactivate_all().await;
}

#[tokio::test]
async fn malformed_channel_name_is_not_routed() {
    let upstream = MockServer::start().await;
    let proxy = start_proxy(&upstream.uri(), 10, 5).await;

    let (status, _) = send_form(&proxy.app, "no", "text=hello").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    proxy.state.channels.deactivate_all().await;
}

#[tokio::test]
async fn empty_message_is_rejected() {
    let upstream = MockServer::start().await;
    let proxy = start_proxy(&upstream.uri(), 10, 5).await;

    let (status, body) = send_form(&proxy.app, "TestChannel", "").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        body,
        json!({ "status": "error", "error": "Message could not empty" })
    );

    proxy.state.channels.deactivate_all().await;
}

#[tokio::test]
async fn inactive_channel_is_temporarily_unavailable() {
    let upstream = MockServer::start().await;
    let proxy = start_proxy(&upstream.uri(), 10, 5).await;
    proxy.state.channels.deactivate_all().await;

    let (status, body) = send_form(&proxy.app, "TestChannel", "text=hello").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        body,
        json!({ "status": "error", "error": "Channel is not available for now" })
    );
}

#[tokio::test]
async fn maintenance_shields_everything_but_ping() {
    let upstream = MockServer::start().await;
    let proxy = start_proxy(&upstream.uri(), 10, 5).await;
    proxy.state.set_maintenance(true);

    let expected = json!({ "status": "error", "error": "Service is temporary unawailable" });

    let (status, body) = send_form(&proxy.app, "TestChannel", "text=hello").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, expected);

    let (status, body) = get_json(&proxy.app, "/api/stat/TestChannel").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, expected);

    let request = Request::builder()
        .method("GET")
        .uri("/api/ping")
        .body(Body::empty())
        .unwrap();
    let response = proxy.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        response.headers().get("Retry-After").unwrap(),
        &DEFAULT_RETRY_AFTER.to_string()
    );
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"FAIL");

    proxy.state.channels.deactivate_all().await;
}

#[tokio::test]
async fn ping_answers_ok_when_serving() {
    let upstream = MockServer::start().await;
    let proxy = start_proxy(&upstream.uri(), 10, 5).await;

    let (status, body) = get_json(&proxy.app, "/api/ping").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("OK".to_string()));

    proxy.state.channels.deactivate_all().await;
}

#[tokio::test]
async fn stat_for_unknown_channel_is_rejected() {
    let upstream = MockServer::start().await;
    let proxy = start_proxy(&upstream.uri(), 10, 5).await;

    let (status, body) = get_json(&proxy.app, "/api/stat/NoSuchChannel").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        body,
        json!({ "status": "error", "error": "Unknown channel NoSuchChannel" })
    );

    proxy.state.channels.deactivate_all().await;
}

// --- FIFO across the whole pipeline --------------------------------------

#[tokio::test]
async fn messages_reach_the_upstream_in_submission_order() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(ok_response())
        .mount(&upstream)
        .await;

    let proxy = start_proxy(&upstream.uri(), 10, 5).await;

    for index in 0..5 {
        let (status, _) = send_form(&proxy.app, "TestChannel", &format!("text=msg-{index}")).await;
        assert_eq!(status, StatusCode::OK);
    }

    wait_for_stat(&proxy.app, |s| was_send(s) == 5).await;

    let bodies: Vec<String> = upstream
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .map(|request| String::from_utf8_lossy(&request.body).into_owned())
        .collect();
    assert_eq!(bodies.len(), 5);
    for (index, body) in bodies.iter().enumerate() {
        assert!(
            body.contains(&format!("text=msg-{index}")),
            "request {index} out of order: {body}"
        );
    }

    proxy.state.channels.deactivate_all().await;
}
