//! HTTP admission layer.
//!
//! Three endpoints over one [`AppState`]:
//!
//! - `GET /api/ping` — liveness; answers `503 FAIL` with a `Retry-After`
//!   header while the proxy is in maintenance.
//! - `POST /api/send/{channel}` — validate and enqueue one message.
//! - `GET /api/stat/{channel}` — delivery counters and the last recorded
//!   failure of one channel.
//!
//! Every error path funnels through [`ApiError`], which renders the uniform
//! `{"status": "error", "error": ...}` body.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::{FromRequest, Path, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde_json::json;
use tracing::{debug, warn};

use crate::collection::ChannelCollection;
use crate::error::ProxyError;
use crate::message::{Message, MessageFields};

/// `Retry-After` value returned by `/api/ping` during maintenance, seconds.
pub const DEFAULT_RETRY_AFTER: u64 = 120;

/// Shared state behind the admission handlers.
pub struct AppState {
    /// The channel set, built once at startup.
    pub channels: ChannelCollection,
    maintenance: AtomicBool,
    retry_after: u64,
}

impl AppState {
    /// Wrap a collection. The proxy starts in maintenance; call
    /// [`set_maintenance(false)`](Self::set_maintenance) once serving begins.
    pub fn new(channels: ChannelCollection, retry_after: u64) -> Self {
        Self {
            channels,
            maintenance: AtomicBool::new(true),
            retry_after,
        }
    }

    /// Flip the maintenance flag.
    pub fn set_maintenance(&self, on: bool) {
        self.maintenance.store(on, Ordering::Relaxed);
    }

    /// Whether admission is currently shielded.
    pub fn in_maintenance(&self) -> bool {
        self.maintenance.load(Ordering::Relaxed)
    }
}

/// Build the admission router.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/ping", get(ping))
        .route("/api/send/{channel}", post(send_message))
        .route("/api/stat/{channel}", get(channel_stat))
        .with_state(state)
}

/// Error envelope for every admission failure.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn maintenance() -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: "Service is temporary unawailable".to_string(),
        }
    }
}

impl From<ProxyError> for ApiError {
    fn from(err: ProxyError) -> Self {
        let status = match &err {
            ProxyError::RequestParameter(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ProxyError::TemporaryUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "status": "error", "error": self.message }));
        (self.status, body).into_response()
    }
}

/// Channel-name pattern accepted by the send and stat routes: `[\w\-]{4,24}`.
fn is_valid_channel_name(name: &str) -> bool {
    (4..=24).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

async fn ping(State(state): State<Arc<AppState>>) -> Response {
    if state.in_maintenance() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::RETRY_AFTER, state.retry_after.to_string())],
            "FAIL",
        )
            .into_response();
    }

    "OK".into_response()
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(channel): Path<String>,
    request: Request,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.in_maintenance() {
        return Err(ApiError::maintenance());
    }
    if !is_valid_channel_name(&channel) {
        return Err(ApiError {
            status: StatusCode::NOT_FOUND,
            message: "Not found".to_string(),
        });
    }

    debug!(channel = %channel, "send request received");

    let v_channel = state.channels.get(&channel).ok_or_else(|| {
        warn!(channel = %channel, "request to unknown channel");
        ApiError::from(ProxyError::RequestParameter(format!("Unknown channel {channel}")))
    })?;

    if !v_channel.is_running() {
        warn!(channel = %channel, "request to a channel that is not active");
        return Err(ProxyError::TemporaryUnavailable("Channel is not available for now".into()).into());
    }

    let fields = extract_fields(request).await?;
    let message = Message::from_fields(fields, true)?;
    debug!(channel = %channel, id = %message.id, "message accepted");

    v_channel.add_message(message)?;

    Ok(Json(json!({ "status": "success" })))
}

async fn channel_stat(
    State(state): State<Arc<AppState>>,
    Path(channel): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.in_maintenance() {
        return Err(ApiError::maintenance());
    }

    let v_channel = state.channels.get(&channel).ok_or_else(|| {
        ApiError::from(ProxyError::RequestParameter(format!("Unknown channel {channel}")))
    })?;

    let stat = v_channel.get_state();
    Ok(Json(json!({
        "channel_stat": {
            "was_send": stat.sent,
            "was_rejected": stat.rejected,
            "in_queue": stat.in_queue,
        },
        "is_running": v_channel.is_running(),
        "last_error": v_channel.get_last_error(false),
    })))
}

/// Read the request body as form-encoded or JSON message fields.
///
/// An empty body parses to all-absent fields; the emptiness rejection
/// happens in [`Message::from_fields`] so both paths report the same error.
async fn extract_fields(request: Request) -> Result<MessageFields, ApiError> {
    if is_json_request(request.headers()) {
        let Json(fields) = Json::<MessageFields>::from_request(request, &())
            .await
            .map_err(|rejection| ApiError::from(ProxyError::RequestParameter(rejection.body_text())))?;
        Ok(fields)
    } else {
        let Form(fields) = Form::<MessageFields>::from_request(request, &())
            .await
            .map_err(|rejection| ApiError::from(ProxyError::RequestParameter(rejection.body_text())))?;
        Ok(fields)
    }
}

fn is_json_request(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name_pattern() {
        assert!(is_valid_channel_name("Test"));
        assert!(is_valid_channel_name("Test-Channel_01"));
        assert!(is_valid_channel_name("a".repeat(24).as_str()));

        assert!(!is_valid_channel_name("abc"));
        assert!(!is_valid_channel_name("a".repeat(25).as_str()));
        assert!(!is_valid_channel_name("with space"));
        assert!(!is_valid_channel_name("with/slash"));
        assert!(!is_valid_channel_name(""));
    }

    #[test]
    fn test_error_mapping() {
        let cases = [
            (
                ProxyError::RequestParameter("bad".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                ProxyError::TemporaryUnavailable("later".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ProxyError::RequestExecution("broken".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ProxyError::Other("???".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status, expected);
        }
    }

    #[test]
    fn test_maintenance_error_body_text() {
        let err = ApiError::maintenance();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.message, "Service is temporary unawailable");
    }

    #[test]
    fn test_state_starts_in_maintenance() {
        let state = AppState::new(
            crate::collection::ChannelCollection::from_config(
                &Default::default(),
                &crate::collection::QueueRegistry::defaults(),
                &crate::collection::WorkerRegistry::defaults(),
            )
            .unwrap(),
            DEFAULT_RETRY_AFTER,
        );
        assert!(state.in_maintenance());

        state.set_maintenance(false);
        assert!(!state.in_maintenance());
    }
}
