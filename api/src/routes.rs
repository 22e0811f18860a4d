use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use frame_describe_common::protocol::{
    error_code, DescribeRequest, DescribeResponse, ErrorResponse, DESCRIBE_PATH,
};
use frame_describe_common::snapshot::{EncodedSnapshot, JPEG_MIME};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::orchestrator::{DescribeError, DescriptionOrchestrator};
use crate::slot::sniff_mime;

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub orchestrator: DescriptionOrchestrator,
}

pub fn router(state: Arc<AppState>, body_limit: usize) -> Router {
    Router::new()
        .route(DESCRIBE_PATH, post(describe).fallback(method_not_allowed))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Largest request body accepted for a snapshot ceiling of `max_snapshot_kb`:
/// the base64 expansion of the ceiling plus room for the JSON envelope.
pub fn body_limit(max_snapshot_kb: f64) -> usize {
    (max_snapshot_kb * 1024.0 * 4.0 / 3.0).ceil() as usize + 4096
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /describe
/// Body: { "imageData": "<base64>" }
async fn describe(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<DescribeRequest>, JsonRejection>,
) -> Response {
    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) => return reject_body(rejection),
    };

    let snapshot = match EncodedSnapshot::from_base64(&body.image_data, JPEG_MIME) {
        Ok(s) => {
            let mime = sniff_mime(s.bytes());
            EncodedSnapshot::new(s.into_bytes(), mime)
        }
        Err(e) => {
            warn!(error = %e, "rejecting undecodable image payload");
            return error_response(StatusCode::BAD_REQUEST, error_code::INVALID_IMAGE_DATA);
        }
    };

    match state.orchestrator.describe(snapshot).await {
        Ok(description) => Json(DescribeResponse { description }).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Malformed or oversized request bodies, answered in the usual error shape.
fn reject_body(rejection: JsonRejection) -> Response {
    let status = rejection.status();
    warn!(%status, reason = rejection.body_text(), "rejecting describe body");
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        return error_response(status, error_code::PAYLOAD_TOO_LARGE);
    }
    error_response(StatusCode::BAD_REQUEST, error_code::INVALID_IMAGE_DATA)
}

/// Any other method on /describe.
async fn method_not_allowed(method: Method) -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, "POST")],
        format!("Method {method} Not Allowed"),
    )
        .into_response()
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

impl IntoResponse for DescribeError {
    fn into_response(self) -> Response {
        // Details stay in the log; callers get a stable code.
        error!(error = %self, "describe failed");
        let code = match self {
            DescribeError::NoChoices => error_code::NO_CHOICES,
            DescribeError::Upstream(_) => error_code::UPSTREAM_ERROR,
            DescribeError::Timeout(_) => error_code::INFERENCE_TIMEOUT,
        };
        error_response(StatusCode::INTERNAL_SERVER_ERROR, code)
    }
}

fn error_response(status: StatusCode, code: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: code.to_string(),
        }),
    )
        .into_response()
}
