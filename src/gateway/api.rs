//! REST handlers.
//!
//! Every response is JSON: the success payload, or `{"error": ...}`.

use super::AppState;
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;

use crate::booking::dialogue::GENERIC_FAILURE;
use crate::routing::{ChatMessage, DirectBooking, InboundRequest, RouteOutcome};
use crate::sessions::SessionError;

pub const STILL_PROCESSING: &str = "The calendar is slow to respond. Your booking is still being \
processed; check your calendar before trying again.";

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn rejection_response(rejection: &JsonRejection) -> Response {
    error_response(
        StatusCode::BAD_REQUEST,
        format!("Invalid request body: {}", rejection.body_text()),
    )
}

/// Map failure outcomes shared by both endpoints; successes are the caller's job.
fn failure_response(outcome: RouteOutcome) -> Response {
    match outcome {
        RouteOutcome::Rejected(message) => error_response(StatusCode::BAD_REQUEST, message),
        RouteOutcome::CalendarFailed { message, error } => {
            tracing::warn!(%error, transient = error.is_transient(), "booking failed upstream");
            error_response(StatusCode::BAD_GATEWAY, message)
        }
        RouteOutcome::Unavailable(message) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, message)
        }
        RouteOutcome::Failed(message) => error_response(StatusCode::INTERNAL_SERVER_ERROR, message),
        RouteOutcome::Reply(reply) => Json(json!({ "response": reply.response })).into_response(),
        RouteOutcome::Booked(created) => {
            Json(json!({ "message": "Booked!", "link": created.link })).into_response()
        }
    }
}

/// Run the turn on its own task so it always completes, session update
/// included, even once the handler has stopped waiting for it.
async fn route_with_deadline(
    state: &AppState,
    request: InboundRequest,
) -> Result<RouteOutcome, Response> {
    let router = state.router.clone();
    let turn = tokio::spawn(async move { router.route(request).await });

    match tokio::time::timeout(state.request_timeout, turn).await {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(error)) => {
            tracing::error!(%error, "request task failed");
            Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, GENERIC_FAILURE))
        }
        Err(_) => {
            tracing::warn!(
                timeout_ms = state.request_timeout.as_millis(),
                "request deadline passed; turn continues in the background"
            );
            Err(error_response(StatusCode::GATEWAY_TIMEOUT, STILL_PROCESSING))
        }
    }
}

/// Give bodiless error responses from outside the handlers (timeouts,
/// unknown routes, oversized bodies) the usual `{"error": ...}` shape.
pub async fn json_error_body(response: Response) -> Response {
    let status = response.status();
    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"));
    if is_json || !(status.is_client_error() || status.is_server_error()) {
        return response;
    }

    let message = status.canonical_reason().unwrap_or("Request failed");
    let (mut parts, _) = response.into_parts();
    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    Response::from_parts(parts, Body::from(json!({ "error": message }).to_string()))
}

// ── Handlers ────────────────────────────────────────────────────

/// POST /chat: one conversational turn
pub async fn handle_chat(
    State(state): State<AppState>,
    body: Result<Json<ChatMessage>, JsonRejection>,
) -> Response {
    let Json(message) = match body {
        Ok(body) => body,
        Err(rejection) => return rejection_response(&rejection),
    };

    let outcome = match route_with_deadline(&state, InboundRequest::Chat(message)).await {
        Ok(outcome) => outcome,
        Err(response) => return response,
    };
    match outcome {
        RouteOutcome::Reply(reply) => Json(json!({
            "response": reply.response,
            "session_id": reply.session_id,
            "step": reply.step,
        }))
        .into_response(),
        other => failure_response(other),
    }
}

/// POST /book: single-shot booking with every field supplied
pub async fn handle_book(
    State(state): State<AppState>,
    body: Result<Json<DirectBooking>, JsonRejection>,
) -> Response {
    let Json(booking) = match body {
        Ok(body) => body,
        Err(rejection) => return rejection_response(&rejection),
    };

    let outcome = match route_with_deadline(&state, InboundRequest::Book(booking)).await {
        Ok(outcome) => outcome,
        Err(response) => return response,
    };
    match outcome {
        RouteOutcome::Booked(created) => Json(json!({
            "message": "Booked!",
            "link": created.link,
            "event_id": created.event_id,
        }))
        .into_response(),
        other => failure_response(other),
    }
}

/// GET /sessions/{id}: current state of an in-progress booking
pub async fn handle_session_get(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.sessions.snapshot(&session_id).await {
        Ok(Some(snapshot)) => Json(snapshot).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("No session '{session_id}'")),
        Err(error @ SessionError::Busy(_)) => error_response(StatusCode::CONFLICT, error.to_string()),
        Err(error) => error_response(StatusCode::SERVICE_UNAVAILABLE, error.to_string()),
    }
}

/// DELETE /sessions/{id}: drop an in-progress booking
pub async fn handle_session_delete(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let cleared = state.sessions.clear(&session_id).await;
    tracing::info!(session_id = %session_id, cleared, "session cleared via API");
    Json(json!({ "status": "ok", "cleared": cleared })).into_response()
}

/// GET /health
pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "sessions": state.sessions.len(),
        "session_store": state.sessions.name(),
        "calendar": state.calendar_name,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}
