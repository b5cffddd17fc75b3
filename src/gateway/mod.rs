//! HTTP gateway: the chat and booking endpoints plus session inspection.

pub mod api;

use anyhow::{Context, Result};
use axum::{
    http::StatusCode,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer};

use crate::calendar::create_calendar_gateway;
use crate::config::{Config, GatewayConfig};
use crate::routing::{create_router, RequestRouter};
use crate::sessions::{create_session_store, SessionStore};

/// Extra time the transport-level timeout allows past the handler deadline.
/// It only fires when a request stalls outside a handler, e.g. a slow body.
const TRANSPORT_TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<dyn RequestRouter>,
    pub sessions: Arc<dyn SessionStore>,
    pub calendar_name: String,
    pub started_at: Instant,
    /// How long a handler waits for its turn before answering 504.
    /// The turn itself keeps running to completion.
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(
        router: Arc<dyn RequestRouter>,
        sessions: Arc<dyn SessionStore>,
        calendar_name: impl Into<String>,
    ) -> Self {
        Self {
            router,
            sessions,
            calendar_name: calendar_name.into(),
            started_at: Instant::now(),
            request_timeout: Duration::from_secs(GatewayConfig::default().request_timeout_secs),
        }
    }

    #[must_use]
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

/// Routes only; limits are layered on by [`run_gateway`].
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(api::handle_chat))
        .route("/book", post(api::handle_book))
        .route(
            "/sessions/{id}",
            get(api::handle_session_get).delete(api::handle_session_delete),
        )
        .route("/health", get(api::handle_health))
        .with_state(state)
}

/// Body limit, a transport timeout as a backstop, and `{error}` bodies for
/// error responses produced outside the handlers.
pub fn with_limits(app: Router, body_limit_bytes: usize, request_timeout: Duration) -> Router {
    app.layer(RequestBodyLimitLayer::new(body_limit_bytes))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout + TRANSPORT_TIMEOUT_GRACE,
        ))
        .layer(middleware::map_response(api::json_error_body))
}

/// Periodically drop sessions idle past their TTL.
pub fn spawn_session_reaper(
    sessions: Arc<dyn SessionStore>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick fires immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = sessions.purge_expired().await;
            tracing::debug!(purged, active = sessions.len(), "session reaper pass");
        }
    })
}

/// Build every component from config and serve until ctrl-c.
pub async fn run_gateway(config: &Config) -> Result<()> {
    let sessions = create_session_store(&config.sessions);
    let calendar = create_calendar_gateway(&config.calendar)?;
    if !config.calendar.has_calendar_id() {
        tracing::warn!("calendar.calendar_id is not set; bookings will fail until it is configured");
    }
    let calendar_name = calendar.name().to_string();
    let router = create_router(sessions.clone(), calendar);

    let reaper = spawn_session_reaper(
        sessions.clone(),
        Duration::from_secs(config.sessions.reap_interval_secs),
    );

    let request_timeout = Duration::from_secs(config.gateway.request_timeout_secs);
    let state =
        AppState::new(router, sessions, calendar_name).with_request_timeout(request_timeout);
    let app = with_limits(
        build_router(state),
        config.gateway.body_limit_bytes,
        request_timeout,
    );

    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind gateway to {addr}"))?;
    let local = listener.local_addr().context("Failed to read bound address")?;
    tracing::info!(address = %local, timezone = %config.calendar.timezone, "Gateway listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Gateway server failed");
    reaper.abort();
    tracing::info!("Gateway stopped");
    served
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(%error, "Failed to listen for ctrl-c; shutting down");
    }
}
