//! Calendar gateway: turns a completed booking into a remote calendar event.

pub mod auth;
pub mod google;
pub mod traits;

pub use auth::{ServiceAccountKey, ServiceAccountTokenSource, StaticTokenSource};
pub use google::GoogleCalendarGateway;
pub use traits::{CalendarError, CalendarEvent, CalendarGateway, CreatedEvent, EventTime, TokenSource};

use crate::config::CalendarConfig;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

const MAX_ERROR_CHARS: usize = 200;

/// Factory: build the configured calendar gateway.
///
/// Missing credentials or calendar id do not fail here; they surface as
/// [`CalendarError::NotConfigured`] / [`CalendarError::Credentials`] on the first booking.
pub fn create_calendar_gateway(config: &CalendarConfig) -> Result<Arc<dyn CalendarGateway>> {
    let timezone = config.tz()?;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .build()
        .context("Failed to build calendar HTTP client")?;

    let tokens: Arc<dyn TokenSource> = Arc::new(ServiceAccountTokenSource::new(
        config.resolved_credentials_path(),
        client.clone(),
    ));

    let gateway = GoogleCalendarGateway::new(config.calendar_id.clone(), timezone, tokens, client)
        .with_api_base(&config.api_base)
        .with_retries(
            config.max_retries,
            Duration::from_millis(config.retry_backoff_ms),
        );
    Ok(Arc::new(gateway))
}

/// Pull a readable message out of an error body and cap its length.
///
/// Google wraps errors as `{"error": {"message": ...}}` or, from the token
/// endpoint, `{"error": ..., "error_description": ...}`.
pub(crate) fn summarize_error_body(body: &str) -> String {
    let extracted = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            json.pointer("/error/message")
                .or_else(|| json.get("error_description"))
                .or_else(|| json.get("error"))
                .and_then(|v| v.as_str().map(str::to_string))
        })
        .unwrap_or_else(|| body.trim().to_string());

    if extracted.chars().count() <= MAX_ERROR_CHARS {
        return extracted;
    }
    let truncated: String = extracted.chars().take(MAX_ERROR_CHARS).collect();
    format!("{truncated}...")
}
