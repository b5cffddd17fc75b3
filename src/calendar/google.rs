//! Google Calendar v3 `events.insert` gateway.

use async_trait::async_trait;
use chrono_tz::Tz;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use super::traits::{CalendarError, CalendarEvent, CalendarGateway, CreatedEvent, TokenSource};
use crate::booking::BookingRequest;

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

#[derive(Debug, Deserialize)]
struct InsertedEvent {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "htmlLink", default)]
    html_link: Option<String>,
}

/// Creates events on one configured calendar, in one configured zone.
pub struct GoogleCalendarGateway {
    calendar_id: Option<String>,
    timezone: Tz,
    api_base: String,
    tokens: Arc<dyn TokenSource>,
    client: reqwest::Client,
    max_retries: u32,
    retry_backoff: Duration,
}

impl GoogleCalendarGateway {
    pub fn new(
        calendar_id: Option<String>,
        timezone: Tz,
        tokens: Arc<dyn TokenSource>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            calendar_id: calendar_id.filter(|id| !id.trim().is_empty()),
            timezone,
            api_base: DEFAULT_API_BASE.to_string(),
            tokens,
            client,
            max_retries: 1,
            retry_backoff: Duration::from_millis(500),
        }
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_retries(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff = backoff;
        self
    }

    fn events_url(&self, calendar_id: &str) -> String {
        format!(
            "{}/calendars/{}/events",
            self.api_base,
            urlencoding::encode(calendar_id)
        )
    }

    async fn insert_once(
        &self,
        calendar_id: &str,
        event: &CalendarEvent,
        is_retry: bool,
    ) -> Result<CreatedEvent, CalendarError> {
        let token = self.tokens.access_token().await?;
        let response = self
            .client
            .post(self.events_url(calendar_id))
            .bearer_auth(token)
            .json(event)
            .send()
            .await
            .map_err(|e| CalendarError::from_reqwest(&e))?;

        let status = response.status();
        // A retried insert that conflicts on our own event id means the first attempt landed.
        if is_retry && status == reqwest::StatusCode::CONFLICT {
            tracing::info!(event_id = ?event.id, "event already created by an earlier attempt");
            return Ok(CreatedEvent {
                event_id: event.id.clone(),
                link: None,
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = super::summarize_error_body(&body);
            return Err(match status.as_u16() {
                401 | 403 => CalendarError::Auth {
                    status: status.as_u16(),
                    message,
                },
                code => CalendarError::Api {
                    status: code,
                    message,
                },
            });
        }

        let inserted: InsertedEvent = response
            .json()
            .await
            .map_err(|e| CalendarError::MalformedResponse(e.to_string()))?;
        Ok(CreatedEvent {
            event_id: inserted.id.or_else(|| event.id.clone()),
            link: inserted.html_link,
        })
    }
}

#[async_trait]
impl CalendarGateway for GoogleCalendarGateway {
    async fn create_event(&self, request: &BookingRequest) -> Result<CreatedEvent, CalendarError> {
        let calendar_id = self.calendar_id.as_deref().ok_or_else(|| {
            CalendarError::NotConfigured(
                "calendar.calendar_id is empty; set it in config.toml or GOOGLE_CALENDAR_ID".into(),
            )
        })?;

        let mut event = CalendarEvent::for_booking(request, self.timezone)?;
        // Client-chosen id keeps retries from creating duplicates.
        event.id = Some(uuid::Uuid::new_v4().simple().to_string());

        let mut attempt = 0;
        loop {
            match self.insert_once(calendar_id, &event, attempt > 0).await {
                Ok(created) => {
                    tracing::info!(
                        event_id = ?created.event_id,
                        summary = %event.summary,
                        start = %event.start.date_time,
                        attempts = attempt + 1,
                        "calendar event created"
                    );
                    return Ok(created);
                }
                Err(error) if error.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(%error, attempt, "transient calendar failure, retrying");
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(error) => {
                    tracing::warn!(%error, transient = error.is_transient(), "calendar event creation failed");
                    return Err(error);
                }
            }
        }
    }

    fn timezone(&self) -> Tz {
        self.timezone
    }

    fn name(&self) -> &str {
        "google"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::auth::StaticTokenSource;
    use axum::{
        extract::{Path, State},
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        routing::post,
        Json, Router,
    };
    use chrono::{NaiveDate, NaiveTime};
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    #[derive(Clone, Default)]
    struct MockCalendar {
        scripted: Arc<Mutex<VecDeque<StatusCode>>>,
        received: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
        auth_headers: Arc<Mutex<Vec<String>>>,
    }

    async fn insert_handler(
        State(mock): State<MockCalendar>,
        Path(calendar_id): Path<String>,
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> axum::response::Response {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        mock.auth_headers.lock().push(auth);
        mock.received.lock().push((calendar_id, body.clone()));

        let status = mock.scripted.lock().pop_front().unwrap_or(StatusCode::OK);
        if status.is_success() {
            Json(serde_json::json!({
                "id": body["id"],
                "htmlLink": "https://calendar.example/event?eid=abc",
            }))
            .into_response()
        } else {
            (
                status,
                Json(serde_json::json!({"error": {"code": status.as_u16(), "message": "scripted failure"}})),
            )
                .into_response()
        }
    }

    async fn spawn_mock(mock: MockCalendar) -> String {
        let app = Router::new()
            .route("/calendars/{calendar_id}/events", post(insert_handler))
            .with_state(mock);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn request() -> BookingRequest {
        BookingRequest {
            name: "Abhi".into(),
            date: NaiveDate::from_ymd_opt(2025, 7, 3).unwrap(),
            time: NaiveTime::from_hms_opt(15, 0, 0).unwrap(),
            duration_minutes: 30,
        }
    }

    fn gateway(base: &str, calendar_id: Option<&str>) -> GoogleCalendarGateway {
        GoogleCalendarGateway::new(
            calendar_id.map(str::to_string),
            chrono_tz::Asia::Kolkata,
            Arc::new(StaticTokenSource::new("test-token")),
            reqwest::Client::new(),
        )
        .with_api_base(base)
        .with_retries(1, Duration::from_millis(1))
    }

    #[test]
    fn calendar_id_is_path_encoded() {
        let gw = gateway("http://calendar.test", Some("team@example.com"));
        assert_eq!(
            gw.events_url("team@example.com"),
            "http://calendar.test/calendars/team%40example.com/events"
        );
        assert_eq!(
            gw.events_url("primary"),
            "http://calendar.test/calendars/primary/events"
        );
    }

    #[tokio::test]
    async fn inserts_event_and_returns_link() {
        let mock = MockCalendar::default();
        let base = spawn_mock(mock.clone()).await;
        let gw = gateway(&base, Some("team@example.com"));

        let created = gw.create_event(&request()).await.unwrap();
        assert_eq!(created.link.as_deref(), Some("https://calendar.example/event?eid=abc"));
        assert!(created.event_id.is_some());

        let received = mock.received.lock().clone();
        assert_eq!(received.len(), 1);
        let (calendar_id, body) = &received[0];
        assert_eq!(calendar_id, "team@example.com");
        assert_eq!(body["summary"], "Abhi");
        assert_eq!(body["start"]["dateTime"], "2025-07-03T15:00:00");
        assert_eq!(body["end"]["dateTime"], "2025-07-03T15:30:00");
        assert_eq!(body["end"]["timeZone"], "Asia/Kolkata");
        assert_eq!(mock.auth_headers.lock()[0], "Bearer test-token");
    }

    #[tokio::test]
    async fn retries_transient_failure_once() {
        let mock = MockCalendar::default();
        mock.scripted.lock().push_back(StatusCode::SERVICE_UNAVAILABLE);
        let base = spawn_mock(mock.clone()).await;

        let created = gateway(&base, Some("primary")).create_event(&request()).await.unwrap();
        assert!(created.link.is_some());

        let received = mock.received.lock().clone();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].1["id"], received[1].1["id"]);
    }

    #[tokio::test]
    async fn conflict_on_retry_counts_as_created() {
        let mock = MockCalendar::default();
        mock.scripted
            .lock()
            .extend([StatusCode::BAD_GATEWAY, StatusCode::CONFLICT]);
        let base = spawn_mock(mock.clone()).await;

        let created = gateway(&base, Some("primary")).create_event(&request()).await.unwrap();
        assert!(created.event_id.is_some());
        assert!(created.link.is_none());
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let mock = MockCalendar::default();
        mock.scripted.lock().push_back(StatusCode::FORBIDDEN);
        let base = spawn_mock(mock.clone()).await;

        let err = gateway(&base, Some("primary")).create_event(&request()).await.unwrap_err();
        assert!(matches!(err, CalendarError::Auth { status: 403, .. }));
        assert!(err.to_string().contains("scripted failure"));
        assert_eq!(mock.received.lock().len(), 1);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let mock = MockCalendar::default();
        mock.scripted.lock().extend([
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::INTERNAL_SERVER_ERROR,
        ]);
        let base = spawn_mock(mock.clone()).await;

        let err = gateway(&base, Some("primary")).create_event(&request()).await.unwrap_err();
        assert!(matches!(err, CalendarError::Api { status: 500, .. }));
        assert_eq!(mock.received.lock().len(), 2);
    }

    #[tokio::test]
    async fn missing_calendar_id_is_not_configured() {
        let gw = gateway("http://127.0.0.1:9", Some("  "));
        let err = gw.create_event(&request()).await.unwrap_err();
        assert!(matches!(err, CalendarError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn unreachable_service_is_transient() {
        let gw = gateway("http://127.0.0.1:9", Some("primary")).with_retries(0, Duration::ZERO);
        let err = gw.create_event(&request()).await.unwrap_err();
        assert!(err.is_transient(), "{err:?}");
    }
}
