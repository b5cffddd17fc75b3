//! Calendar gateway traits and wire types.

use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::booking::BookingRequest;

/// Local timestamp format sent to the calendar API alongside an explicit zone.
pub const EVENT_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Failure talking to the calendar service, classified for retry decisions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CalendarError {
    #[error("calendar is not configured: {0}")]
    NotConfigured(String),
    #[error("failed to load calendar credentials: {0}")]
    Credentials(String),
    #[error("calendar authentication failed ({status}): {message}")]
    Auth { status: u16, message: String },
    #[error("calendar API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("calendar request timed out")]
    Timeout,
    #[error("calendar request failed: {0}")]
    Transport(String),
    #[error("unexpected calendar response: {0}")]
    MalformedResponse(String),
    #[error("{time} does not exist in {zone}")]
    NonexistentLocalTime { time: String, zone: String },
}

impl CalendarError {
    /// Transient failures may succeed on retry; permanent ones will not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) => true,
            Self::Auth { status, .. } | Self::Api { status, .. } => {
                *status == 429 || (500..600).contains(status)
            }
            Self::NotConfigured(_)
            | Self::Credentials(_)
            | Self::MalformedResponse(_)
            | Self::NonexistentLocalTime { .. } => false,
        }
    }

    pub(crate) fn from_reqwest(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_decode() {
            Self::MalformedResponse(error.to_string())
        } else {
            Self::Transport(error.to_string())
        }
    }
}

/// Start or end of an event: wall-clock time plus the IANA zone it is in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTime {
    #[serde(rename = "dateTime")]
    pub date_time: String,
    #[serde(rename = "timeZone")]
    pub time_zone: String,
}

/// Event insert payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub summary: String,
    pub start: EventTime,
    pub end: EventTime,
}

impl CalendarEvent {
    /// Derive the event for a booking: `end = start + duration`, both in `zone`.
    pub fn for_booking(request: &BookingRequest, zone: Tz) -> Result<Self, CalendarError> {
        let start = NaiveDateTime::new(request.date, request.time);
        if zone.from_local_datetime(&start).earliest().is_none() {
            return Err(CalendarError::NonexistentLocalTime {
                time: start.format(EVENT_DATETIME_FORMAT).to_string(),
                zone: zone.name().to_string(),
            });
        }
        let end = start + Duration::minutes(i64::from(request.duration_minutes));

        let at = |moment: NaiveDateTime| EventTime {
            date_time: moment.format(EVENT_DATETIME_FORMAT).to_string(),
            time_zone: zone.name().to_string(),
        };

        Ok(Self {
            id: None,
            summary: request.name.clone(),
            start: at(start),
            end: at(end),
        })
    }
}

/// A created event as reported by the calendar service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedEvent {
    pub event_id: Option<String>,
    pub link: Option<String>,
}

/// Boundary to the external calendar. Implementations never panic on remote
/// failure; everything comes back as a [`CalendarError`].
#[async_trait]
pub trait CalendarGateway: Send + Sync {
    async fn create_event(&self, request: &BookingRequest) -> Result<CreatedEvent, CalendarError>;

    /// Zone every event is created in.
    fn timezone(&self) -> Tz;

    fn name(&self) -> &str;
}

/// Source of bearer tokens for the calendar API.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, CalendarError>;
    fn name(&self) -> &str;
}
