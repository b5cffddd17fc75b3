//! Routing traits and types for dispatching inbound booking traffic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::booking::Step;
use crate::calendar::{CalendarError, CreatedEvent};

fn default_session_id() -> String {
    "default".into()
}

/// One conversational message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub user_input: String,
    #[serde(default = "default_session_id")]
    pub session_id: String,
}

/// A booking submitted with every field at once.
///
/// Fields stay raw so validation failures are reported per field instead of
/// as a deserialization error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectBooking {
    pub name: String,
    pub date: String,
    pub time: String,
    pub duration: i64,
}

/// Everything the router accepts.
#[derive(Debug, Clone)]
pub enum InboundRequest {
    Chat(ChatMessage),
    Book(DirectBooking),
}

/// A conversational reply and where the session stands afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatReply {
    pub session_id: String,
    pub response: String,
    /// Step after this turn; `None` once the session has been finished.
    pub step: Option<Step>,
    pub booked: Option<CreatedEvent>,
}

/// The result of routing one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Reply(ChatReply),
    Booked(CreatedEvent),
    /// The caller's input cannot be used as given.
    Rejected(String),
    /// The calendar refused or could not be reached.
    CalendarFailed {
        message: String,
        error: CalendarError,
    },
    /// The request could not be served right now; nothing was changed.
    Unavailable(String),
    /// The session could not be processed; nothing was changed.
    Failed(String),
}

/// Dispatches inbound requests to the dialogue or the direct booking path.
#[async_trait]
pub trait RequestRouter: Send + Sync {
    async fn route(&self, request: InboundRequest) -> RouteOutcome;

    /// The name of this router implementation.
    fn name(&self) -> &str;
}
