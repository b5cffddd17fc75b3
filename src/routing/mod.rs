//! Request routing: dispatches chat and direct booking requests.

pub mod default;
pub mod traits;

pub use default::BookingRouter;
pub use traits::{
    ChatMessage, ChatReply, DirectBooking, InboundRequest, RequestRouter, RouteOutcome,
};

use crate::calendar::CalendarGateway;
use crate::sessions::SessionStore;
use std::sync::Arc;

/// Create the default router over the given session store and calendar.
pub fn create_router(
    sessions: Arc<dyn SessionStore>,
    calendar: Arc<dyn CalendarGateway>,
) -> Arc<dyn RequestRouter> {
    Arc::new(BookingRouter::new(sessions, calendar))
}
