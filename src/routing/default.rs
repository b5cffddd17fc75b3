//! Default router: chat goes through the session dialogue, direct bookings
//! straight to the calendar.

use async_trait::async_trait;
use std::sync::Arc;

use super::traits::{ChatMessage, ChatReply, DirectBooking, InboundRequest, RequestRouter, RouteOutcome};
use crate::booking::dialogue::GENERIC_FAILURE;
use crate::booking::{
    parse_utterance, BookingRequest, DialogueEngine, ParseError, Step, Turn, TurnKind,
    EXAMPLE_UTTERANCE,
};
use crate::calendar::CalendarGateway;
use crate::sessions::{SessionError, SessionGuard, SessionStore};

pub struct BookingRouter {
    sessions: Arc<dyn SessionStore>,
    calendar: Arc<dyn CalendarGateway>,
    engine: DialogueEngine,
}

impl BookingRouter {
    pub fn new(sessions: Arc<dyn SessionStore>, calendar: Arc<dyn CalendarGateway>) -> Self {
        Self {
            engine: DialogueEngine::new(calendar.clone()),
            sessions,
            calendar,
        }
    }

    async fn chat(&self, message: ChatMessage) -> RouteOutcome {
        let mut guard = match self.sessions.get_or_create(message.session_id.trim()).await {
            Ok(guard) => guard,
            Err(error @ SessionError::EmptyId) => return RouteOutcome::Rejected(error.to_string()),
            Err(error) => {
                tracing::warn!(%error, session_id = %message.session_id, "session unavailable");
                return RouteOutcome::Unavailable(GENERIC_FAILURE.into());
            }
        };

        // A fresh session may carry the whole booking in its first message.
        let turn = if guard.step == Step::Greeting && guard.slots.is_empty() {
            match parse_utterance(&message.user_input) {
                Ok(request) => self.engine.book_parsed(&mut guard, &request).await,
                Err(ParseError::InvalidSlot(error)) => Turn {
                    reply: format!("Sorry, {error}. Try something like: \"{EXAMPLE_UTTERANCE}\"."),
                    kind: TurnKind::Reprompt(error),
                },
                Err(ParseError::NotFound(_)) => {
                    self.engine.advance(&mut guard, &message.user_input).await
                }
            }
        } else {
            self.engine.advance(&mut guard, &message.user_input).await
        };

        tracing::debug!(
            session_id = %guard.session_id,
            step = ?guard.step,
            kind = ?turn.kind,
            "chat turn handled"
        );
        self.complete_turn(guard, turn).await
    }

    async fn complete_turn(&self, guard: SessionGuard, turn: Turn) -> RouteOutcome {
        let session_id = guard.session_id.clone();
        let step = if turn.ends_session() {
            self.sessions.finish(guard).await;
            None
        } else {
            Some(guard.step)
        };

        match turn.kind {
            TurnKind::BookingFailed(error) => RouteOutcome::CalendarFailed {
                message: turn.reply,
                error,
            },
            TurnKind::Failed => RouteOutcome::Failed(turn.reply),
            TurnKind::Booked(created) => RouteOutcome::Reply(ChatReply {
                session_id,
                response: turn.reply,
                step,
                booked: Some(created),
            }),
            _ => RouteOutcome::Reply(ChatReply {
                session_id,
                response: turn.reply,
                step,
                booked: None,
            }),
        }
    }

    async fn book(&self, booking: DirectBooking) -> RouteOutcome {
        let request = match BookingRequest::from_raw(
            &booking.name,
            &booking.date,
            &booking.time,
            &booking.duration.to_string(),
        ) {
            Ok(request) => request,
            Err(error) => return RouteOutcome::Rejected(error.to_string()),
        };

        match self.calendar.create_event(&request).await {
            Ok(created) => RouteOutcome::Booked(created),
            Err(error) => RouteOutcome::CalendarFailed {
                message: error.to_string(),
                error,
            },
        }
    }
}

#[async_trait]
impl RequestRouter for BookingRouter {
    async fn route(&self, request: InboundRequest) -> RouteOutcome {
        match request {
            InboundRequest::Chat(message) => self.chat(message).await,
            InboundRequest::Book(booking) => self.book(booking).await,
        }
    }

    fn name(&self) -> &str {
        "booking"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::dialogue::{ASK_NAME, GREETING};
    use crate::calendar::{CalendarError, CreatedEvent};
    use crate::sessions::InMemorySessionStore;
    use chrono_tz::Tz;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct MockCalendar {
        calls: Mutex<Vec<BookingRequest>>,
        fail: Mutex<Option<CalendarError>>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl CalendarGateway for MockCalendar {
        async fn create_event(
            &self,
            request: &BookingRequest,
        ) -> Result<CreatedEvent, CalendarError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.calls.lock().push(request.clone());
            if let Some(error) = self.fail.lock().clone() {
                return Err(error);
            }
            Ok(CreatedEvent {
                event_id: Some("evt".into()),
                link: Some("https://calendar.example/evt".into()),
            })
        }

        fn timezone(&self) -> Tz {
            chrono_tz::Asia::Kolkata
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    fn router_with(calendar: MockCalendar) -> (Arc<MockCalendar>, Arc<InMemorySessionStore>, BookingRouter) {
        let calendar = Arc::new(calendar);
        let sessions = Arc::new(InMemorySessionStore::default());
        let router = BookingRouter::new(sessions.clone(), calendar.clone());
        (calendar, sessions, router)
    }

    fn chat(session_id: &str, input: &str) -> InboundRequest {
        InboundRequest::Chat(ChatMessage {
            user_input: input.into(),
            session_id: session_id.into(),
        })
    }

    fn reply(outcome: RouteOutcome) -> ChatReply {
        match outcome {
            RouteOutcome::Reply(reply) => reply,
            other => panic!("expected reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dialogue_flow_books_and_clears_session() {
        let (calendar, sessions, router) = router_with(MockCalendar::default());

        assert_eq!(reply(router.route(chat("s1", "hi")).await).response, GREETING);
        assert_eq!(reply(router.route(chat("s1", "yes")).await).response, ASK_NAME);
        for input in ["Abhi", "2025-07-03", "15:00"] {
            router.route(chat("s1", input)).await;
        }
        let done = reply(router.route(chat("s1", "30")).await);

        assert!(done.booked.is_some());
        assert_eq!(done.step, None);
        assert!(done.response.contains("https://calendar.example/evt"));
        assert_eq!(calendar.calls.lock().len(), 1);
        assert!(sessions.snapshot("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn first_message_with_full_details_books_directly() {
        let (calendar, sessions, router) = router_with(MockCalendar::default());

        let done = reply(router.route(chat("s1", EXAMPLE_UTTERANCE)).await);
        assert!(done.booked.is_some());
        assert!(done.response.contains("Abhi"));

        let calls = calendar.calls.lock().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].duration_minutes, 30);
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn first_message_with_bad_field_asks_for_clarification() {
        let (calendar, sessions, router) = router_with(MockCalendar::default());

        let out = reply(
            router
                .route(chat("s1", "Book a meeting with Abhi on 2025-02-30 at 15:00 for 30 minutes"))
                .await,
        );
        assert!(out.response.contains(EXAMPLE_UTTERANCE));
        assert_eq!(out.step, Some(Step::Greeting));
        assert!(calendar.calls.lock().is_empty());

        let state = sessions.snapshot("s1").await.unwrap().unwrap();
        assert!(state.slots.is_empty());
    }

    #[tokio::test]
    async fn calendar_failure_preserves_session_for_retry() {
        let (calendar, sessions, router) = router_with(MockCalendar::default());
        *calendar.fail.lock() = Some(CalendarError::Timeout);

        let out = router.route(chat("s1", EXAMPLE_UTTERANCE)).await;
        match out {
            RouteOutcome::CalendarFailed { message, error } => {
                assert_eq!(error, CalendarError::Timeout);
                assert!(message.contains("retry"));
            }
            other => panic!("expected calendar failure, got {other:?}"),
        }
        let state = sessions.snapshot("s1").await.unwrap().unwrap();
        assert_eq!(state.step, Step::CollectDuration);
        assert!(state.slots.complete().is_some());

        *calendar.fail.lock() = None;
        let done = reply(router.route(chat("s1", "retry")).await);
        assert!(done.booked.is_some());
        assert_eq!(calendar.calls.lock().len(), 2);
        assert!(sessions.snapshot("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_final_answers_create_one_event() {
        let (calendar, _, router) = router_with(MockCalendar {
            delay: Some(Duration::from_millis(30)),
            ..MockCalendar::default()
        });
        let router = Arc::new(router);
        for input in ["hi", "yes", "Abhi", "2025-07-03", "15:00"] {
            router.route(chat("s1", input)).await;
        }

        let a = tokio::spawn({
            let router = router.clone();
            async move { router.route(chat("s1", "30")).await }
        });
        let b = tokio::spawn({
            let router = router.clone();
            async move { router.route(chat("s1", "30")).await }
        });
        let outcomes = [reply(a.await.unwrap()), reply(b.await.unwrap())];

        assert_eq!(calendar.calls.lock().len(), 1);
        assert_eq!(outcomes.iter().filter(|r| r.booked.is_some()).count(), 1);
        assert!(outcomes.iter().any(|r| r.response == GREETING));
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let (_, sessions, router) = router_with(MockCalendar::default());
        router.route(chat("alice", "hi")).await;
        router.route(chat("alice", "yes")).await;
        router.route(chat("bob", "hi")).await;

        assert_eq!(sessions.snapshot("alice").await.unwrap().unwrap().step, Step::CollectName);
        assert_eq!(sessions.snapshot("bob").await.unwrap().unwrap().step, Step::Confirm);
    }

    #[tokio::test]
    async fn empty_session_id_is_rejected() {
        let (_, _, router) = router_with(MockCalendar::default());
        assert!(matches!(
            router.route(chat("   ", "hi")).await,
            RouteOutcome::Rejected(_)
        ));
    }

    #[tokio::test]
    async fn full_store_reports_unavailable() {
        let calendar = Arc::new(MockCalendar::default());
        let sessions = Arc::new(InMemorySessionStore::new(Duration::from_secs(60), 1));
        let router = BookingRouter::new(sessions.clone(), calendar);
        let _held = sessions.get_or_create("busy").await.unwrap();

        assert_eq!(
            router.route(chat("other", "hi")).await,
            RouteOutcome::Unavailable(GENERIC_FAILURE.into())
        );
    }

    #[tokio::test]
    async fn direct_booking_validates_then_creates() {
        let (calendar, _, router) = router_with(MockCalendar::default());
        let booking = |date: &str, time: &str, duration: i64| {
            InboundRequest::Book(DirectBooking {
                name: "Abhi".into(),
                date: date.into(),
                time: time.into(),
                duration,
            })
        };

        assert!(matches!(
            router.route(booking("07/03/2025", "15:00", 30)).await,
            RouteOutcome::Rejected(_)
        ));
        assert!(matches!(
            router.route(booking("2025-07-03", "3pm", 30)).await,
            RouteOutcome::Rejected(_)
        ));
        assert!(matches!(
            router.route(booking("2025-07-03", "15:00", -5)).await,
            RouteOutcome::Rejected(_)
        ));
        assert!(calendar.calls.lock().is_empty());

        match router.route(booking("2025-07-03", "15:00", 30)).await {
            RouteOutcome::Booked(created) => {
                assert_eq!(created.link.as_deref(), Some("https://calendar.example/evt"));
            }
            other => panic!("expected booking, got {other:?}"),
        }

        *calendar.fail.lock() = Some(CalendarError::NotConfigured("no calendar".into()));
        assert!(matches!(
            router.route(booking("2025-07-03", "15:00", 30)).await,
            RouteOutcome::CalendarFailed { .. }
        ));
    }
}
