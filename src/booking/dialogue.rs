//! Slot-filling dialogue: greeting → confirm → name → date → time → duration.
//!
//! Each turn validates the answer for the current step. Invalid answers
//! re-prompt at the same step and leave the session untouched. The calendar is
//! called exactly once per successful duration answer (or explicit `retry`).

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use super::slots::{
    parse_date, parse_duration, parse_name, parse_time, BookingRequest, BookingSlots, SlotError,
};
use crate::calendar::{CalendarError, CalendarGateway, CreatedEvent};
use crate::sessions::SessionState;

const AFFIRMATIVE: &[&str] = &["yes", "y", "yeah", "yep", "sure", "ok", "okay", "please"];
/// Any of these vetoes an affirmative word in the same reply ("not sure").
const NEGATIVE: &[&str] = &["no", "not", "nope", "nah", "never", "don't", "dont"];
const CANCEL: &[&str] = &["cancel", "/cancel", "stop", "quit"];
const RETRY: &[&str] = &["retry", "/retry", "try again"];

pub const GREETING: &str =
    "Hi! I can book a meeting on your calendar. Would you like to book one now? (yes/no)";
pub const ASK_NAME: &str = "Great! Who is the meeting with?";
pub const DECLINED: &str = "No problem. Message me whenever you want to book a meeting.";
pub const CANCELLED: &str = "Okay, I've cancelled this booking. Message me to start a new one.";
pub const ASK_TIME: &str = "What time does it start? Please use 24-hour HH:MM, e.g. 15:00.";
pub const ASK_DURATION: &str = "How long is the meeting, in minutes?";
pub const GENERIC_FAILURE: &str = "Sorry, something went wrong. Please try again.";

/// Position in the booking conversation. Serialized as its step number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Step {
    #[default]
    Greeting = 0,
    Confirm = 1,
    CollectName = 2,
    CollectDate = 3,
    CollectTime = 4,
    CollectDuration = 5,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("step {0} is outside 0..=5")]
pub struct InvalidStep(pub u8);

impl TryFrom<u8> for Step {
    type Error = InvalidStep;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Self::Greeting),
            1 => Ok(Self::Confirm),
            2 => Ok(Self::CollectName),
            3 => Ok(Self::CollectDate),
            4 => Ok(Self::CollectTime),
            5 => Ok(Self::CollectDuration),
            other => Err(InvalidStep(other)),
        }
    }
}

impl From<Step> for u8 {
    fn from(step: Step) -> Self {
        step as u8
    }
}

/// What a single turn did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnKind {
    /// Advanced to the next step.
    Advanced,
    /// Answer rejected; still at the same step.
    Reprompt(SlotError),
    Booked(CreatedEvent),
    /// Calendar failed; slots are kept so the user can retry.
    BookingFailed(CalendarError),
    Declined,
    Cancelled,
    /// The turn could not be processed; nothing was changed.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub reply: String,
    pub kind: TurnKind,
}

impl Turn {
    fn new(reply: impl Into<String>, kind: TurnKind) -> Self {
        Self {
            reply: reply.into(),
            kind,
        }
    }

    /// Whether the session should be removed after this turn.
    pub fn ends_session(&self) -> bool {
        matches!(
            self.kind,
            TurnKind::Booked(_) | TurnKind::Declined | TurnKind::Cancelled
        )
    }
}

fn words(input: &str) -> impl Iterator<Item = String> + '_ {
    input
        .split(|c: char| !(c.is_alphanumeric() || c == '/' || c == '\''))
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

pub fn is_affirmative(input: &str) -> bool {
    let mut affirmative = false;
    for word in words(input) {
        if NEGATIVE.contains(&word.as_str()) {
            return false;
        }
        affirmative |= AFFIRMATIVE.contains(&word.as_str());
    }
    affirmative
}

fn is_cancel(input: &str) -> bool {
    CANCEL.contains(&input.trim().to_lowercase().as_str())
}

fn is_retry(input: &str) -> bool {
    RETRY.contains(&input.trim().to_lowercase().as_str())
}

pub fn booked_reply(request: &BookingRequest, created: &CreatedEvent) -> String {
    let summary = format!(
        "Meeting booked with {} on {} at {} for {} minutes.",
        request.name,
        request.date,
        request.time.format("%H:%M"),
        request.duration_minutes
    );
    match &created.link {
        Some(link) => format!("{summary} {link}"),
        None => summary,
    }
}

fn failed_reply(error: &CalendarError) -> String {
    format!(
        "I couldn't create the calendar event: {error}. Your details are saved; reply 'retry' to try again or 'cancel' to start over."
    )
}

/// Drives one session through the booking steps.
pub struct DialogueEngine {
    calendar: Arc<dyn CalendarGateway>,
}

impl DialogueEngine {
    pub fn new(calendar: Arc<dyn CalendarGateway>) -> Self {
        Self { calendar }
    }

    /// Apply one user utterance to `state` and produce the reply.
    pub async fn advance(&self, state: &mut SessionState, input: &str) -> Turn {
        if is_cancel(input) {
            tracing::info!(session_id = %state.session_id, step = ?state.step, "booking cancelled");
            return Turn::new(CANCELLED, TurnKind::Cancelled);
        }

        match state.step {
            Step::Greeting => {
                state.step = Step::Confirm;
                Turn::new(GREETING, TurnKind::Advanced)
            }
            Step::Confirm => {
                if is_affirmative(input) {
                    state.step = Step::CollectName;
                    Turn::new(ASK_NAME, TurnKind::Advanced)
                } else {
                    Turn::new(DECLINED, TurnKind::Declined)
                }
            }
            Step::CollectName => match parse_name(input) {
                Ok(name) => {
                    let reply = format!(
                        "What date is the meeting with {name}? Please use YYYY-MM-DD, e.g. 2025-07-03."
                    );
                    state.slots.name = Some(name);
                    state.step = Step::CollectDate;
                    Turn::new(reply, TurnKind::Advanced)
                }
                Err(e) => Turn::new("Please tell me who the meeting is with.", TurnKind::Reprompt(e)),
            },
            Step::CollectDate => match parse_date(input) {
                Ok(date) => {
                    state.slots.date = Some(date);
                    state.step = Step::CollectTime;
                    Turn::new(ASK_TIME, TurnKind::Advanced)
                }
                Err(e) => Turn::new(
                    format!("Sorry, {e}. For example: 2025-07-03."),
                    TurnKind::Reprompt(e),
                ),
            },
            Step::CollectTime => match parse_time(input) {
                Ok(time) => {
                    state.slots.time = Some(time);
                    state.step = Step::CollectDuration;
                    Turn::new(ASK_DURATION, TurnKind::Advanced)
                }
                Err(e) => Turn::new(
                    format!("Sorry, {e}. For example: 15:00."),
                    TurnKind::Reprompt(e),
                ),
            },
            Step::CollectDuration => self.collect_duration(state, input).await,
        }
    }

    async fn collect_duration(&self, state: &mut SessionState, input: &str) -> Turn {
        let retry = state.slots.complete().filter(|_| is_retry(input));
        let request = match retry {
            Some(request) => Some(request),
            None => match parse_duration(input) {
                Ok(minutes) => {
                    let mut candidate = state.slots.clone();
                    candidate.duration = Some(minutes);
                    let request = candidate.complete();
                    if request.is_some() {
                        state.slots = candidate;
                    }
                    request
                }
                Err(e) => {
                    return Turn::new(
                        format!("Sorry, {e}. For example: 30."),
                        TurnKind::Reprompt(e),
                    );
                }
            },
        };

        // Reaching the final step without the earlier slots means the session was corrupted.
        let Some(request) = request else {
            tracing::warn!(session_id = %state.session_id, slots = ?state.slots, "incomplete slots at final step");
            return Turn::new(GENERIC_FAILURE, TurnKind::Failed);
        };

        self.submit(state, &request).await
    }

    /// Book a request that arrived complete in one message.
    ///
    /// The slots are stored at the final step first, so a calendar failure
    /// leaves the session exactly where a dialogue booking would, ready for `retry`.
    pub async fn book_parsed(&self, state: &mut SessionState, request: &BookingRequest) -> Turn {
        state.slots = BookingSlots::from(request);
        state.step = Step::CollectDuration;
        self.submit(state, request).await
    }

    async fn submit(&self, state: &SessionState, request: &BookingRequest) -> Turn {
        tracing::info!(
            session_id = %state.session_id,
            name = %request.name,
            date = %request.date,
            time = %request.time,
            duration = request.duration_minutes,
            "submitting booking"
        );
        match self.calendar.create_event(request).await {
            Ok(created) => Turn::new(booked_reply(request, &created), TurnKind::Booked(created)),
            Err(error) => Turn::new(failed_reply(&error), TurnKind::BookingFailed(error)),
        }
    }
}
