//! Single-shot utterance parser.
//!
//! Understands exactly one phrasing: `... with <name> on <YYYY-MM-DD> at <HH:MM> for <n> ...`.
//! Anything richer belongs to an upstream language agent, not here.

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

use super::slots::{parse_date, parse_duration, parse_name, parse_time, BookingRequest, SlotError};

/// Example phrasing shown to users when their message is not understood.
pub const EXAMPLE_UTTERANCE: &str = "Book a meeting with Abhi on 2025-07-03 at 15:00 for 30 minutes";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("no booking details found in '{0}'")]
    NotFound(String),
    #[error(transparent)]
    InvalidSlot(#[from] SlotError),
}

fn booking_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)\bwith\s+(?P<name>.*?)\s+on\s+(?P<date>\d{4}-\d{2}-\d{2})\s+at\s+(?P<time>\d{1,2}:\d{2})\s+for\s+(?P<duration>\d+)",
        )
        .expect("booking pattern is valid")
    })
}

/// Extract a complete booking from free text.
pub fn parse_utterance(text: &str) -> Result<BookingRequest, ParseError> {
    let caps = booking_pattern()
        .captures(text)
        .ok_or_else(|| ParseError::NotFound(text.trim().to_string()))?;

    Ok(BookingRequest {
        name: parse_name(&caps["name"])?,
        date: parse_date(&caps["date"])?,
        time: parse_time(&caps["time"])?,
        duration_minutes: parse_duration(&caps["duration"])?,
    })
}
