//! Booking slots and their per-field validators.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";

/// A slot that failed its format check. Recovered by re-prompting.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SlotError {
    #[error("name must not be empty")]
    EmptyName,
    #[error("'{0}' is not a date in YYYY-MM-DD format")]
    InvalidDate(String),
    #[error("'{0}' is not a time in 24-hour HH:MM format")]
    InvalidTime(String),
    #[error("'{0}' is not a positive number of minutes")]
    InvalidDuration(String),
}

/// Partially collected booking. Every field is filled by one dialogue step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingSlots {
    pub name: Option<String>,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    pub duration: Option<u32>,
}

impl BookingSlots {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.date.is_none() && self.time.is_none() && self.duration.is_none()
    }

    /// The submittable form, available only once all four slots are filled.
    pub fn complete(&self) -> Option<BookingRequest> {
        Some(BookingRequest {
            name: self.name.clone()?,
            date: self.date?,
            time: self.time?,
            duration_minutes: self.duration?,
        })
    }
}

impl From<&BookingRequest> for BookingSlots {
    fn from(request: &BookingRequest) -> Self {
        Self {
            name: Some(request.name.clone()),
            date: Some(request.date),
            time: Some(request.time),
            duration: Some(request.duration_minutes),
        }
    }
}

/// A fully validated booking, ready for the calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub name: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration_minutes: u32,
}

impl BookingRequest {
    /// Validate raw field values as received from the direct booking path.
    pub fn from_raw(name: &str, date: &str, time: &str, duration: &str) -> Result<Self, SlotError> {
        Ok(Self {
            name: parse_name(name)?,
            date: parse_date(date)?,
            time: parse_time(time)?,
            duration_minutes: parse_duration(duration)?,
        })
    }
}

pub fn parse_name(input: &str) -> Result<String, SlotError> {
    let name = input.trim();
    if name.is_empty() {
        return Err(SlotError::EmptyName);
    }
    Ok(name.to_string())
}

/// Accepts exactly `YYYY-MM-DD`.
pub fn parse_date(input: &str) -> Result<NaiveDate, SlotError> {
    let raw = input.trim();
    let shaped = raw.len() == 10
        && raw
            .bytes()
            .enumerate()
            .all(|(i, b)| if i == 4 || i == 7 { b == b'-' } else { b.is_ascii_digit() });
    if !shaped {
        return Err(SlotError::InvalidDate(raw.to_string()));
    }
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|_| SlotError::InvalidDate(raw.to_string()))
}

/// Accepts `H:MM` or `HH:MM` on a 24-hour clock.
pub fn parse_time(input: &str) -> Result<NaiveTime, SlotError> {
    let raw = input.trim();
    let invalid = || SlotError::InvalidTime(raw.to_string());

    let (hours, minutes) = raw.split_once(':').ok_or_else(invalid)?;
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !digits(hours) || hours.len() > 2 || !digits(minutes) || minutes.len() != 2 {
        return Err(invalid());
    }

    let hours: u32 = hours.parse().map_err(|_| invalid())?;
    let minutes: u32 = minutes.parse().map_err(|_| invalid())?;
    NaiveTime::from_hms_opt(hours, minutes, 0).ok_or_else(invalid)
}

/// Accepts a positive whole number of minutes.
pub fn parse_duration(input: &str) -> Result<u32, SlotError> {
    let raw = input.trim();
    match raw.parse::<u32>() {
        Ok(minutes) if minutes > 0 => Ok(minutes),
        _ => Err(SlotError::InvalidDuration(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_slots_are_empty_and_incomplete() {
        let slots = BookingSlots::default();
        assert!(slots.is_empty());
        assert!(slots.complete().is_none());
    }

    #[test]
    fn complete_requires_all_four_slots() {
        let mut slots = BookingSlots {
            name: Some("Abhi".into()),
            date: NaiveDate::from_ymd_opt(2025, 7, 3),
            time: NaiveTime::from_hms_opt(15, 0, 0),
            duration: None,
        };
        assert!(slots.complete().is_none());

        slots.duration = Some(30);
        let request = slots.complete().unwrap();
        assert_eq!(request.name, "Abhi");
        assert_eq!(request.duration_minutes, 30);
    }

    #[test]
    fn date_accepts_iso_only() {
        assert_eq!(
            parse_date("2025-07-03").unwrap(),
            NaiveDate::from_ymd_opt(2025, 7, 3).unwrap()
        );
        assert_eq!(
            parse_date(" 2025-07-03 ").unwrap(),
            NaiveDate::from_ymd_opt(2025, 7, 3).unwrap()
        );
        for bad in ["July 3rd", "2025-7-3", "03/07/2025", "2025-02-30", "", "20250703"] {
            assert!(
                matches!(parse_date(bad), Err(SlotError::InvalidDate(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn time_accepts_24_hour_clock() {
        assert_eq!(parse_time("15:00").unwrap(), NaiveTime::from_hms_opt(15, 0, 0).unwrap());
        assert_eq!(parse_time("9:05").unwrap(), NaiveTime::from_hms_opt(9, 5, 0).unwrap());
        assert_eq!(parse_time("00:00").unwrap(), NaiveTime::from_hms_opt(0, 0, 0).unwrap());
        for bad in ["24:00", "12:60", "3pm", "15", "15:0", "15:000", "-1:00", "afternoon"] {
            assert!(
                matches!(parse_time(bad), Err(SlotError::InvalidTime(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn duration_must_be_positive_integer() {
        assert_eq!(parse_duration("30").unwrap(), 30);
        assert_eq!(parse_duration(" 45 ").unwrap(), 45);
        for bad in ["thirty", "0", "-5", "1.5", ""] {
            assert!(matches!(parse_duration(bad), Err(SlotError::InvalidDuration(_))));
        }
    }

    #[test]
    fn name_is_trimmed_and_non_empty() {
        assert_eq!(parse_name("  Abhi ").unwrap(), "Abhi");
        assert_eq!(parse_name("   "), Err(SlotError::EmptyName));
    }

    #[test]
    fn from_raw_reports_first_invalid_field() {
        let err = BookingRequest::from_raw("Abhi", "2025-07-03", "25:00", "30").unwrap_err();
        assert_eq!(err, SlotError::InvalidTime("25:00".into()));
        assert!(err.to_string().contains("HH:MM"));
    }
}
