//! Minute-precision wall-clock arithmetic.
//!
//! Every time of day in slotwise is a naive business-local value: minutes
//! since local midnight, written `"HH:MM"` at the storage boundary. There is
//! no offset and no UTC conversion anywhere.

use thiserror::Error;

/// Minutes since local midnight.
pub type Minutes = u32;

pub const MINUTES_PER_DAY: Minutes = 24 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeError {
    #[error("malformed time {0:?}: expected HH:MM")]
    Malformed(String),
    #[error("{minutes} minutes after {start} runs past midnight")]
    PastMidnight { start: String, minutes: u32 },
}

/// Parse `"HH:MM"` (or `"H:MM"`) into minutes since midnight.
pub fn parse_hhmm(s: &str) -> Result<Minutes, TimeError> {
    let malformed = || TimeError::Malformed(s.to_string());
    let (h, m) = s.trim().split_once(':').ok_or_else(malformed)?;
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
        return Err(malformed());
    }
    if !h.bytes().chain(m.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let hours: u32 = h.parse().map_err(|_| malformed())?;
    let minutes: u32 = m.parse().map_err(|_| malformed())?;
    if hours > 23 || minutes > 59 {
        return Err(malformed());
    }
    Ok(hours * 60 + minutes)
}

/// Zero-padded 24-hour form.
pub fn format_hhmm(m: Minutes) -> String {
    format!("{:02}:{:02}", m / 60, m % 60)
}

/// 12-hour display form, `h:MM AM/PM`. Hour 0 renders as 12.
pub fn format_12h(m: Minutes) -> String {
    let hours = (m / 60) % 24;
    let suffix = if hours < 12 { "AM" } else { "PM" };
    let display_hour = match hours % 12 {
        0 => 12,
        h => h,
    };
    format!("{display_hour}:{:02} {suffix}", m % 60)
}

/// Add `minutes` to a time of day. Results at or past midnight are rejected
/// rather than wrapped: a service may not run into the next day.
pub fn add_minutes(start: Minutes, minutes: u32) -> Result<Minutes, TimeError> {
    match start.checked_add(minutes) {
        Some(end) if end < MINUTES_PER_DAY => Ok(end),
        _ => Err(TimeError::PastMidnight {
            start: format_hhmm(start),
            minutes,
        }),
    }
}

/// String-in, string-out form of [`add_minutes`].
pub fn add_minutes_to_time(time: &str, minutes: u32) -> Result<String, TimeError> {
    let start = parse_hhmm(time)?;
    add_minutes(start, minutes).map(format_hhmm)
}

/// Serde adapter storing a [`Minutes`] field as an `"HH:MM"` string.
pub mod hhmm {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{format_hhmm, parse_hhmm, Minutes};

    pub fn serialize<S: Serializer>(m: &Minutes, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_hhmm(*m))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Minutes, D::Error> {
        let raw = String::deserialize(d)?;
        parse_hhmm(&raw).map_err(serde::de::Error::custom)
    }
}
