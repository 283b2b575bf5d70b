//! Day keys and time-of-day parsing.
//!
//! Every parser in this module is total: malformed user input yields `None`
//! and never an error, so callers can treat `None` as "keep the old value".

use std::fmt;

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

const MINUTES_PER_DAY: i64 = 24 * 60;

/// Canonical `YYYY-MM-DD` key for a calendar day.
pub fn to_date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn parse_date_key(key: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(key.trim(), "%Y-%m-%d").ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        if hour > 23 || minute > 59 {
            return None;
        }
        Some(Self { hour, minute })
    }

    pub fn to_naive_time(self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or(NaiveTime::MIN)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl From<NaiveTime> for TimeOfDay {
    fn from(time: NaiveTime) -> Self {
        Self {
            hour: time.hour(),
            minute: time.minute(),
        }
    }
}

/// Parse `H:MM`, `HH:MM`, `HMM` or `HHMM` into an hour and minute.
///
/// The three and four digit forms are read after dropping every non-digit, so
/// `"7.30"` and `"07h30"` are accepted as well.
pub fn parse_time_of_day(input: &str) -> Option<TimeOfDay> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    let (hour, minute): (u32, u32) = match digits.len() {
        4 => (digits[..2].parse().ok()?, digits[2..].parse().ok()?),
        3 => (digits[..1].parse().ok()?, digits[1..].parse().ok()?),
        _ => {
            let (h, m) = trimmed.split_once(':')?;
            let well_formed = (1..=2).contains(&h.len())
                && m.len() == 2
                && h.chars().chain(m.chars()).all(|c| c.is_ascii_digit());
            if !well_formed {
                return None;
            }
            (h.parse().ok()?, m.parse().ok()?)
        }
    };
    TimeOfDay::new(hour, minute)
}

/// The shapes a stored reminder time has been seen in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeValue<'a> {
    Text(&'a str),
    /// Minutes since midnight when below 1440, epoch milliseconds otherwise.
    Number(i64),
    DateTime(NaiveDateTime),
}

impl<'a> TimeValue<'a> {
    pub fn from_json(value: &'a serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(text) => Some(TimeValue::Text(text)),
            serde_json::Value::Number(number) => number
                .as_i64()
                .or_else(|| number.as_f64().map(|f| f.floor() as i64))
                .map(TimeValue::Number),
            _ => None,
        }
    }
}

/// Normalize any supported time shape to zero padded `HH:MM`.
pub fn normalize_time_of_day(value: TimeValue<'_>) -> Option<String> {
    let time = match value {
        TimeValue::Text(text) => parse_time_of_day(text)?,
        TimeValue::Number(n) if (0..MINUTES_PER_DAY).contains(&n) => {
            TimeOfDay::new((n / 60) as u32, (n % 60) as u32)?
        }
        TimeValue::Number(n) if n >= MINUTES_PER_DAY => {
            let local = Local.timestamp_millis_opt(n).single()?;
            TimeOfDay::from(local.time())
        }
        TimeValue::Number(_) => return None,
        TimeValue::DateTime(dt) => TimeOfDay::from(dt.time()),
    };
    Some(time.to_string())
}

/// Lenient decimal parse for weights and heights typed on a phone keyboard.
pub fn parse_decimal(input: &str) -> Option<f64> {
    let normalized = input.trim().replace(',', ".");
    let value: f64 = normalized.parse().ok()?;
    value.is_finite().then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_digit_runs_and_colon_forms() {
        assert_eq!(parse_time_of_day("730"), TimeOfDay::new(7, 30));
        assert_eq!(parse_time_of_day("0730"), TimeOfDay::new(7, 30));
        assert_eq!(parse_time_of_day("7:30"), TimeOfDay::new(7, 30));
        assert_eq!(parse_time_of_day(" 21:05 "), TimeOfDay::new(21, 5));
        assert_eq!(parse_time_of_day("07h30"), TimeOfDay::new(7, 30));
    }

    #[test]
    fn rejects_out_of_range_and_garbage() {
        assert_eq!(parse_time_of_day("25:00"), None);
        assert_eq!(parse_time_of_day("12:60"), None);
        assert_eq!(parse_time_of_day("7:3"), None);
        assert_eq!(parse_time_of_day("morning"), None);
        assert_eq!(parse_time_of_day(""), None);
        assert_eq!(parse_time_of_day("12345"), None);
    }

    #[test]
    fn parsed_time_normalizes_back_to_padded_text() {
        let parsed = parse_time_of_day("730").unwrap();
        assert_eq!(
            normalize_time_of_day(TimeValue::Text(&parsed.to_string())).as_deref(),
            Some("07:30")
        );
    }

    #[test]
    fn normalizes_minutes_datetimes_and_epochs() {
        assert_eq!(
            normalize_time_of_day(TimeValue::Number(450)).as_deref(),
            Some("07:30")
        );
        assert_eq!(normalize_time_of_day(TimeValue::Number(-5)), None);

        let dt = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(18, 4, 0)
            .unwrap();
        assert_eq!(
            normalize_time_of_day(TimeValue::DateTime(dt)).as_deref(),
            Some("18:04")
        );

        let local = Local.with_ymd_and_hms(2024, 1, 10, 6, 45, 0).single().unwrap();
        assert_eq!(
            normalize_time_of_day(TimeValue::Number(local.timestamp_millis())).as_deref(),
            Some("06:45")
        );
        assert_eq!(normalize_time_of_day(TimeValue::Text("nope")), None);
    }

    #[test]
    fn date_keys_are_zero_padded() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 3).unwrap();
        assert_eq!(to_date_key(date), "2024-02-03");
        assert_eq!(parse_date_key("2024-02-03"), Some(date));
        assert_eq!(parse_date_key("03.02.2024"), None);
    }

    #[test]
    fn decimal_accepts_comma() {
        assert_eq!(parse_decimal("72,5"), Some(72.5));
        assert_eq!(parse_decimal(" 80 "), Some(80.0));
        assert_eq!(parse_decimal("abc"), None);
        assert_eq!(parse_decimal("inf"), None);
    }
}
