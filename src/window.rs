use std::{cmp::Ordering, fmt, str::FromStr};

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Wall-clock time of day with minute resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ClockTime {
    minute_of_day: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseClockTimeError {
    #[error("expected HH:MM, got {0} field(s)")]
    FieldCount(usize),

    #[error("not a number: {0:?}")]
    NotANumber(String),
}

impl ClockTime {
    /// Substituted for any time string that cannot be parsed.
    pub const DEFAULT: ClockTime = ClockTime::from_hm(9, 0);

    const fn from_hm(hour: u32, minute: u32) -> Self {
        Self {
            minute_of_day: hour * 60 + minute,
        }
    }

    #[cfg(test)]
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        (hour < 24 && minute < 60).then(|| Self::from_hm(hour, minute))
    }

    /// Lenient parse used for everything read from the user or from disk.
    /// Surrounding whitespace and missing zero padding are accepted, out of
    /// range fields are clamped and anything else falls back to 09:00.
    pub fn normalize(text: &str) -> Self {
        text.parse().unwrap_or_else(|error| {
            log::debug!("Falling back to {} for time {:?}: {}", Self::DEFAULT, text, error);
            Self::DEFAULT
        })
    }

    pub fn hour(&self) -> u32 {
        self.minute_of_day / 60
    }

    pub fn minute(&self) -> u32 {
        self.minute_of_day % 60
    }
}

impl FromStr for ClockTime {
    type Err = ParseClockTimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(':').collect();
        let [hour, minute] = fields.as_slice() else {
            return Err(ParseClockTimeError::FieldCount(fields.len()));
        };

        let hour = parse_field(hour)?.clamp(0, 23) as u32;
        let minute = parse_field(minute)?.clamp(0, 59) as u32;

        Ok(Self::from_hm(hour, minute))
    }
}

fn parse_field(field: &str) -> Result<i64, ParseClockTimeError> {
    field
        .trim()
        .parse()
        .map_err(|_| ParseClockTimeError::NotANumber(field.to_owned()))
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl From<NaiveTime> for ClockTime {
    fn from(value: NaiveTime) -> Self {
        Self::from_hm(value.hour(), value.minute())
    }
}

impl From<ClockTime> for NaiveTime {
    fn from(value: ClockTime) -> Self {
        NaiveTime::from_hms_opt(value.hour(), value.minute(), 0).expect("Will never fail.")
    }
}

impl From<String> for ClockTime {
    fn from(value: String) -> Self {
        Self::normalize(&value)
    }
}

impl From<ClockTime> for String {
    fn from(value: ClockTime) -> Self {
        value.to_string()
    }
}

/// Daily recurring window of clock times, both ends inclusive.
///
/// `start > end` describes a window that wraps past midnight and `start == end`
/// covers the whole day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeWindow {
    #[serde(rename = "startTime")]
    start: ClockTime,
    #[serde(rename = "endTime")]
    end: ClockTime,
}

impl TimeWindow {
    pub fn new(start: ClockTime, end: ClockTime) -> Self {
        Self { start, end }
    }

    #[cfg(test)]
    pub fn parse(start: &str, end: &str) -> Self {
        Self::new(ClockTime::normalize(start), ClockTime::normalize(end))
    }

    pub fn start(&self) -> ClockTime {
        self.start
    }

    pub fn end(&self) -> ClockTime {
        self.end
    }

    pub fn contains(&self, time: ClockTime) -> bool {
        match self.start.cmp(&self.end) {
            Ordering::Less => self.start <= time && time <= self.end,
            Ordering::Greater => time >= self.start || time <= self.end,
            Ordering::Equal => true,
        }
    }

    /// Minutes from `time` until `start` next comes around, zero when `time`
    /// is the start itself.
    pub fn minutes_until_open(&self, time: ClockTime) -> u32 {
        (self.start.minute_of_day + MINUTES_PER_DAY - time.minute_of_day) % MINUTES_PER_DAY
    }
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self::new(ClockTime::from_hm(9, 0), ClockTime::from_hm(21, 0))
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}
