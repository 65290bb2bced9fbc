//! Wall-clock time value without a date component.
//!
//! # Responsibility
//! - Represent one scheduled time of day (`HH:MM`).
//! - Parse and render the canonical text form used by storage and callers.
//!
//! # Invariants
//! - `hour < 24` and `minute < 60` for every constructed value.
//! - Ordering is chronological within one day.

use crate::model::ScheduleError;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

static TIME_OF_DAY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2}):(\d{2})$").expect("valid time-of-day regex"));

/// One scheduled time of day, interpreted against "today" by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    /// Creates a time of day from validated components.
    pub fn new(hour: u8, minute: u8) -> Result<Self, ScheduleError> {
        if hour > 23 || minute > 59 {
            return Err(ScheduleError::MalformedTimeOfDay(format!(
                "{hour:02}:{minute:02}"
            )));
        }
        Ok(Self { hour, minute })
    }

    /// Parses `H:MM` or `HH:MM`, rejecting anything else.
    pub fn parse(value: &str) -> Result<Self, ScheduleError> {
        let trimmed = value.trim();
        let captures = TIME_OF_DAY_RE
            .captures(trimmed)
            .ok_or_else(|| ScheduleError::MalformedTimeOfDay(trimmed.to_string()))?;

        let hour = captures[1]
            .parse::<u8>()
            .map_err(|_| ScheduleError::MalformedTimeOfDay(trimmed.to_string()))?;
        let minute = captures[2]
            .parse::<u8>()
            .map_err(|_| ScheduleError::MalformedTimeOfDay(trimmed.to_string()))?;

        Self::new(hour, minute).map_err(|_| ScheduleError::MalformedTimeOfDay(trimmed.to_string()))
    }

    pub fn to_naive_time(self) -> NaiveTime {
        NaiveTime::from_hms_opt(u32::from(self.hour), u32::from(self.minute), 0)
            .unwrap_or(NaiveTime::MIN)
    }

    /// Anchors this time of day on a concrete calendar date.
    pub fn on(self, date: NaiveDate) -> NaiveDateTime {
        date.and_time(self.to_naive_time())
    }

    /// Truncates a `NaiveTime` to minute precision.
    pub fn from_naive_time(time: NaiveTime) -> Self {
        // chrono guarantees hour < 24 and minute < 60.
        Self {
            hour: time.hour() as u8,
            minute: time.minute() as u8,
        }
    }
}

impl Display for TimeOfDay {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = ScheduleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}
