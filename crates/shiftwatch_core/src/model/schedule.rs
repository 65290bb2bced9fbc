//! Recurring schedule shapes (daily and weekday-partitioned).
//!
//! # Responsibility
//! - Hold the scheduled times of day for one recurring task.
//! - Hand out one day's occurrence list in canonical order.
//!
//! # Invariants
//! - `times_for` output is strictly increasing (sorted + deduplicated),
//!   regardless of how the schedule was authored.

use crate::model::time_of_day::TimeOfDay;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Day of week used to key weekly schedules.
///
/// Owned here instead of reusing `chrono::Weekday` so schedules can be
/// stored in ordered maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl From<chrono::Weekday> for Weekday {
    fn from(value: chrono::Weekday) -> Self {
        match value {
            chrono::Weekday::Mon => Self::Monday,
            chrono::Weekday::Tue => Self::Tuesday,
            chrono::Weekday::Wed => Self::Wednesday,
            chrono::Weekday::Thu => Self::Thursday,
            chrono::Weekday::Fri => Self::Friday,
            chrono::Weekday::Sat => Self::Saturday,
            chrono::Weekday::Sun => Self::Sunday,
        }
    }
}

/// Scheduled times of day for a recurring task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cadence", content = "times", rename_all = "snake_case")]
pub enum Schedule {
    /// Same list every day.
    Daily(Vec<TimeOfDay>),
    /// Separate list per weekday; missing weekdays have no occurrences.
    Weekly(BTreeMap<Weekday, Vec<TimeOfDay>>),
}

impl Schedule {
    /// Returns the canonical occurrence list for the given weekday.
    pub fn times_for(&self, weekday: Weekday) -> Vec<TimeOfDay> {
        let raw = match self {
            Self::Daily(times) => times.as_slice(),
            Self::Weekly(days) => days.get(&weekday).map(Vec::as_slice).unwrap_or(&[]),
        };
        normalize_times(raw)
    }

    pub fn is_daily(&self) -> bool {
        matches!(self, Self::Daily(_))
    }

    pub fn is_weekly(&self) -> bool {
        matches!(self, Self::Weekly(_))
    }
}

/// Sorts and deduplicates one day's times.
pub fn normalize_times(times: &[TimeOfDay]) -> Vec<TimeOfDay> {
    let mut sorted = times.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    sorted
}
