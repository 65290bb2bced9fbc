//! Clock authority and calendar helpers.
//!
//! # Responsibility
//! - Supply one skew-corrected "now" to the evaluator and ledger.
//! - Convert between instants, the local evaluation frame, and
//!   time-of-day values.
//!
//! # Invariants
//! - Reading the clock never fails; skew lookup failures fall back to the
//!   local machine clock.
//! - All calendar math happens in the clock's fixed-offset frame.

use crate::model::ledger::Timestamp;
use crate::model::schedule::Weekday;
use crate::model::time_of_day::TimeOfDay;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, Offset, Utc};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Mutex;

mod authority;
mod http_source;

pub use authority::{ClockAuthority, TimeSource};
pub use http_source::HttpDateTimeSource;

/// Error raised by a reference time source.
#[derive(Debug)]
pub enum ClockError {
    /// Reference source could not be reached.
    Unavailable(String),
    /// Reference source answered without a usable timestamp.
    InvalidResponse(String),
}

impl Display for ClockError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(details) => write!(f, "reference clock unavailable: {details}"),
            Self::InvalidResponse(details) => {
                write!(f, "reference clock returned invalid time: {details}")
            }
        }
    }
}

impl Error for ClockError {}

/// Source of "now" plus the local frame used for calendar math.
pub trait Clock {
    /// Current instant, corrected for known skew.
    fn now(&self) -> DateTime<Utc>;

    /// Offset of the frame in which times of day are interpreted.
    fn frame(&self) -> FixedOffset;

    fn now_millis(&self) -> Timestamp {
        self.now().timestamp_millis()
    }

    /// Current wall-clock date and time in the evaluation frame.
    fn now_local(&self) -> NaiveDateTime {
        self.now().with_timezone(&self.frame()).naive_local()
    }

    /// Calendar date that keys today's ledger entries.
    fn today_key(&self) -> NaiveDate {
        self.now_local().date()
    }

    fn weekday(&self) -> Weekday {
        weekday_of(self.now_local())
    }

    /// Combines a time of day with today's date in the evaluation frame.
    fn to_date_time(&self, time: TimeOfDay) -> NaiveDateTime {
        time.on(self.today_key())
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }

    fn frame(&self) -> FixedOffset {
        (**self).frame()
    }
}

/// Weekday of a local date-time.
pub fn weekday_of(local: NaiveDateTime) -> Weekday {
    Weekday::from(local.weekday())
}

/// Storage key for a calendar date (`YYYY-MM-DD`).
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Builds a fixed offset from signed minutes east of UTC.
///
/// Returns `None` outside the ±24h range chrono accepts.
pub fn frame_from_minutes(minutes: i32) -> Option<FixedOffset> {
    FixedOffset::east_opt(minutes.checked_mul(60)?)
}

/// Deterministic clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
    frame: FixedOffset,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>, frame: FixedOffset) -> Self {
        Self {
            now: Mutex::new(now),
            frame,
        }
    }

    /// Creates a UTC-framed clock pinned to the given wall-clock value.
    pub fn at_utc(local: NaiveDateTime) -> Self {
        Self::new(local.and_utc(), utc_frame())
    }

    /// Creates a clock whose local wall-clock reading in `frame` is `local`.
    pub fn at_local(local: NaiveDateTime, frame: FixedOffset) -> Self {
        let utc = local - chrono::Duration::seconds(i64::from(frame.local_minus_utc()));
        Self::new(utc.and_utc(), frame)
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.lock() = now;
    }

    /// Moves the clock to a new wall-clock reading in its own frame.
    pub fn set_local(&self, local: NaiveDateTime) {
        let utc = local - chrono::Duration::seconds(i64::from(self.frame.local_minus_utc()));
        self.set(utc.and_utc());
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.lock();
        *guard += by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.lock()
    }

    fn frame(&self) -> FixedOffset {
        self.frame
    }
}

pub(crate) fn utc_frame() -> FixedOffset {
    Utc.fix()
}
