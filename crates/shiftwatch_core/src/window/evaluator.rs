//! Occurrence window math and status classification.
//!
//! Every function here takes `now` as a local wall-clock value and anchors
//! times of day on `now.date()`.

use super::Status;
use crate::model::ledger::{LedgerEntry, OccurrenceMarkers};
use crate::model::schedule::normalize_times;
use crate::model::task::OverallTaskState;
use crate::model::time_of_day::TimeOfDay;
use chrono::{Duration, NaiveDate, NaiveDateTime};

/// Grace period after the last occurrence of a day. Not configurable.
pub const LAST_OCCURRENCE_GRACE_MINUTES: i64 = 60;

/// Time bounds of one occurrence on a concrete date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OccurrenceWindow {
    pub time: TimeOfDay,
    /// Start of the `Approaching` window.
    pub approach_start: NaiveDateTime,
    /// Scheduled instant; `Active` from here.
    pub start: NaiveDateTime,
    /// First instant at which an unmarked occurrence counts as missed.
    pub boundary_end: NaiveDateTime,
}

impl OccurrenceWindow {
    /// Time-only classification, ignoring any ledger marker.
    pub fn timing_status(&self, now: NaiveDateTime) -> Status {
        if self.approach_start <= now && now < self.start {
            Status::Approaching
        } else if self.start <= now && now < self.boundary_end {
            Status::Active
        } else if now >= self.boundary_end {
            Status::Missed
        } else {
            Status::NotYetDue
        }
    }
}

/// Computes the window of `sorted[index]` on `date`.
///
/// `sorted` must already be ascending and deduplicated. Returns `None` when
/// `index` is out of range.
pub fn occurrence_window(
    sorted: &[TimeOfDay],
    index: usize,
    tolerance_minutes: u32,
    date: NaiveDate,
) -> Option<OccurrenceWindow> {
    let time = *sorted.get(index)?;
    let tolerance = Duration::minutes(i64::from(tolerance_minutes));
    let start = time.on(date);

    let boundary_end = match sorted.get(index + 1) {
        Some(next) => next.on(date) - tolerance,
        None => start + Duration::minutes(LAST_OCCURRENCE_GRACE_MINUTES),
    };

    Some(OccurrenceWindow {
        time,
        approach_start: start - tolerance,
        start,
        boundary_end,
    })
}

/// Classifies one window, letting a recorded marker take precedence.
fn classify_window(
    window: &OccurrenceWindow,
    marker: Option<&LedgerEntry>,
    now: NaiveDateTime,
) -> Status {
    match marker {
        Some(LedgerEntry::Completed { .. }) => Status::Completed,
        Some(LedgerEntry::Missed { .. }) => Status::Missed,
        Some(LedgerEntry::Started { .. }) => Status::Started,
        None => window.timing_status(now),
    }
}

/// Classifies the occurrence at `time` within `schedule`.
///
/// Returns `None` when `time` is not part of the schedule.
pub fn classify_occurrence(
    schedule: &[TimeOfDay],
    time: TimeOfDay,
    tolerance_minutes: u32,
    markers: &OccurrenceMarkers,
    now: NaiveDateTime,
) -> Option<Status> {
    let sorted = normalize_times(schedule);
    let index = sorted.binary_search(&time).ok()?;
    let window = occurrence_window(&sorted, index, tolerance_minutes, now.date())?;
    Some(classify_window(&window, markers.get(time), now))
}

/// Classifies every occurrence of the day in chronological order.
pub fn classify_all(
    schedule: &[TimeOfDay],
    tolerance_minutes: u32,
    markers: &OccurrenceMarkers,
    now: NaiveDateTime,
) -> Vec<(TimeOfDay, Status)> {
    windows(&normalize_times(schedule), tolerance_minutes, now.date())
        .map(|window| (window.time, classify_window(&window, markers.get(window.time), now)))
        .collect()
}

/// Aggregate status for a whole task plus a representative time.
///
/// # Contract
/// - Empty schedule -> `(NotYetDue, None)`.
/// - Overall `Started`/`Completed` dominates per-occurrence timing.
/// - Otherwise the nearest `Approaching`/`Active` occurrence wins, then the
///   chronologically first `Missed`, then `NotYetDue` with the next slot.
/// - The `Missed` fallback covers both occurrences the sweep has already
///   recorded and unmarked ones whose boundary has passed; a dashboard sees
///   the same answer before and after the sweep catches up.
/// - `Started` markers never win the aggregate on their own.
pub fn classify(
    schedule: &[TimeOfDay],
    tolerance_minutes: u32,
    overall: OverallTaskState,
    markers: &OccurrenceMarkers,
    now: NaiveDateTime,
) -> (Status, Option<TimeOfDay>) {
    let sorted = normalize_times(schedule);
    if sorted.is_empty() {
        return (Status::NotYetDue, None);
    }

    match overall {
        OverallTaskState::Started => return (Status::Started, next_occurrence(&sorted, now)),
        OverallTaskState::Completed => return (Status::Completed, next_occurrence(&sorted, now)),
        OverallTaskState::NotAccepted | OverallTaskState::Accepted => {}
    }

    let classified: Vec<(OccurrenceWindow, Status)> =
        windows(&sorted, tolerance_minutes, now.date())
            .map(|window| {
                let status = classify_window(&window, markers.get(window.time), now);
                (window, status)
            })
            .collect();

    let mut nearest_first: Vec<&(OccurrenceWindow, Status)> = classified.iter().collect();
    // Stable sort keeps the earlier slot first on equal distance.
    nearest_first.sort_by_key(|(window, _)| (window.start - now).num_seconds().abs());

    if let Some((window, status)) = nearest_first
        .iter()
        .find(|(_, status)| matches!(status, Status::Approaching | Status::Active))
    {
        return (*status, Some(window.time));
    }

    if let Some((window, _)) = classified
        .iter()
        .find(|(_, status)| *status == Status::Missed)
    {
        return (Status::Missed, Some(window.time));
    }

    (Status::NotYetDue, next_occurrence(&sorted, now))
}

/// Smallest scheduled time strictly after `now`, else the first slot of the
/// day (tomorrow's first occurrence).
pub fn next_occurrence(schedule: &[TimeOfDay], now: NaiveDateTime) -> Option<TimeOfDay> {
    let current = TimeOfDay::from_naive_time(now.time());
    let mut earliest: Option<TimeOfDay> = None;
    let mut next_after: Option<TimeOfDay> = None;

    for &time in schedule {
        earliest = Some(earliest.map_or(time, |value| value.min(time)));
        if time > current {
            next_after = Some(next_after.map_or(time, |value| value.min(time)));
        }
    }

    next_after.or(earliest)
}

fn windows(
    sorted: &[TimeOfDay],
    tolerance_minutes: u32,
    date: NaiveDate,
) -> impl Iterator<Item = OccurrenceWindow> + '_ {
    (0..sorted.len()).filter_map(move |index| occurrence_window(sorted, index, tolerance_minutes, date))
}
