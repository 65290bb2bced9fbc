//! Occurrence ledger entries and per-day marker snapshots.
//!
//! # Responsibility
//! - Address every occurrence by `(task_id, date, time)`.
//! - Model started/completed/missed facts as typed variants.
//!
//! # Invariants
//! - At most one entry exists per `OccurrenceKey`.
//! - Entries are replaced, never edited in place.

use crate::model::task::TaskId;
use crate::model::time_of_day::TimeOfDay;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Unix epoch milliseconds.
pub type Timestamp = i64;

/// Composite address of one concrete occurrence.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OccurrenceKey {
    pub task_id: TaskId,
    pub date: NaiveDate,
    pub time: TimeOfDay,
}

impl OccurrenceKey {
    pub fn new(task_id: TaskId, date: NaiveDate, time: TimeOfDay) -> Self {
        Self {
            task_id,
            date,
            time,
        }
    }
}

impl Display for OccurrenceKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}T{}", self.task_id, self.date.format("%Y-%m-%d"), self.time)
    }
}

/// Persisted fact about one occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerEntry {
    /// In progress; promoted to `Completed` or expired into `Missed`.
    Started { started_at: Timestamp },
    Completed {
        started_at: Option<Timestamp>,
        completed_at: Timestamp,
    },
    Missed { missed_at: Timestamp },
}

/// All markers of one task for one calendar day.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OccurrenceMarkers {
    entries: BTreeMap<TimeOfDay, LedgerEntry>,
}

impl OccurrenceMarkers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the marker for one time slot.
    pub fn insert(&mut self, time: TimeOfDay, entry: LedgerEntry) {
        self.entries.insert(time, entry);
    }

    pub fn get(&self, time: TimeOfDay) -> Option<&LedgerEntry> {
        self.entries.get(&time)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TimeOfDay, &LedgerEntry)> {
        self.entries.iter().map(|(time, entry)| (*time, entry))
    }

    pub fn completed(&self) -> Vec<TimeOfDay> {
        self.times_where(|entry| matches!(entry, LedgerEntry::Completed { .. }))
    }

    pub fn missed(&self) -> Vec<TimeOfDay> {
        self.times_where(|entry| matches!(entry, LedgerEntry::Missed { .. }))
    }

    pub fn started(&self) -> Vec<TimeOfDay> {
        self.times_where(|entry| matches!(entry, LedgerEntry::Started { .. }))
    }

    fn times_where(&self, predicate: impl Fn(&LedgerEntry) -> bool) -> Vec<TimeOfDay> {
        self.entries
            .iter()
            .filter(|(_, entry)| predicate(entry))
            .map(|(time, _)| *time)
            .collect()
    }
}

impl FromIterator<(TimeOfDay, LedgerEntry)> for OccurrenceMarkers {
    fn from_iter<I: IntoIterator<Item = (TimeOfDay, LedgerEntry)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
