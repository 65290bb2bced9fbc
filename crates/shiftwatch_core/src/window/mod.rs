//! Window status evaluation for recurring task occurrences.
//!
//! # Responsibility
//! - Classify scheduled occurrences against "now" and a tolerance.
//! - Stay pure: no I/O, no clock reads, no persistence.
//!
//! # Invariants
//! - Schedules are sorted and deduplicated before any index is used.
//! - The last occurrence of a day always gets a fixed 60-minute grace.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

pub mod evaluator;

pub use evaluator::{
    classify, classify_all, classify_occurrence, next_occurrence, occurrence_window,
    OccurrenceWindow, LAST_OCCURRENCE_GRACE_MINUTES,
};

/// Display status of one occurrence or of a whole task.
///
/// Variant names are the exact vocabulary downstream consumers match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    NotYetDue,
    Approaching,
    Active,
    Missed,
    Started,
    Completed,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotYetDue => "NotYetDue",
            Self::Approaching => "Approaching",
            Self::Active => "Active",
            Self::Missed => "Missed",
            Self::Started => "Started",
            Self::Completed => "Completed",
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
