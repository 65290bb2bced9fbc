//! Domain model for recurring task occurrences.
//!
//! # Responsibility
//! - Define the value types shared by the evaluator, ledger, and storage.
//! - Reject malformed schedule input at the boundary.
//!
//! # Invariants
//! - A malformed `TimeOfDay` never reaches the evaluator.
//! - Ledger entries are addressed only by `OccurrenceKey`.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod ledger;
pub mod schedule;
pub mod sweep;
pub mod task;
pub mod time_of_day;

/// Validation error for schedule and identifier input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// Text that is not a valid `HH:MM` time of day.
    MalformedTimeOfDay(String),
    /// Identifier field was blank after trimming.
    EmptyIdentifier(&'static str),
}

impl Display for ScheduleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedTimeOfDay(value) => {
                write!(f, "malformed time of day `{value}`; expected HH:MM")
            }
            Self::EmptyIdentifier(field) => write!(f, "{field} cannot be empty"),
        }
    }
}

impl Error for ScheduleError {}
