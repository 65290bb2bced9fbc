//! Recurring task definitions consumed by the ledger.
//!
//! # Responsibility
//! - Define identifiers and the coarse overall task lifecycle.
//! - Carry the schedule and tolerance the evaluator needs.
//!
//! # Invariants
//! - `TaskId` and `TenantId` are trimmed and never empty.
//! - Only `OverallTaskState::Accepted` tasks are swept for misses.

use crate::model::schedule::Schedule;
use crate::model::ScheduleError;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

macro_rules! string_id {
    ($name:ident, $label:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Result<Self, ScheduleError> {
                let value = value.into();
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    return Err(ScheduleError::EmptyIdentifier($label));
                }
                Ok(Self(trimmed.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = ScheduleError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

string_id!(TaskId, "task_id");
string_id!(TenantId, "tenant_id");

/// Coarse task lifecycle owned by the task-management collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallTaskState {
    /// Pending, assigned, waiting, or any other pre-acceptance state.
    NotAccepted,
    Accepted,
    Started,
    Completed,
}

impl OverallTaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotAccepted => "not_accepted",
            Self::Accepted => "accepted",
            Self::Started => "started",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "not_accepted" => Some(Self::NotAccepted),
            "accepted" => Some(Self::Accepted),
            "started" => Some(Self::Started),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// One recurring task as seen by the status engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringTask {
    pub id: TaskId,
    pub tenant: TenantId,
    pub title: String,
    pub schedule: Schedule,
    /// Approach window before a slot and deadline before the next slot.
    pub tolerance_minutes: u32,
    pub overall: OverallTaskState,
}

impl RecurringTask {
    /// Returns whether the ledger should look for missed occurrences.
    pub fn is_sweepable(&self) -> bool {
        self.overall == OverallTaskState::Accepted
    }
}

#[cfg(test)]
mod tests {
    use super::{OverallTaskState, TaskId, TenantId};
    use crate::model::ScheduleError;

    #[test]
    fn identifiers_are_trimmed_and_non_empty() {
        assert_eq!(TaskId::new("  task-1 ").unwrap().as_str(), "task-1");
        let err = TenantId::new("   ").unwrap_err();
        assert!(matches!(err, ScheduleError::EmptyIdentifier("tenant_id")));
        assert!(serde_json::from_str::<TaskId>("\"\"").is_err());
    }

    #[test]
    fn overall_state_text_roundtrip_is_closed() {
        for state in [
            OverallTaskState::NotAccepted,
            OverallTaskState::Accepted,
            OverallTaskState::Started,
            OverallTaskState::Completed,
        ] {
            assert_eq!(OverallTaskState::parse(state.as_str()), Some(state));
        }
        assert_eq!(OverallTaskState::parse("waiting"), None);
    }
}
