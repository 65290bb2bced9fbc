//! Sweep pass identity, counters, and audit records.

use crate::model::ledger::Timestamp;
use crate::model::task::TenantId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which schedules a pass covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepMode {
    /// Tasks with a flat daily schedule.
    Daily,
    /// Tasks with a weekday-partitioned schedule, using today's list.
    Weekly,
}

impl SweepMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            _ => None,
        }
    }
}

/// How a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepOutcome {
    Ok,
    TimedOut,
    Failed,
}

impl SweepOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::TimedOut => "timed_out",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ok" => Some(Self::Ok),
            "timed_out" => Some(Self::TimedOut),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Per-pass tallies; partial when the pass was abandoned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepCounters {
    pub tasks_evaluated: u32,
    pub missed_recorded: u32,
    pub started_expired: u32,
    pub lookup_failures: u32,
    pub write_failures: u32,
}

/// Result of one completed sweep pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub sweep_id: Uuid,
    pub tenant: TenantId,
    pub mode: SweepMode,
    pub counters: SweepCounters,
}

/// Persisted audit row for one pass, successful or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepRunRecord {
    pub sweep_id: Uuid,
    pub tenant: TenantId,
    pub mode: SweepMode,
    pub started_at: Timestamp,
    pub duration_ms: u64,
    pub outcome: SweepOutcome,
    pub counters: SweepCounters,
}
