//! Recurring-task time-window status engine and missed-task ledger.
//!
//! The evaluator (`window`) is pure; the ledger (`service`) is the only
//! component that writes occurrence markers.

pub mod clock;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod window;

pub use clock::{Clock, ClockAuthority, ClockError, FixedClock, HttpDateTimeSource, TimeSource};
pub use config::{ConfigError, EngineConfig, LogConfig, LogLevel, TimeSourceConfig};
pub use logging::{init_logging, LoggingError};
pub use model::ledger::{LedgerEntry, OccurrenceKey, OccurrenceMarkers, Timestamp};
pub use model::schedule::{Schedule, Weekday};
pub use model::sweep::{SweepCounters, SweepMode, SweepOutcome, SweepReport, SweepRunRecord};
pub use model::task::{OverallTaskState, RecurringTask, TaskId, TenantId};
pub use model::time_of_day::TimeOfDay;
pub use model::ScheduleError;
pub use repo::marker_repo::{MarkerRepository, SqliteMarkerRepository};
pub use repo::sweep_run_repo::SqliteSweepRunRepository;
pub use repo::task_repo::{SqliteTaskRepository, TaskDefinitionSource};
pub use repo::{RepoError, RepoResult};
pub use service::ledger_service::{LedgerError, MissedTaskLedger, SweepError};
pub use service::sweep_runner::SweepRunner;
pub use window::{classify, classify_all, classify_occurrence, next_occurrence, Status};

/// Returns the engine crate version.
pub fn engine_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
