//! Missed-task ledger use-cases.
//!
//! # Responsibility
//! - Sweep accepted recurring tasks and persist newly missed occurrences.
//! - Retire `Started` markers whose window has closed.
//! - Record completions, which always override a prior miss.
//! - Answer read-only status queries for dashboards.
//!
//! # Invariants
//! - The sweep writes `Missed` only for occurrences with no entry, checked
//!   by the write itself; re-running a pass converges to the same ledger.
//! - Marker lookup failures are treated as "nothing recorded yet".
//! - Marker write failures leave the occurrence eligible for the next pass.
//! - No state is cached across passes.
//! - Each pass also settles yesterday's occurrences whose boundary falls
//!   after midnight, so late slots are never stranded by the date change.

use crate::clock::Clock;
use crate::logging::enter_sweep;
use crate::model::ledger::{LedgerEntry, OccurrenceKey, OccurrenceMarkers, Timestamp};
use crate::model::schedule::Weekday;
use crate::model::sweep::{SweepCounters, SweepMode, SweepReport};
use crate::model::task::{RecurringTask, TaskId, TenantId};
use crate::model::time_of_day::TimeOfDay;
use crate::repo::marker_repo::MarkerRepository;
use crate::repo::task_repo::TaskDefinitionSource;
use crate::repo::RepoError;
use crate::window::{
    classify, classify_all, occurrence_window, Status, LAST_OCCURRENCE_GRACE_MINUTES,
};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use log::{debug, error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;
use uuid::Uuid;

/// Per-occurrence ledger failure.
#[derive(Debug)]
pub enum LedgerError {
    MarkerLookupFailed { task_id: TaskId, source: RepoError },
    MarkerWriteFailed { key: OccurrenceKey, source: RepoError },
}

impl Display for LedgerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MarkerLookupFailed { task_id, source } => {
                write!(f, "marker lookup failed for task `{task_id}`: {source}")
            }
            Self::MarkerWriteFailed { key, source } => {
                write!(f, "marker write failed for {key}: {source}")
            }
        }
    }
}

impl Error for LedgerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::MarkerLookupFailed { source, .. } | Self::MarkerWriteFailed { source, .. } => {
                Some(source)
            }
        }
    }
}

/// Failure that abandons a whole sweep pass.
#[derive(Debug)]
pub enum SweepError {
    /// Task definitions could not be listed; nothing was evaluated.
    TaskLookupFailed { sweep_id: Uuid, source: RepoError },
    /// Deadline passed between tasks; writes made so far stay committed.
    TimedOut {
        sweep_id: Uuid,
        elapsed_ms: u64,
        counters: SweepCounters,
    },
}

impl SweepError {
    pub fn sweep_id(&self) -> Uuid {
        match self {
            Self::TaskLookupFailed { sweep_id, .. } | Self::TimedOut { sweep_id, .. } => *sweep_id,
        }
    }

    /// Tallies reached before the pass was abandoned.
    pub fn partial_counters(&self) -> SweepCounters {
        match self {
            Self::TaskLookupFailed { .. } => SweepCounters::default(),
            Self::TimedOut { counters, .. } => *counters,
        }
    }
}

impl Display for SweepError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TaskLookupFailed { sweep_id, source } => {
                write!(f, "sweep {sweep_id} could not list tasks: {source}")
            }
            Self::TimedOut {
                sweep_id,
                elapsed_ms,
                ..
            } => write!(f, "sweep {sweep_id} timed out after {elapsed_ms}ms"),
        }
    }
}

impl Error for SweepError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::TaskLookupFailed { source, .. } => Some(source),
            Self::TimedOut { .. } => None,
        }
    }
}

/// Frozen view of "now" shared by every task in one pass.
#[derive(Debug, Clone, Copy)]
struct PassInstant {
    local: NaiveDateTime,
    today: NaiveDate,
    yesterday: Option<NaiveDate>,
    midnight: NaiveDateTime,
    millis: Timestamp,
}

/// Ledger service over injected marker storage, task source, and clock.
pub struct MissedTaskLedger<M, T, C>
where
    M: MarkerRepository,
    T: TaskDefinitionSource,
    C: Clock,
{
    markers: M,
    tasks: T,
    clock: C,
}

impl<M, T, C> MissedTaskLedger<M, T, C>
where
    M: MarkerRepository,
    T: TaskDefinitionSource,
    C: Clock,
{
    pub fn new(markers: M, tasks: T, clock: C) -> Self {
        Self {
            markers,
            tasks,
            clock,
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Sweeps every daily-schedule task of `tenant`.
    pub fn sweep(&self, tenant: &TenantId) -> Result<SweepReport, SweepError> {
        self.run_pass(tenant, SweepMode::Daily, None)
    }

    /// Sweeps every weekly-schedule task of `tenant` using today's weekday.
    pub fn weekly_sweep(&self, tenant: &TenantId) -> Result<SweepReport, SweepError> {
        self.run_pass(tenant, SweepMode::Weekly, None)
    }

    /// Lists the tenant's tasks for `mode` and sweeps them.
    ///
    /// The pass is abandoned with `SweepError::TimedOut` once `deadline`
    /// passes; the check runs before each task.
    pub fn run_pass(
        &self,
        tenant: &TenantId,
        mode: SweepMode,
        deadline: Option<Instant>,
    ) -> Result<SweepReport, SweepError> {
        let sweep_id = Uuid::new_v4();
        let tasks = self.tasks.list_tasks(tenant).map_err(|source| {
            error!(
                "event=sweep module=ledger status=error sweep_id={} tenant={} mode={} error_code=task_lookup_failed error={}",
                sweep_id,
                tenant,
                mode.as_str(),
                source
            );
            SweepError::TaskLookupFailed { sweep_id, source }
        })?;

        let selected: Vec<RecurringTask> = tasks
            .into_iter()
            .filter(|task| match mode {
                SweepMode::Daily => task.schedule.is_daily(),
                SweepMode::Weekly => task.schedule.is_weekly(),
            })
            .collect();

        self.sweep_pass(sweep_id, tenant, mode, &selected, deadline)
    }

    /// Sweeps an explicit task list supplied by the caller.
    pub fn sweep_tasks(
        &self,
        tenant: &TenantId,
        mode: SweepMode,
        tasks: &[RecurringTask],
        deadline: Option<Instant>,
    ) -> Result<SweepReport, SweepError> {
        self.sweep_pass(Uuid::new_v4(), tenant, mode, tasks, deadline)
    }

    fn sweep_pass(
        &self,
        sweep_id: Uuid,
        tenant: &TenantId,
        mode: SweepMode,
        tasks: &[RecurringTask],
        deadline: Option<Instant>,
    ) -> Result<SweepReport, SweepError> {
        let _scope = enter_sweep(sweep_id, tenant, mode);
        let started_at = Instant::now();
        let instant = self.pass_instant();
        let mut counters = SweepCounters::default();
        info!(
            "event=sweep module=ledger status=start sweep_id={} tenant={} mode={} date={} tasks={}",
            sweep_id,
            tenant,
            mode.as_str(),
            instant.today,
            tasks.len()
        );

        for task in tasks.iter().filter(|task| task.is_sweepable()) {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                let elapsed_ms = elapsed_millis(started_at);
                warn!(
                    "event=sweep module=ledger status=error sweep_id={} tenant={} mode={} duration_ms={} error_code=sweep_timeout evaluated={}",
                    sweep_id,
                    tenant,
                    mode.as_str(),
                    elapsed_ms,
                    counters.tasks_evaluated
                );
                return Err(SweepError::TimedOut {
                    sweep_id,
                    elapsed_ms,
                    counters,
                });
            }

            if let Some(yesterday) = instant.yesterday {
                self.sweep_day(sweep_id, task, yesterday, &instant, &mut counters);
            }
            self.sweep_day(sweep_id, task, instant.today, &instant, &mut counters);
            counters.tasks_evaluated += 1;
        }

        info!(
            "event=sweep module=ledger status=ok sweep_id={} tenant={} mode={} duration_ms={} evaluated={} missed_recorded={} started_expired={} lookup_failures={} write_failures={}",
            sweep_id,
            tenant,
            mode.as_str(),
            elapsed_millis(started_at),
            counters.tasks_evaluated,
            counters.missed_recorded,
            counters.started_expired,
            counters.lookup_failures,
            counters.write_failures
        );

        Ok(SweepReport {
            sweep_id,
            tenant: tenant.clone(),
            mode,
            counters,
        })
    }

    /// Settles the occurrences of `task` scheduled on `date`.
    ///
    /// For any date before today only occurrences whose boundary falls on or
    /// after today's midnight are settled; earlier ones were due during
    /// that day's own passes.
    fn sweep_day(
        &self,
        sweep_id: Uuid,
        task: &RecurringTask,
        date: NaiveDate,
        instant: &PassInstant,
        counters: &mut SweepCounters,
    ) {
        let times = task.schedule.times_for(Weekday::from(date.weekday()));
        let carried_from = (date < instant.today).then_some(instant.midnight);
        if let Some(midnight) = carried_from {
            if !runs_past(&times, date, midnight) {
                return;
            }
        }
        let settles = |boundary: NaiveDateTime| carried_from.map_or(true, |midnight| boundary >= midnight);

        let markers = match self.lookup_markers(&task.id, date) {
            Ok(markers) => markers,
            Err(err) => {
                warn!(
                    "event=sweep_task module=ledger status=error sweep_id={} task_id={} error_code=marker_lookup_failed error={}",
                    sweep_id, task.id, err
                );
                counters.lookup_failures += 1;
                OccurrenceMarkers::new()
            }
        };

        for (index, time) in times.iter().copied().enumerate() {
            if markers.get(time).is_some() {
                continue;
            }
            let Some(window) = occurrence_window(&times, index, task.tolerance_minutes, date)
            else {
                continue;
            };
            if window.timing_status(instant.local) != Status::Missed || !settles(window.boundary_end) {
                continue;
            }

            let key = OccurrenceKey::new(task.id.clone(), date, time);
            match self.markers.insert_missed_if_absent(&key, instant.millis) {
                Ok(true) => {
                    counters.missed_recorded += 1;
                    info!(
                        "event=marker_missed module=ledger status=ok sweep_id={} occurrence={} boundary_end={}",
                        sweep_id, key, window.boundary_end
                    );
                }
                Ok(false) => {
                    debug!(
                        "event=marker_missed module=ledger status=skipped sweep_id={} occurrence={} reason=already_marked",
                        sweep_id, key
                    );
                }
                Err(source) => {
                    counters.write_failures += 1;
                    log_write_failure(sweep_id, LedgerError::MarkerWriteFailed { key, source });
                }
            }
        }

        for started in markers.started() {
            let boundary = started_boundary(&times, started, task.tolerance_minutes, date);
            if instant.local < boundary || !settles(boundary) {
                continue;
            }

            let key = OccurrenceKey::new(task.id.clone(), date, started);
            match self.markers.expire_started(&key, instant.millis) {
                Ok(true) => {
                    counters.started_expired += 1;
                    info!(
                        "event=marker_started_expired module=ledger status=ok sweep_id={} occurrence={} boundary_end={}",
                        sweep_id, key, boundary
                    );
                }
                Ok(false) => {
                    debug!(
                        "event=marker_started_expired module=ledger status=skipped sweep_id={} occurrence={} reason=no_longer_started",
                        sweep_id, key
                    );
                }
                Err(source) => {
                    counters.write_failures += 1;
                    log_write_failure(sweep_id, LedgerError::MarkerWriteFailed { key, source });
                }
            }
        }
    }

    /// Records a finished occurrence for today; replaces any `Missed` entry.
    pub fn record_completion(
        &self,
        task_id: &TaskId,
        time: TimeOfDay,
    ) -> Result<LedgerEntry, LedgerError> {
        let key = OccurrenceKey::new(task_id.clone(), self.clock.today_key(), time);
        let completed_at = self.clock.now_millis();

        match self.markers.record_completion(&key, completed_at) {
            Ok(entry) => {
                info!(
                    "event=marker_completed module=ledger status=ok occurrence={} completed_at={}",
                    key, completed_at
                );
                Ok(entry)
            }
            Err(source) => {
                error!(
                    "event=marker_completed module=ledger status=error occurrence={} error_code=marker_write_failed error={}",
                    key, source
                );
                Err(LedgerError::MarkerWriteFailed { key, source })
            }
        }
    }

    /// Marks today's occurrence as in progress unless it already has an entry.
    ///
    /// Returns whether a `Started` marker was written.
    pub fn record_start(&self, task_id: &TaskId, time: TimeOfDay) -> Result<bool, LedgerError> {
        let key = OccurrenceKey::new(task_id.clone(), self.clock.today_key(), time);
        let started_at = self.clock.now_millis();

        self.markers
            .record_start(&key, started_at)
            .map(|written| {
                info!(
                    "event=marker_started module=ledger status={} occurrence={}",
                    if written { "ok" } else { "skipped" },
                    key
                );
                written
            })
            .map_err(|source| {
                error!(
                    "event=marker_started module=ledger status=error occurrence={} error_code=marker_write_failed error={}",
                    key, source
                );
                LedgerError::MarkerWriteFailed { key, source }
            })
    }

    /// Aggregate status of one task for dashboard rendering. Read-only.
    pub fn task_status(&self, task: &RecurringTask) -> (Status, Option<TimeOfDay>) {
        let now = self.clock.now_local();
        let times = task.schedule.times_for(crate::clock::weekday_of(now));
        let markers = self.markers_or_empty(&task.id, now.date());
        classify(&times, task.tolerance_minutes, task.overall, &markers, now)
    }

    /// Per-occurrence statuses of one task for today. Read-only.
    pub fn occurrence_statuses(&self, task: &RecurringTask) -> Vec<(TimeOfDay, Status)> {
        let now = self.clock.now_local();
        let times = task.schedule.times_for(crate::clock::weekday_of(now));
        let markers = self.markers_or_empty(&task.id, now.date());
        classify_all(&times, task.tolerance_minutes, &markers, now)
    }

    fn lookup_markers(
        &self,
        task_id: &TaskId,
        date: NaiveDate,
    ) -> Result<OccurrenceMarkers, LedgerError> {
        self.markers
            .get_markers(task_id, date)
            .map_err(|source| LedgerError::MarkerLookupFailed {
                task_id: task_id.clone(),
                source,
            })
    }

    fn markers_or_empty(&self, task_id: &TaskId, date: NaiveDate) -> OccurrenceMarkers {
        self.lookup_markers(task_id, date).unwrap_or_else(|err| {
            warn!(
                "event=task_status module=ledger status=error task_id={} error_code=marker_lookup_failed error={}",
                task_id, err
            );
            OccurrenceMarkers::new()
        })
    }

    fn pass_instant(&self) -> PassInstant {
        let now = self.clock.now();
        let local = now.with_timezone(&self.clock.frame()).naive_local();
        let today = local.date();
        PassInstant {
            local,
            today,
            yesterday: today.pred_opt(),
            midnight: today.and_time(NaiveTime::MIN),
            millis: now.timestamp_millis(),
        }
    }
}

/// Terminal boundary for a `Started` marker at `started`.
///
/// Uses the next scheduled slot after `started` minus tolerance, or the
/// fixed last-occurrence grace when no later slot exists. Markers whose
/// time was removed from the schedule still expire this way.
fn started_boundary(
    sorted: &[TimeOfDay],
    started: TimeOfDay,
    tolerance_minutes: u32,
    date: NaiveDate,
) -> NaiveDateTime {
    match sorted.iter().find(|time| **time > started) {
        Some(next) => next.on(date) - Duration::minutes(i64::from(tolerance_minutes)),
        None => started.on(date) + Duration::minutes(LAST_OCCURRENCE_GRACE_MINUTES),
    }
}

/// Whether any boundary of a day scheduled as `sorted` can reach `midnight`.
///
/// The latest boundary of a day is its last slot plus the fixed grace.
fn runs_past(sorted: &[TimeOfDay], date: NaiveDate, midnight: NaiveDateTime) -> bool {
    sorted.last().is_some_and(|last| {
        last.on(date) + Duration::minutes(LAST_OCCURRENCE_GRACE_MINUTES) >= midnight
    })
}

fn log_write_failure(sweep_id: Uuid, err: LedgerError) {
    error!(
        "event=sweep_task module=ledger status=error sweep_id={} error_code=marker_write_failed error={}",
        sweep_id, err
    );
}

fn elapsed_millis(started_at: Instant) -> u64 {
    u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::{runs_past, started_boundary};
    use crate::model::time_of_day::TimeOfDay;
    use chrono::NaiveDate;

    fn t(raw: &str) -> TimeOfDay {
        TimeOfDay::parse(raw).unwrap()
    }

    #[test]
    fn started_boundary_matches_occurrence_window_rules() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        let slots = [t("09:00"), t("10:00")];

        assert_eq!(started_boundary(&slots, t("09:00"), 15, date), t("09:45").on(date));
        assert_eq!(started_boundary(&slots, t("10:00"), 15, date), t("11:00").on(date));
        // A slot no longer scheduled still expires against the next one.
        assert_eq!(started_boundary(&slots, t("08:30"), 10, date), t("08:50").on(date));
    }

    #[test]
    fn runs_past_only_for_late_last_slots() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        let midnight = t("00:00").on(date.succ_opt().unwrap());

        assert!(runs_past(&[t("08:00"), t("23:00")], date, midnight));
        assert!(runs_past(&[t("23:30")], date, midnight));
        assert!(!runs_past(&[t("08:00"), t("22:59")], date, midnight));
        assert!(!runs_past(&[], date, midnight));
    }
}
