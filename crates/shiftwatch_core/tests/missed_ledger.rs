use chrono::{Duration, NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use shiftwatch_core::db::open_db_in_memory;
use shiftwatch_core::{
    FixedClock, LedgerEntry, MarkerRepository, MissedTaskLedger, OccurrenceKey,
    OccurrenceMarkers, OverallTaskState, RecurringTask, RepoError, RepoResult, Schedule,
    SqliteMarkerRepository, SqliteTaskRepository, Status, SweepError, SweepMode, TaskId,
    TenantId, TimeOfDay, Timestamp, Weekday,
};
use std::collections::BTreeMap;
use std::time::Instant;

const TENANT: &str = "acme";

fn t(raw: &str) -> TimeOfDay {
    TimeOfDay::parse(raw).unwrap()
}

/// 2024-06-03 is a Monday.
fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
}

fn at(raw: &str) -> NaiveDateTime {
    t(raw).on(today())
}

fn tenant() -> TenantId {
    TenantId::new(TENANT).unwrap()
}

fn daily_task(id: &str, times: &[&str], tolerance: u32, overall: OverallTaskState) -> RecurringTask {
    RecurringTask {
        id: TaskId::new(id).unwrap(),
        tenant: tenant(),
        title: format!("task {id}"),
        schedule: Schedule::Daily(times.iter().map(|raw| t(raw)).collect()),
        tolerance_minutes: tolerance,
        overall,
    }
}

fn seed(conn: &Connection, tasks: &[RecurringTask]) {
    let repo = SqliteTaskRepository::new(conn);
    for task in tasks {
        repo.upsert_task(task).unwrap();
    }
}

fn ledger<'a>(
    conn: &'a Connection,
    clock: &'a FixedClock,
) -> MissedTaskLedger<SqliteMarkerRepository<'a>, SqliteTaskRepository<'a>, &'a FixedClock> {
    MissedTaskLedger::new(
        SqliteMarkerRepository::new(conn),
        SqliteTaskRepository::new(conn),
        clock,
    )
}

fn markers_of(conn: &Connection, task_id: &str) -> OccurrenceMarkers {
    SqliteMarkerRepository::new(conn)
        .get_markers(&TaskId::new(task_id).unwrap(), today())
        .unwrap()
}

fn key(task_id: &str, time: &str) -> OccurrenceKey {
    OccurrenceKey::new(TaskId::new(task_id).unwrap(), today(), t(time))
}

#[test]
fn sweep_records_missed_for_expired_occurrences_only() {
    let conn = open_db_in_memory().unwrap();
    seed(
        &conn,
        &[daily_task("t1", &["09:00", "10:00"], 15, OverallTaskState::Accepted)],
    );
    let clock = FixedClock::at_utc(at("09:46"));

    let report = ledger(&conn, &clock).sweep(&tenant()).unwrap();

    assert_eq!(report.mode, SweepMode::Daily);
    assert_eq!(report.counters.tasks_evaluated, 1);
    assert_eq!(report.counters.missed_recorded, 1);
    let markers = markers_of(&conn, "t1");
    assert_eq!(markers.missed(), vec![t("09:00")]);
    assert!(markers.get(t("10:00")).is_none());
}

#[test]
fn sweep_twice_is_idempotent() {
    let conn = open_db_in_memory().unwrap();
    seed(
        &conn,
        &[
            daily_task("t1", &["06:00", "08:00", "12:00"], 20, OverallTaskState::Accepted),
            daily_task("t2", &["07:00"], 5, OverallTaskState::Accepted),
        ],
    );
    let clock = FixedClock::at_utc(at("13:30"));
    let ledger = ledger(&conn, &clock);

    let first = ledger.sweep(&tenant()).unwrap();
    let after_first = (markers_of(&conn, "t1"), markers_of(&conn, "t2"));
    let second = ledger.sweep(&tenant()).unwrap();
    let after_second = (markers_of(&conn, "t1"), markers_of(&conn, "t2"));

    assert_eq!(first.counters.missed_recorded, 4);
    assert_eq!(second.counters.missed_recorded, 0);
    assert_eq!(after_first, after_second);
    assert_eq!(after_second.0.missed(), vec![t("06:00"), t("08:00"), t("12:00")]);
}

#[test]
fn last_occurrence_uses_sixty_minute_grace_in_sweep() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn, &[daily_task("t1", &["09:00"], 15, OverallTaskState::Accepted)]);
    let clock = FixedClock::at_utc(at("09:59"));
    let ledger = ledger(&conn, &clock);

    ledger.sweep(&tenant()).unwrap();
    assert!(markers_of(&conn, "t1").is_empty());

    clock.advance(Duration::minutes(2));
    ledger.sweep(&tenant()).unwrap();
    assert_eq!(markers_of(&conn, "t1").missed(), vec![t("09:00")]);
}

#[test]
fn tasks_not_accepted_or_already_started_are_never_marked_missed() {
    let conn = open_db_in_memory().unwrap();
    seed(
        &conn,
        &[
            daily_task("pending", &["08:00"], 15, OverallTaskState::NotAccepted),
            daily_task("running", &["08:00"], 15, OverallTaskState::Started),
            daily_task("done", &["08:00"], 15, OverallTaskState::Completed),
        ],
    );
    let clock = FixedClock::at_utc(at("18:00"));

    let report = ledger(&conn, &clock).sweep(&tenant()).unwrap();

    assert_eq!(report.counters.tasks_evaluated, 0);
    for id in ["pending", "running", "done"] {
        assert!(markers_of(&conn, id).is_empty(), "{id} should have no markers");
    }
}

#[test]
fn completion_replaces_missed_marker() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn, &[daily_task("t1", &["09:00"], 15, OverallTaskState::Accepted)]);
    let clock = FixedClock::at_utc(at("11:00"));
    let ledger = ledger(&conn, &clock);

    ledger.sweep(&tenant()).unwrap();
    assert_eq!(markers_of(&conn, "t1").missed(), vec![t("09:00")]);

    let entry = ledger
        .record_completion(&TaskId::new("t1").unwrap(), t("09:00"))
        .unwrap();
    assert!(matches!(entry, LedgerEntry::Completed { started_at: None, .. }));

    let markers = markers_of(&conn, "t1");
    assert_eq!(markers.completed(), vec![t("09:00")]);
    assert!(markers.missed().is_empty());

    // The sweep never re-introduces a miss over a completion.
    ledger.sweep(&tenant()).unwrap();
    assert_eq!(markers_of(&conn, "t1").completed(), vec![t("09:00")]);
}

#[test]
fn completion_keeps_started_timestamp_and_first_completion() {
    let conn = open_db_in_memory().unwrap();
    let clock = FixedClock::at_utc(at("09:05"));
    let ledger = ledger(&conn, &clock);
    let task_id = TaskId::new("t1").unwrap();

    assert!(ledger.record_start(&task_id, t("09:00")).unwrap());
    assert!(!ledger.record_start(&task_id, t("09:00")).unwrap());
    let started_at = clock_millis(&clock);

    clock.advance(Duration::minutes(10));
    let first = ledger.record_completion(&task_id, t("09:00")).unwrap();
    clock.advance(Duration::minutes(10));
    let second = ledger.record_completion(&task_id, t("09:00")).unwrap();

    assert_eq!(
        first,
        LedgerEntry::Completed {
            started_at: Some(started_at),
            completed_at: started_at + 10 * 60 * 1000,
        }
    );
    assert_eq!(first, second);
}

#[test]
fn expired_started_marker_becomes_exactly_one_missed() {
    let conn = open_db_in_memory().unwrap();
    seed(
        &conn,
        &[daily_task("t1", &["09:00", "10:00"], 15, OverallTaskState::Accepted)],
    );
    let clock = FixedClock::at_utc(at("09:10"));
    let ledger = ledger(&conn, &clock);
    ledger
        .record_start(&TaskId::new("t1").unwrap(), t("09:00"))
        .unwrap();

    clock.set_local(at("09:40"));
    let report = ledger.sweep(&tenant()).unwrap();
    assert_eq!(report.counters.started_expired, 0);
    assert_eq!(markers_of(&conn, "t1").started(), vec![t("09:00")]);

    clock.set_local(at("09:45"));
    let report = ledger.sweep(&tenant()).unwrap();
    assert_eq!(report.counters.started_expired, 1);
    let markers = markers_of(&conn, "t1");
    assert!(markers.started().is_empty());
    assert_eq!(markers.missed(), vec![t("09:00")]);

    let report = ledger.sweep(&tenant()).unwrap();
    assert_eq!(report.counters.started_expired, 0);
    assert_eq!(report.counters.missed_recorded, 0);
    assert_eq!(markers_of(&conn, "t1"), markers);
}

#[test]
fn markers_are_tracked_per_calendar_date() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn, &[daily_task("t1", &["09:00"], 15, OverallTaskState::Accepted)]);
    let clock = FixedClock::at_utc(at("12:00"));
    let ledger = ledger(&conn, &clock);

    ledger.sweep(&tenant()).unwrap();
    clock.advance(Duration::days(1));
    let report = ledger.sweep(&tenant()).unwrap();

    assert_eq!(report.counters.missed_recorded, 1);
    let next_day = SqliteMarkerRepository::new(&conn)
        .get_markers(&TaskId::new("t1").unwrap(), today().succ_opt().unwrap())
        .unwrap();
    assert_eq!(next_day.missed(), vec![t("09:00")]);
    assert_eq!(markers_of(&conn, "t1").missed(), vec![t("09:00")]);
}

#[test]
fn late_slot_is_recorded_missed_after_midnight() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn, &[daily_task("t1", &["23:30"], 15, OverallTaskState::Accepted)]);
    let clock = FixedClock::at_utc(at("23:00"));
    let ledger = ledger(&conn, &clock);

    // Sweep every minute from 23:00 through 01:00 the next day.
    for _ in 0..=120 {
        ledger.sweep(&tenant()).unwrap();
        clock.advance(Duration::minutes(1));
    }

    assert_eq!(markers_of(&conn, "t1").missed(), vec![t("23:30")]);
    let next_day = SqliteMarkerRepository::new(&conn)
        .get_markers(&TaskId::new("t1").unwrap(), today().succ_opt().unwrap())
        .unwrap();
    assert!(next_day.is_empty());
}

#[test]
fn late_started_marker_expires_after_midnight() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn, &[daily_task("t1", &["23:30"], 15, OverallTaskState::Accepted)]);
    let clock = FixedClock::at_utc(at("23:31"));
    let ledger = ledger(&conn, &clock);
    ledger
        .record_start(&TaskId::new("t1").unwrap(), t("23:30"))
        .unwrap();

    clock.set_local(t("00:29").on(today().succ_opt().unwrap()));
    let report = ledger.sweep(&tenant()).unwrap();
    assert_eq!(report.counters.started_expired, 0);

    clock.advance(Duration::minutes(1));
    let report = ledger.sweep(&tenant()).unwrap();
    assert_eq!(report.counters.started_expired, 1);
    let markers = markers_of(&conn, "t1");
    assert!(markers.started().is_empty());
    assert_eq!(markers.missed(), vec![t("23:30")]);
}

#[test]
fn carried_over_sweep_leaves_earlier_slots_of_yesterday_alone() {
    let conn = open_db_in_memory().unwrap();
    seed(
        &conn,
        &[daily_task("t1", &["08:00", "23:30"], 15, OverallTaskState::Accepted)],
    );
    // First pass ever runs just after midnight; only the late slot carries over.
    let clock = FixedClock::at_utc(t("00:45").on(today().succ_opt().unwrap()));

    let report = ledger(&conn, &clock).sweep(&tenant()).unwrap();

    assert_eq!(report.counters.missed_recorded, 1);
    assert_eq!(markers_of(&conn, "t1").missed(), vec![t("23:30")]);
}

#[test]
fn weekly_carry_over_uses_yesterdays_weekday() {
    let conn = open_db_in_memory().unwrap();
    let mut days = BTreeMap::new();
    days.insert(Weekday::Monday, vec![t("23:45")]);
    days.insert(Weekday::Tuesday, vec![t("23:50")]);
    let weekly = RecurringTask {
        id: TaskId::new("w1").unwrap(),
        tenant: tenant(),
        title: "closing".to_string(),
        schedule: Schedule::Weekly(days),
        tolerance_minutes: 10,
        overall: OverallTaskState::Accepted,
    };
    seed(&conn, &[weekly]);
    // Tuesday 00:50: Monday's 23:45 slot passed its grace at 00:45.
    let clock = FixedClock::at_utc(t("00:50").on(today().succ_opt().unwrap()));

    ledger(&conn, &clock).weekly_sweep(&tenant()).unwrap();

    assert_eq!(markers_of(&conn, "w1").missed(), vec![t("23:45")]);
}

#[test]
fn weekly_sweep_uses_only_todays_weekday_times() {
    let conn = open_db_in_memory().unwrap();
    let mut days = BTreeMap::new();
    days.insert(Weekday::Monday, vec![t("08:00")]);
    days.insert(Weekday::Tuesday, vec![t("07:00"), t("09:00")]);
    let weekly = RecurringTask {
        id: TaskId::new("w1").unwrap(),
        tenant: tenant(),
        title: "weekly".to_string(),
        schedule: Schedule::Weekly(days),
        tolerance_minutes: 15,
        overall: OverallTaskState::Accepted,
    };
    seed(
        &conn,
        &[weekly, daily_task("d1", &["08:00"], 15, OverallTaskState::Accepted)],
    );
    let clock = FixedClock::at_utc(at("12:00"));
    let ledger = ledger(&conn, &clock);

    let report = ledger.weekly_sweep(&tenant()).unwrap();

    assert_eq!(report.mode, SweepMode::Weekly);
    assert_eq!(report.counters.tasks_evaluated, 1);
    assert_eq!(markers_of(&conn, "w1").missed(), vec![t("08:00")]);
    // Daily tasks belong to the daily sweep.
    assert!(markers_of(&conn, "d1").is_empty());
}

#[test]
fn expired_deadline_abandons_pass_before_any_task() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn, &[daily_task("t1", &["09:00"], 15, OverallTaskState::Accepted)]);
    let clock = FixedClock::at_utc(at("12:00"));

    let err = ledger(&conn, &clock)
        .run_pass(&tenant(), SweepMode::Daily, Some(Instant::now()))
        .unwrap_err();

    assert!(matches!(err, SweepError::TimedOut { .. }));
    assert_eq!(err.partial_counters().tasks_evaluated, 0);
    assert!(markers_of(&conn, "t1").is_empty());
}

#[test]
fn task_status_reads_markers_without_writing() {
    let conn = open_db_in_memory().unwrap();
    let task = daily_task("t1", &["09:00", "10:00"], 15, OverallTaskState::Accepted);
    seed(&conn, &[task.clone()]);
    let clock = FixedClock::at_utc(at("09:46"));
    let ledger = ledger(&conn, &clock);

    assert_eq!(ledger.task_status(&task), (Status::Approaching, Some(t("10:00"))));
    assert_eq!(
        ledger.occurrence_statuses(&task),
        vec![(t("09:00"), Status::Missed), (t("10:00"), Status::Approaching)]
    );
    assert!(markers_of(&conn, "t1").is_empty());
}

struct FailingLookupRepo<'conn> {
    inner: SqliteMarkerRepository<'conn>,
}

impl MarkerRepository for FailingLookupRepo<'_> {
    fn get_markers(&self, _task_id: &TaskId, _date: NaiveDate) -> RepoResult<OccurrenceMarkers> {
        Err(RepoError::InvalidData("lookup unavailable".to_string()))
    }

    fn get_entry(&self, key: &OccurrenceKey) -> RepoResult<Option<LedgerEntry>> {
        self.inner.get_entry(key)
    }

    fn insert_missed_if_absent(&self, key: &OccurrenceKey, missed_at: Timestamp) -> RepoResult<bool> {
        self.inner.insert_missed_if_absent(key, missed_at)
    }

    fn expire_started(&self, key: &OccurrenceKey, missed_at: Timestamp) -> RepoResult<bool> {
        self.inner.expire_started(key, missed_at)
    }

    fn record_start(&self, key: &OccurrenceKey, started_at: Timestamp) -> RepoResult<bool> {
        self.inner.record_start(key, started_at)
    }

    fn record_completion(&self, key: &OccurrenceKey, completed_at: Timestamp) -> RepoResult<LedgerEntry> {
        self.inner.record_completion(key, completed_at)
    }
}

#[test]
fn marker_lookup_failure_is_soft_and_never_overwrites_completion() {
    let conn = open_db_in_memory().unwrap();
    seed(
        &conn,
        &[daily_task("t1", &["08:00", "09:00"], 10, OverallTaskState::Accepted)],
    );
    let clock = FixedClock::at_utc(at("08:20"));
    SqliteMarkerRepository::new(&conn)
        .record_completion(&key("t1", "08:00"), 1)
        .unwrap();

    clock.set_local(at("11:00"));
    let failing = MissedTaskLedger::new(
        FailingLookupRepo {
            inner: SqliteMarkerRepository::new(&conn),
        },
        SqliteTaskRepository::new(&conn),
        &clock,
    );
    let report = failing.sweep(&tenant()).unwrap();

    assert_eq!(report.counters.lookup_failures, 1);
    assert_eq!(report.counters.missed_recorded, 1);
    let markers = markers_of(&conn, "t1");
    assert_eq!(markers.completed(), vec![t("08:00")]);
    assert_eq!(markers.missed(), vec![t("09:00")]);
}

struct BrokenTaskSource;

impl shiftwatch_core::TaskDefinitionSource for BrokenTaskSource {
    fn list_tasks(&self, _tenant: &TenantId) -> RepoResult<Vec<RecurringTask>> {
        Err(RepoError::InvalidData("task store offline".to_string()))
    }
}

#[test]
fn task_lookup_failure_aborts_the_pass() {
    let conn = open_db_in_memory().unwrap();
    let clock = FixedClock::at_utc(at("11:00"));
    let ledger = MissedTaskLedger::new(SqliteMarkerRepository::new(&conn), BrokenTaskSource, &clock);

    let err = ledger.sweep(&tenant()).unwrap_err();
    assert!(matches!(err, SweepError::TaskLookupFailed { .. }));
}

fn clock_millis(clock: &FixedClock) -> i64 {
    use shiftwatch_core::Clock;
    clock.now_millis()
}
