//! Occurrence marker repository.
//!
//! # Responsibility
//! - Read one task's markers for one calendar day.
//! - Apply the started/completed/missed transitions as keyed writes.
//!
//! # Invariants
//! - `insert_missed_if_absent` never overwrites an existing entry, so a
//!   completion that landed first always survives.
//! - `record_completion` replaces a `Missed` or `Started` entry
//!   unconditionally; completion wins.
//! - `expire_started` only acts on an entry that is still `Started`.

use crate::clock::date_key;
use crate::model::ledger::{LedgerEntry, OccurrenceKey, OccurrenceMarkers, Timestamp};
use crate::model::task::TaskId;
use crate::model::time_of_day::TimeOfDay;
use crate::repo::{RepoError, RepoResult};
use chrono::NaiveDate;
use rusqlite::{params, Connection, Row};

const MARKER_SELECT_SQL: &str = "SELECT
    time_of_day,
    kind,
    started_at,
    completed_at,
    missed_at
FROM occurrence_markers";

/// Persistence seam for occurrence markers.
pub trait MarkerRepository {
    /// Returns every marker of `task_id` on `date`.
    fn get_markers(&self, task_id: &TaskId, date: NaiveDate) -> RepoResult<OccurrenceMarkers>;

    /// Returns the single entry stored for `key`, if any.
    fn get_entry(&self, key: &OccurrenceKey) -> RepoResult<Option<LedgerEntry>>;

    /// Writes `Missed` when the key has no entry. Returns whether it wrote.
    fn insert_missed_if_absent(&self, key: &OccurrenceKey, missed_at: Timestamp)
        -> RepoResult<bool>;

    /// Deletes a `Started` entry and replaces it with `Missed`.
    ///
    /// Returns `false` when the entry is no longer `Started`.
    fn expire_started(&self, key: &OccurrenceKey, missed_at: Timestamp) -> RepoResult<bool>;

    /// Writes `Started` when the key has no entry. Returns whether it wrote.
    fn record_start(&self, key: &OccurrenceKey, started_at: Timestamp) -> RepoResult<bool>;

    /// Writes `Completed`, replacing `Started` or `Missed`.
    ///
    /// An existing `Completed` entry is kept as-is. Returns the stored entry.
    fn record_completion(
        &self,
        key: &OccurrenceKey,
        completed_at: Timestamp,
    ) -> RepoResult<LedgerEntry>;
}

/// SQLite-backed marker repository.
pub struct SqliteMarkerRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteMarkerRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl MarkerRepository for SqliteMarkerRepository<'_> {
    fn get_markers(&self, task_id: &TaskId, date: NaiveDate) -> RepoResult<OccurrenceMarkers> {
        let mut stmt = self.conn.prepare(&format!(
            "{MARKER_SELECT_SQL}
             WHERE task_id = ?1
               AND occurrence_date = ?2
             ORDER BY time_of_day ASC;"
        ))?;

        let mut rows = stmt.query(params![task_id.as_str(), date_key(date)])?;
        let mut markers = OccurrenceMarkers::new();
        while let Some(row) = rows.next()? {
            let (time, entry) = parse_marker_row(row)?;
            markers.insert(time, entry);
        }

        Ok(markers)
    }

    fn get_entry(&self, key: &OccurrenceKey) -> RepoResult<Option<LedgerEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "{MARKER_SELECT_SQL}
             WHERE task_id = ?1
               AND occurrence_date = ?2
               AND time_of_day = ?3;"
        ))?;

        let (task_id, date, time) = key_params(key);
        let mut rows = stmt.query(params![task_id, date, time])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_marker_row(row)?.1)),
            None => Ok(None),
        }
    }

    fn insert_missed_if_absent(
        &self,
        key: &OccurrenceKey,
        missed_at: Timestamp,
    ) -> RepoResult<bool> {
        let (task_id, date, time) = key_params(key);
        let inserted = self.conn.execute(
            "INSERT INTO occurrence_markers (
                task_id,
                occurrence_date,
                time_of_day,
                kind,
                missed_at
            ) VALUES (?1, ?2, ?3, 'missed', ?4)
            ON CONFLICT (task_id, occurrence_date, time_of_day) DO NOTHING;",
            params![task_id, date, time, missed_at],
        )?;

        Ok(inserted == 1)
    }

    fn expire_started(&self, key: &OccurrenceKey, missed_at: Timestamp) -> RepoResult<bool> {
        let (task_id, date, time) = key_params(key);
        let tx = self.conn.unchecked_transaction()?;

        let deleted = tx.execute(
            "DELETE FROM occurrence_markers
             WHERE task_id = ?1
               AND occurrence_date = ?2
               AND time_of_day = ?3
               AND kind = 'started';",
            params![task_id, date, time],
        )?;
        if deleted == 0 {
            tx.rollback()?;
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO occurrence_markers (
                task_id,
                occurrence_date,
                time_of_day,
                kind,
                missed_at
            ) VALUES (?1, ?2, ?3, 'missed', ?4);",
            params![task_id, date, time, missed_at],
        )?;
        tx.commit()?;

        Ok(true)
    }

    fn record_start(&self, key: &OccurrenceKey, started_at: Timestamp) -> RepoResult<bool> {
        let (task_id, date, time) = key_params(key);
        let inserted = self.conn.execute(
            "INSERT INTO occurrence_markers (
                task_id,
                occurrence_date,
                time_of_day,
                kind,
                started_at
            ) VALUES (?1, ?2, ?3, 'started', ?4)
            ON CONFLICT (task_id, occurrence_date, time_of_day) DO NOTHING;",
            params![task_id, date, time, started_at],
        )?;

        Ok(inserted == 1)
    }

    fn record_completion(
        &self,
        key: &OccurrenceKey,
        completed_at: Timestamp,
    ) -> RepoResult<LedgerEntry> {
        let (task_id, date, time) = key_params(key);
        self.conn.execute(
            "INSERT INTO occurrence_markers (
                task_id,
                occurrence_date,
                time_of_day,
                kind,
                completed_at
            ) VALUES (?1, ?2, ?3, 'completed', ?4)
            ON CONFLICT (task_id, occurrence_date, time_of_day) DO UPDATE SET
                kind = 'completed',
                started_at = CASE
                    WHEN occurrence_markers.kind = 'started' THEN occurrence_markers.started_at
                    ELSE NULL
                END,
                completed_at = excluded.completed_at,
                missed_at = NULL
            WHERE occurrence_markers.kind != 'completed';",
            params![task_id, date, time, completed_at],
        )?;

        self.get_entry(key)?.ok_or_else(|| {
            RepoError::InvalidData(format!("completion for {key} not found in read-back"))
        })
    }
}

fn key_params(key: &OccurrenceKey) -> (String, String, String) {
    (
        key.task_id.as_str().to_string(),
        date_key(key.date),
        key.time.to_string(),
    )
}

fn parse_marker_row(row: &Row<'_>) -> RepoResult<(TimeOfDay, LedgerEntry)> {
    let time_text: String = row.get("time_of_day")?;
    let time = TimeOfDay::parse(&time_text).map_err(|_| {
        RepoError::InvalidData(format!(
            "invalid time `{time_text}` in occurrence_markers.time_of_day"
        ))
    })?;

    let kind: String = row.get("kind")?;
    let started_at: Option<Timestamp> = row.get("started_at")?;
    let completed_at: Option<Timestamp> = row.get("completed_at")?;
    let missed_at: Option<Timestamp> = row.get("missed_at")?;

    let entry = match (kind.as_str(), started_at, completed_at, missed_at) {
        ("started", Some(started_at), _, _) => LedgerEntry::Started { started_at },
        ("completed", started_at, Some(completed_at), _) => LedgerEntry::Completed {
            started_at,
            completed_at,
        },
        ("missed", _, _, Some(missed_at)) => LedgerEntry::Missed { missed_at },
        _ => {
            return Err(RepoError::InvalidData(format!(
                "inconsistent marker `{kind}` at {time_text} in occurrence_markers"
            )));
        }
    };

    Ok((time, entry))
}
