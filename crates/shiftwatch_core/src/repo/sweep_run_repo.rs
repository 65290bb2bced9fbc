//! Sweep run audit trail.

use crate::model::sweep::{SweepCounters, SweepMode, SweepOutcome, SweepRunRecord};
use crate::model::task::TenantId;
use crate::repo::{RepoError, RepoResult};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

const RECENT_RUNS_LIMIT_MAX: u32 = 500;

/// SQLite-backed sweep run history.
pub struct SqliteSweepRunRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteSweepRunRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn record_run(&self, record: &SweepRunRecord) -> RepoResult<()> {
        let duration_ms = i64::try_from(record.duration_ms).unwrap_or(i64::MAX);
        self.conn.execute(
            "INSERT INTO sweep_runs (
                sweep_id,
                tenant_id,
                mode,
                started_at,
                duration_ms,
                outcome,
                tasks_evaluated,
                missed_recorded,
                started_expired,
                lookup_failures,
                write_failures
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11);",
            params![
                record.sweep_id.to_string(),
                record.tenant.as_str(),
                record.mode.as_str(),
                record.started_at,
                duration_ms,
                record.outcome.as_str(),
                record.counters.tasks_evaluated,
                record.counters.missed_recorded,
                record.counters.started_expired,
                record.counters.lookup_failures,
                record.counters.write_failures,
            ],
        )?;
        Ok(())
    }

    /// Lists the newest runs for a tenant, newest first.
    pub fn list_recent(&self, tenant: &TenantId, limit: u32) -> RepoResult<Vec<SweepRunRecord>> {
        let limit = limit.clamp(1, RECENT_RUNS_LIMIT_MAX);
        let mut stmt = self.conn.prepare(
            "SELECT
                sweep_id,
                tenant_id,
                mode,
                started_at,
                duration_ms,
                outcome,
                tasks_evaluated,
                missed_recorded,
                started_expired,
                lookup_failures,
                write_failures
             FROM sweep_runs
             WHERE tenant_id = ?1
             ORDER BY started_at DESC, sweep_id ASC
             LIMIT ?2;",
        )?;

        let mut rows = stmt.query(params![tenant.as_str(), limit])?;
        let mut runs = Vec::new();
        while let Some(row) = rows.next()? {
            runs.push(parse_run_row(row)?);
        }
        Ok(runs)
    }
}

fn parse_run_row(row: &Row<'_>) -> RepoResult<SweepRunRecord> {
    let id_text: String = row.get("sweep_id")?;
    let sweep_id = Uuid::parse_str(&id_text).map_err(|_| {
        RepoError::InvalidData(format!("invalid uuid `{id_text}` in sweep_runs.sweep_id"))
    })?;

    let mode_text: String = row.get("mode")?;
    let mode = SweepMode::parse(&mode_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid mode `{mode_text}` in sweep_runs.mode"))
    })?;

    let outcome_text: String = row.get("outcome")?;
    let outcome = SweepOutcome::parse(&outcome_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid outcome `{outcome_text}` in sweep_runs.outcome"
        ))
    })?;

    let duration_ms: i64 = row.get("duration_ms")?;

    Ok(SweepRunRecord {
        sweep_id,
        tenant: TenantId::new(row.get::<_, String>("tenant_id")?)?,
        mode,
        started_at: row.get("started_at")?,
        duration_ms: u64::try_from(duration_ms).unwrap_or(0),
        outcome,
        counters: SweepCounters {
            tasks_evaluated: row.get("tasks_evaluated")?,
            missed_recorded: row.get("missed_recorded")?,
            started_expired: row.get("started_expired")?,
            lookup_failures: row.get("lookup_failures")?,
            write_failures: row.get("write_failures")?,
        },
    })
}
