//! Recurring task definitions as read by the ledger.
//!
//! Task CRUD belongs to the task-management collaborator; this repository
//! only stores what the sweep consumes and exposes an upsert for seeding
//! and synchronization.

use crate::model::schedule::Schedule;
use crate::model::task::{OverallTaskState, RecurringTask, TaskId, TenantId};
use crate::repo::{RepoError, RepoResult};
use rusqlite::{params, Connection, Row};

const TASK_SELECT_SQL: &str = "SELECT
    task_id,
    tenant_id,
    title,
    schedule_json,
    tolerance_minutes,
    overall_status
FROM recurring_tasks";

/// Supplies the recurring tasks of one tenant.
pub trait TaskDefinitionSource {
    fn list_tasks(&self, tenant: &TenantId) -> RepoResult<Vec<RecurringTask>>;
}

/// SQLite-backed recurring task repository.
pub struct SqliteTaskRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTaskRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Inserts or replaces one task definition.
    pub fn upsert_task(&self, task: &RecurringTask) -> RepoResult<()> {
        let schedule_json = serde_json::to_string(&task.schedule)
            .map_err(|err| RepoError::InvalidData(format!("schedule encode failed: {err}")))?;

        self.conn.execute(
            "INSERT INTO recurring_tasks (
                task_id,
                tenant_id,
                title,
                schedule_json,
                tolerance_minutes,
                overall_status
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (task_id) DO UPDATE SET
                tenant_id = excluded.tenant_id,
                title = excluded.title,
                schedule_json = excluded.schedule_json,
                tolerance_minutes = excluded.tolerance_minutes,
                overall_status = excluded.overall_status,
                updated_at = (strftime('%s', 'now') * 1000);",
            params![
                task.id.as_str(),
                task.tenant.as_str(),
                task.title.as_str(),
                schedule_json,
                i64::from(task.tolerance_minutes),
                task.overall.as_str(),
            ],
        )?;

        Ok(())
    }

    pub fn get_task(&self, task_id: &TaskId) -> RepoResult<Option<RecurringTask>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{TASK_SELECT_SQL} WHERE task_id = ?1;"))?;
        let mut rows = stmt.query([task_id.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_task_row(row)?)),
            None => Ok(None),
        }
    }
}

impl TaskDefinitionSource for SqliteTaskRepository<'_> {
    fn list_tasks(&self, tenant: &TenantId) -> RepoResult<Vec<RecurringTask>> {
        let mut stmt = self.conn.prepare(&format!(
            "{TASK_SELECT_SQL}
             WHERE tenant_id = ?1
             ORDER BY task_id ASC;"
        ))?;

        let mut rows = stmt.query([tenant.as_str()])?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next()? {
            tasks.push(parse_task_row(row)?);
        }

        Ok(tasks)
    }
}

fn parse_task_row(row: &Row<'_>) -> RepoResult<RecurringTask> {
    let id = TaskId::new(row.get::<_, String>("task_id")?)?;
    let tenant = TenantId::new(row.get::<_, String>("tenant_id")?)?;

    // Malformed times are rejected here, before the evaluator sees them.
    let schedule_json: String = row.get("schedule_json")?;
    let schedule: Schedule = serde_json::from_str(&schedule_json).map_err(|err| {
        RepoError::InvalidData(format!(
            "invalid schedule for task `{id}` in recurring_tasks.schedule_json: {err}"
        ))
    })?;

    let tolerance_raw: i64 = row.get("tolerance_minutes")?;
    let tolerance_minutes = u32::try_from(tolerance_raw).map_err(|_| {
        RepoError::InvalidData(format!(
            "invalid tolerance `{tolerance_raw}` for task `{id}` in recurring_tasks.tolerance_minutes"
        ))
    })?;

    let overall_text: String = row.get("overall_status")?;
    let overall = OverallTaskState::parse(&overall_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid overall status `{overall_text}` in recurring_tasks.overall_status"
        ))
    })?;

    Ok(RecurringTask {
        id,
        tenant,
        title: row.get("title")?,
        schedule,
        tolerance_minutes,
        overall,
    })
}
