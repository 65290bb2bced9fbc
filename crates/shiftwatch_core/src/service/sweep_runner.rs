//! Periodic sweep driver.
//!
//! # Responsibility
//! - Run the daily and weekly sweep for every configured tenant per tick.
//! - Bound each tenant's work with a deadline and record an audit row.
//!
//! # Invariants
//! - One tenant's failure or timeout never skips the remaining tenants.
//! - A timed-out pass is abandoned and simply retried on the next tick.

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::model::sweep::{SweepMode, SweepOutcome, SweepRunRecord};
use crate::model::task::TenantId;
use crate::repo::marker_repo::SqliteMarkerRepository;
use crate::repo::sweep_run_repo::SqliteSweepRunRepository;
use crate::repo::task_repo::SqliteTaskRepository;
use crate::service::ledger_service::{MissedTaskLedger, SweepError};
use log::{info, warn};
use rusqlite::Connection;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Drives ledger sweeps on a fixed cadence against one SQLite database.
pub struct SweepRunner<C: Clock> {
    conn: Connection,
    clock: C,
    tenants: Vec<TenantId>,
    interval: Duration,
    tenant_timeout: Duration,
}

impl<C: Clock> SweepRunner<C> {
    pub fn new(
        conn: Connection,
        clock: C,
        tenants: Vec<TenantId>,
        interval: Duration,
        tenant_timeout: Duration,
    ) -> Self {
        Self {
            conn,
            clock,
            tenants,
            interval,
            tenant_timeout,
        }
    }

    /// Builds a runner from validated engine configuration.
    pub fn from_config(conn: Connection, clock: C, config: &EngineConfig) -> Self {
        Self::new(
            conn,
            clock,
            config.tenants.clone(),
            Duration::from_secs(config.sweep_interval_secs),
            Duration::from_secs(config.sweep_timeout_secs),
        )
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Runs one tick over every tenant and returns the audit records.
    pub fn run_once(&self) -> Vec<SweepRunRecord> {
        let mut records = Vec::with_capacity(self.tenants.len() * 2);
        for tenant in &self.tenants {
            let deadline = Instant::now() + self.tenant_timeout;
            for mode in [SweepMode::Daily, SweepMode::Weekly] {
                records.push(self.run_tenant_pass(tenant, mode, deadline));
            }
        }
        records
    }

    /// Ticks until `stop` is set, sleeping `interval` between ticks.
    pub fn run_until(&self, stop: &AtomicBool) {
        info!(
            "event=sweep_runner module=runner status=start tenants={} interval_secs={} timeout_secs={}",
            self.tenants.len(),
            self.interval.as_secs(),
            self.tenant_timeout.as_secs()
        );

        while !stop.load(Ordering::SeqCst) {
            let tick_started = Instant::now();
            self.run_once();

            let next_tick = tick_started + self.interval;
            while !stop.load(Ordering::SeqCst) {
                let now = Instant::now();
                if now >= next_tick {
                    break;
                }
                std::thread::sleep(STOP_POLL_INTERVAL.min(next_tick - now));
            }
        }

        info!("event=sweep_runner module=runner status=stopped");
    }

    fn run_tenant_pass(&self, tenant: &TenantId, mode: SweepMode, deadline: Instant) -> SweepRunRecord {
        let ledger = MissedTaskLedger::new(
            SqliteMarkerRepository::new(&self.conn),
            SqliteTaskRepository::new(&self.conn),
            &self.clock,
        );

        let started_at = self.clock.now_millis();
        let started = Instant::now();
        let result = ledger.run_pass(tenant, mode, Some(deadline));
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let record = match result {
            Ok(report) => SweepRunRecord {
                sweep_id: report.sweep_id,
                tenant: tenant.clone(),
                mode,
                started_at,
                duration_ms,
                outcome: SweepOutcome::Ok,
                counters: report.counters,
            },
            Err(err) => SweepRunRecord {
                sweep_id: err.sweep_id(),
                tenant: tenant.clone(),
                mode,
                started_at,
                duration_ms,
                outcome: match err {
                    SweepError::TimedOut { .. } => SweepOutcome::TimedOut,
                    SweepError::TaskLookupFailed { .. } => SweepOutcome::Failed,
                },
                counters: err.partial_counters(),
            },
        };

        if let Err(err) = SqliteSweepRunRepository::new(&self.conn).record_run(&record) {
            warn!(
                "event=sweep_audit module=runner status=error sweep_id={} tenant={} error_code=audit_write_failed error={}",
                record.sweep_id, tenant, err
            );
        }

        record
    }
}
