//! Command-line entry point for the sweep engine.
//!
//! # Responsibility
//! - Load engine config and wire logging, storage, and clock.
//! - Expose the periodic runner, a one-shot sweep, and a status report.

use clap::{Parser, Subcommand};
use log::{info, warn};
use shiftwatch_core::db::open_db;
use shiftwatch_core::{
    init_logging, EngineConfig, MissedTaskLedger, SqliteMarkerRepository,
    SqliteTaskRepository, SweepRunner, TaskId, TenantId,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Recurring-task window status engine and missed-task ledger.
#[derive(Parser, Debug)]
#[command(name = "shiftwatch", version, about)]
struct Cli {
    /// Path to the engine JSON config file.
    #[arg(long, global = true, env = "SHIFTWATCH_CONFIG", default_value = "shiftwatch.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sweep every configured tenant on the configured cadence until SIGINT or SIGTERM.
    Run,
    /// Run a single daily and weekly pass and print the audit records.
    Sweep {
        /// Restrict the pass to one tenant instead of all configured tenants.
        #[arg(long)]
        tenant: Option<String>,
    },
    /// Print the aggregate and per-occurrence status of one task.
    Status {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        task: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("shiftwatch: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let config = EngineConfig::load(&cli.config).map_err(|err| err.to_string())?;
    if let Some(log) = &config.log {
        init_logging(log).map_err(|err| err.to_string())?;
    }

    match cli.command {
        Command::Run => run_forever(config),
        Command::Sweep { tenant } => sweep_once(config, tenant),
        Command::Status { tenant, task } => print_status(&config, &tenant, &task),
    }
}

fn run_forever(config: EngineConfig) -> Result<(), String> {
    let conn = open_db(&config.db_path).map_err(|err| err.to_string())?;
    let clock = config.build_clock().map_err(|err| err.to_string())?;
    info!(
        "event=engine_start module=cli status=ok db_path={} tenants={}",
        config.db_path.display(),
        config.tenants.len()
    );

    let stop = Arc::new(AtomicBool::new(false));
    spawn_shutdown_listener(Arc::clone(&stop))?;
    SweepRunner::from_config(conn, clock, &config).run_until(&stop);
    Ok(())
}

/// Sets `stop` once the process receives SIGINT or SIGTERM.
///
/// The runner finishes its current tick before observing the flag.
fn spawn_shutdown_listener(stop: Arc<AtomicBool>) -> Result<(), String> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| format!("failed to build signal runtime: {err}"))?;

    std::thread::Builder::new()
        .name("shutdown-signal".to_string())
        .spawn(move || {
            let signal = runtime.block_on(wait_for_shutdown());
            info!("event=shutdown_requested module=cli status=ok signal={signal}");
            stop.store(true, Ordering::SeqCst);
        })
        .map_err(|err| format!("failed to spawn signal listener: {err}"))?;
    Ok(())
}

async fn wait_for_shutdown() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                return tokio::select! {
                    _ = tokio::signal::ctrl_c() => "sigint",
                    _ = sigterm.recv() => "sigterm",
                };
            }
            Err(err) => warn!(
                "event=shutdown_listener module=cli status=error error_code=sigterm_unavailable error={err}"
            ),
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => "sigint",
        Err(err) => {
            warn!(
                "event=shutdown_listener module=cli status=error error_code=sigint_unavailable error={err}"
            );
            // Without a signal source the process runs until killed.
            std::future::pending::<&'static str>().await
        }
    }
}

fn sweep_once(mut config: EngineConfig, tenant: Option<String>) -> Result<(), String> {
    if let Some(raw) = tenant {
        config.tenants = vec![TenantId::new(raw).map_err(|err| err.to_string())?];
    }

    let conn = open_db(&config.db_path).map_err(|err| err.to_string())?;
    let clock = config.build_clock().map_err(|err| err.to_string())?;
    let runner = SweepRunner::from_config(conn, clock, &config);

    for record in runner.run_once() {
        let c = record.counters;
        println!(
            "sweep_id={} tenant={} mode={} outcome={} duration_ms={} evaluated={} missed_recorded={} started_expired={} lookup_failures={} write_failures={}",
            record.sweep_id,
            record.tenant,
            record.mode.as_str(),
            record.outcome.as_str(),
            record.duration_ms,
            c.tasks_evaluated,
            c.missed_recorded,
            c.started_expired,
            c.lookup_failures,
            c.write_failures
        );
    }
    Ok(())
}

fn print_status(config: &EngineConfig, tenant: &str, task: &str) -> Result<(), String> {
    let tenant = TenantId::new(tenant).map_err(|err| err.to_string())?;
    let task_id = TaskId::new(task).map_err(|err| err.to_string())?;

    let conn = open_db(&config.db_path).map_err(|err| err.to_string())?;
    let clock = config.build_clock().map_err(|err| err.to_string())?;
    let tasks = SqliteTaskRepository::new(&conn);
    let task = tasks
        .get_task(&task_id)
        .map_err(|err| err.to_string())?
        .filter(|task| task.tenant == tenant)
        .ok_or_else(|| format!("task `{task_id}` not found for tenant `{tenant}`"))?;

    let ledger = MissedTaskLedger::new(SqliteMarkerRepository::new(&conn), tasks, &clock);
    let (status, time) = ledger.task_status(&task);
    println!(
        "task={} overall={} status={} time={}",
        task.id,
        task.overall.as_str(),
        status,
        time.map_or_else(|| "-".to_string(), |time| time.to_string())
    );
    for (time, status) in ledger.occurrence_statuses(&task) {
        println!("  {time} {status}");
    }
    Ok(())
}
