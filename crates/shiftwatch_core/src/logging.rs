//! Rolling file logging for the sweep engine.
//!
//! # Responsibility
//! - Start the file logger once per process from the `log` config section.
//! - Tag panic events with the sweep pass running on the panicking thread.
//!
//! # Invariants
//! - Re-initialization with an identical `LogConfig` is a no-op.
//! - Re-initialization with any other `LogConfig` is rejected.
//! - HTTP and SQLite dependencies never log below `warn`.

use crate::config::LogConfig;
use crate::model::sweep::SweepMode;
use crate::model::task::TenantId;
use flexi_logger::{
    Cleanup, Criterion, FileSpec, FlexiLoggerError, LogSpecification, Logger, LoggerHandle,
    Naming, WriteMode,
};
use log::{error, info, LevelFilter};
use once_cell::sync::OnceCell;
use std::cell::RefCell;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::sync::Once;
use uuid::Uuid;

const LOG_FILE_BASENAME: &str = "shiftwatch";
const BYTES_PER_MB: u64 = 1024 * 1024;
const MAX_PANIC_PAYLOAD_CHARS: usize = 160;
const QUIET_MODULES: &[&str] = &["ureq", "rustls", "rusqlite"];

static ACTIVE: OnceCell<ActiveLogger> = OnceCell::new();
static PANIC_HOOK: Once = Once::new();

thread_local! {
    static SWEEP_CONTEXT: RefCell<Option<String>> = const { RefCell::new(None) };
}

struct ActiveLogger {
    config: LogConfig,
    _handle: LoggerHandle,
}

/// Logging bootstrap failure.
#[derive(Debug)]
pub enum LoggingError {
    CreateDir { path: PathBuf, source: std::io::Error },
    Backend(FlexiLoggerError),
    /// Logging is already running with different settings.
    Conflict { active: LogConfig, requested: LogConfig },
}

impl Display for LoggingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateDir { path, source } => {
                write!(f, "failed to create log directory `{}`: {source}", path.display())
            }
            Self::Backend(err) => write!(f, "failed to start logger: {err}"),
            Self::Conflict { active, requested } => write!(
                f,
                "logging already initialized at `{}` level {}; refusing to switch to `{}` level {}",
                active.dir.display(),
                active.level.as_str(),
                requested.dir.display(),
                requested.level.as_str()
            ),
        }
    }
}

impl Error for LoggingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::CreateDir { source, .. } => Some(source),
            Self::Backend(err) => Some(err),
            Self::Conflict { .. } => None,
        }
    }
}

impl From<FlexiLoggerError> for LoggingError {
    fn from(value: FlexiLoggerError) -> Self {
        Self::Backend(value)
    }
}

/// Starts rolling file logging for this process.
///
/// `config` is expected to have passed `EngineConfig::validate`.
pub fn init_logging(config: &LogConfig) -> Result<(), LoggingError> {
    let active = ACTIVE.get_or_try_init(|| start_logger(config))?;
    if active.config != *config {
        return Err(LoggingError::Conflict {
            active: active.config.clone(),
            requested: config.clone(),
        });
    }
    Ok(())
}

fn start_logger(config: &LogConfig) -> Result<ActiveLogger, LoggingError> {
    std::fs::create_dir_all(&config.dir).map_err(|source| LoggingError::CreateDir {
        path: config.dir.clone(),
        source,
    })?;

    let handle = Logger::with(log_spec(config.level.filter()))
        .log_to_file(
            FileSpec::default()
                .directory(config.dir.as_path())
                .basename(LOG_FILE_BASENAME),
        )
        .rotate(
            Criterion::Size(config.max_file_mb.saturating_mul(BYTES_PER_MB)),
            Naming::Numbers,
            Cleanup::KeepLogFiles(config.keep_files),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()?;

    PANIC_HOOK.call_once(install_panic_hook);

    info!(
        "event=engine_start module=logging status=ok version={} level={} log_dir={} max_file_mb={} keep_files={}",
        env!("CARGO_PKG_VERSION"),
        config.level.as_str(),
        config.dir.display(),
        config.max_file_mb,
        config.keep_files
    );

    Ok(ActiveLogger {
        config: config.clone(),
        _handle: handle,
    })
}

/// Engine modules log at `level`; chatty dependencies are capped at `warn`.
fn log_spec(level: LevelFilter) -> LogSpecification {
    let mut builder = LogSpecification::builder();
    builder.default(level);
    for module in QUIET_MODULES {
        builder.module(*module, level.min(LevelFilter::Warn));
    }
    builder.build()
}

/// Marks the current thread as running one sweep pass until dropped.
///
/// Scopes nest; dropping restores the enclosing context.
#[must_use]
pub struct SweepScope {
    previous: Option<String>,
}

pub fn enter_sweep(sweep_id: Uuid, tenant: &TenantId, mode: SweepMode) -> SweepScope {
    let context = format!("sweep_id={sweep_id} tenant={tenant} mode={}", mode.as_str());
    let previous = SWEEP_CONTEXT.with(|slot| slot.replace(Some(context)));
    SweepScope { previous }
}

impl Drop for SweepScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        SWEEP_CONTEXT.with(|slot| *slot.borrow_mut() = previous);
    }
}

/// `key=value` context of the sweep running on this thread, if any.
pub fn current_sweep_context() -> Option<String> {
    SWEEP_CONTEXT
        .try_with(|slot| slot.try_borrow().ok().and_then(|context| context.clone()))
        .ok()
        .flatten()
}

fn install_panic_hook() {
    let previous_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        error!(
            "event=panic_captured module=logging status=error thread={} location={} {} payload={}",
            std::thread::current().name().unwrap_or("unnamed"),
            location,
            current_sweep_context().unwrap_or_else(|| "sweep_id=-".to_string()),
            panic_payload_summary(panic_info)
        );
        previous_hook(panic_info);
    }));
}

fn panic_payload_summary(info: &std::panic::PanicHookInfo<'_>) -> String {
    let payload = info
        .payload()
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| info.payload().downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());

    single_line(&payload, MAX_PANIC_PAYLOAD_CHARS)
}

/// Payloads may embed task titles; keep them on one capped line.
fn single_line(value: &str, max_chars: usize) -> String {
    let flattened = value.replace(['\n', '\r'], " ");
    if flattened.chars().count() <= max_chars {
        return flattened;
    }
    let mut truncated: String = flattened.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use super::{current_sweep_context, enter_sweep, init_logging, log_spec, single_line, LoggingError};
    use crate::config::{LogConfig, LogLevel};
    use crate::model::sweep::SweepMode;
    use crate::model::task::TenantId;
    use log::LevelFilter;
    use uuid::Uuid;

    fn module_level(spec: &flexi_logger::LogSpecification, module: Option<&str>) -> LevelFilter {
        spec.module_filters()
            .iter()
            .find(|filter| filter.module_name.as_deref() == module)
            .map(|filter| filter.level_filter)
            .unwrap()
    }

    #[test]
    fn dependencies_are_capped_at_warn() {
        let spec = log_spec(LevelFilter::Debug);
        assert_eq!(module_level(&spec, None), LevelFilter::Debug);
        assert_eq!(module_level(&spec, Some("ureq")), LevelFilter::Warn);
        assert_eq!(module_level(&spec, Some("rusqlite")), LevelFilter::Warn);

        let spec = log_spec(LevelFilter::Error);
        assert_eq!(module_level(&spec, Some("ureq")), LevelFilter::Error);
    }

    #[test]
    fn single_line_flattens_and_caps() {
        assert_eq!(single_line("short", 8), "short");
        let flattened = single_line("line1\nline2\rline3", 8);
        assert_eq!(flattened, "line1 li...");
    }

    #[test]
    fn sweep_scopes_nest_and_restore() {
        assert_eq!(current_sweep_context(), None);
        let tenant = TenantId::new("acme").unwrap();
        let outer_id = Uuid::new_v4();

        let outer = enter_sweep(outer_id, &tenant, SweepMode::Daily);
        {
            let _inner = enter_sweep(Uuid::new_v4(), &tenant, SweepMode::Weekly);
            assert!(current_sweep_context().unwrap().ends_with("mode=weekly"));
        }
        assert_eq!(
            current_sweep_context().unwrap(),
            format!("sweep_id={outer_id} tenant=acme mode=daily")
        );
        drop(outer);
        assert_eq!(current_sweep_context(), None);
    }

    #[test]
    fn init_is_idempotent_for_same_config_and_rejects_conflicts() {
        let first_dir = tempfile::tempdir().unwrap();
        let config = LogConfig {
            level: LogLevel::Info,
            dir: first_dir.path().join("logs"),
            max_file_mb: 1,
            keep_files: 2,
        };

        init_logging(&config).unwrap();
        init_logging(&config).unwrap();
        assert!(config.dir.is_dir());

        let louder = LogConfig {
            level: LogLevel::Debug,
            ..config.clone()
        };
        let err = init_logging(&louder).unwrap_err();
        assert!(matches!(err, LoggingError::Conflict { .. }));
        assert!(err.to_string().contains("refusing to switch"));

        let second_dir = tempfile::tempdir().unwrap();
        let moved = LogConfig {
            dir: second_dir.path().to_path_buf(),
            ..config
        };
        assert!(matches!(init_logging(&moved), Err(LoggingError::Conflict { .. })));
    }
}
