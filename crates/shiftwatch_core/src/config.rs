//! Engine configuration loading and validation.
//!
//! # Responsibility
//! - Load sweep cadence, tenants, clock, and logging settings from JSON.
//! - Reject unusable values before any component is built.
//!
//! # Invariants
//! - A validated config has at least one tenant and non-zero cadence.
//! - The per-tenant timeout never exceeds the sweep interval.

use crate::clock::{frame_from_minutes, ClockAuthority, HttpDateTimeSource};
use crate::model::task::TenantId;
use chrono::FixedOffset;
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_SWEEP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_TIME_SOURCE_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_LOG_FILE_MB: u64 = 10;
const DEFAULT_LOG_FILES_KEPT: usize = 5;
const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

/// Configuration load/validation error.
#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config JSON: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Trusted reference clock endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSourceConfig {
    pub url: String,
    #[serde(default = "default_time_source_timeout_ms")]
    pub timeout_ms: u64,
}

/// Engine log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn filter(self) -> LevelFilter {
        match self {
            Self::Trace => LevelFilter::Trace,
            Self::Debug => LevelFilter::Debug,
            Self::Info => LevelFilter::Info,
            Self::Warn => LevelFilter::Warn,
            Self::Error => LevelFilter::Error,
        }
    }
}

/// `debug` in debug builds, `info` in release builds.
impl Default for LogLevel {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Debug
        } else {
            Self::Info
        }
    }
}

/// Rolling file log settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub level: LogLevel,
    /// Absolute directory for rolling log files.
    pub dir: PathBuf,
    /// Size at which the active file is rotated.
    #[serde(default = "default_log_file_mb")]
    pub max_file_mb: u64,
    #[serde(default = "default_log_files_kept")]
    pub keep_files: usize,
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub db_path: PathBuf,
    pub tenants: Vec<TenantId>,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_sweep_timeout_secs")]
    pub sweep_timeout_secs: u64,
    /// Minutes east of UTC of the frame that times of day are read in.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default)]
    pub time_source: Option<TimeSourceConfig>,
    #[serde(default)]
    pub log: Option<LogConfig>,
}

impl EngineConfig {
    /// Reads, parses, and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Parses and validates config JSON text.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.db_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("db_path cannot be empty".to_string()));
        }
        if self.tenants.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one tenant is required".to_string(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.sweep_timeout_secs == 0 || self.sweep_timeout_secs > self.sweep_interval_secs {
            return Err(ConfigError::Invalid(format!(
                "sweep_timeout_secs must be within 1..={}",
                self.sweep_interval_secs
            )));
        }
        if self.utc_offset_minutes.abs() > MAX_UTC_OFFSET_MINUTES {
            return Err(ConfigError::Invalid(format!(
                "utc_offset_minutes `{}` is outside ±{MAX_UTC_OFFSET_MINUTES}",
                self.utc_offset_minutes
            )));
        }
        if let Some(source) = &self.time_source {
            if !(source.url.starts_with("http://") || source.url.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!(
                    "time_source.url must be http(s), got `{}`",
                    source.url
                )));
            }
            if source.timeout_ms == 0 {
                return Err(ConfigError::Invalid(
                    "time_source.timeout_ms must be greater than zero".to_string(),
                ));
            }
        }
        if let Some(log) = &self.log {
            if !log.dir.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "log.dir must be an absolute path, got `{}`",
                    log.dir.display()
                )));
            }
            if log.max_file_mb == 0 || log.keep_files == 0 {
                return Err(ConfigError::Invalid(
                    "log.max_file_mb and log.keep_files must be greater than zero".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Fixed-offset frame in which times of day are evaluated.
    pub fn frame(&self) -> Result<FixedOffset, ConfigError> {
        frame_from_minutes(self.utc_offset_minutes).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "utc_offset_minutes `{}` is not a valid offset",
                self.utc_offset_minutes
            ))
        })
    }

    /// Builds the process clock, wiring the reference source when set.
    pub fn build_clock(&self) -> Result<ClockAuthority, ConfigError> {
        let frame = self.frame()?;
        Ok(match &self.time_source {
            Some(source) => ClockAuthority::with_source(
                Box::new(HttpDateTimeSource::new(
                    source.url.clone(),
                    Duration::from_millis(source.timeout_ms),
                )),
                frame,
            ),
            None => ClockAuthority::local(frame),
        })
    }
}

fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}

fn default_sweep_timeout_secs() -> u64 {
    DEFAULT_SWEEP_TIMEOUT_SECS
}

fn default_time_source_timeout_ms() -> u64 {
    DEFAULT_TIME_SOURCE_TIMEOUT_MS
}

fn default_log_file_mb() -> u64 {
    DEFAULT_LOG_FILE_MB
}

fn default_log_files_kept() -> usize {
    DEFAULT_LOG_FILES_KEPT
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, EngineConfig, LogLevel};

    #[test]
    fn minimal_config_gets_defaults() {
        let config =
            EngineConfig::from_json(r#"{"db_path":"/tmp/ledger.db","tenants":["acme"]}"#).unwrap();
        assert_eq!(config.sweep_interval_secs, 60);
        assert_eq!(config.sweep_timeout_secs, 30);
        assert_eq!(config.utc_offset_minutes, 0);
        assert!(config.time_source.is_none());
        assert_eq!(config.tenants[0].as_str(), "acme");
    }

    #[test]
    fn rejects_timeout_longer_than_interval() {
        let err = EngineConfig::from_json(
            r#"{"db_path":"/tmp/a.db","tenants":["acme"],"sweep_interval_secs":10,"sweep_timeout_secs":20}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(message) if message.contains("sweep_timeout_secs")));
    }

    #[test]
    fn rejects_empty_tenants_and_blank_tenant_ids() {
        let err = EngineConfig::from_json(r#"{"db_path":"/tmp/a.db","tenants":[]}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = EngineConfig::from_json(r#"{"db_path":"/tmp/a.db","tenants":["  "]}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_non_http_time_source() {
        let err = EngineConfig::from_json(
            r#"{"db_path":"/tmp/a.db","tenants":["acme"],"time_source":{"url":"ntp://pool"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn log_section_gets_defaults_and_accepts_warning_alias() {
        let config = EngineConfig::from_json(
            r#"{"db_path":"/tmp/a.db","tenants":["acme"],"log":{"dir":"/var/log/shiftwatch"}}"#,
        )
        .unwrap();
        let log = config.log.unwrap();
        assert_eq!(log.level, LogLevel::default());
        assert_eq!(log.max_file_mb, 10);
        assert_eq!(log.keep_files, 5);

        let config = EngineConfig::from_json(
            r#"{"db_path":"/tmp/a.db","tenants":["acme"],"log":{"level":"warning","dir":"/var/log/sw"}}"#,
        )
        .unwrap();
        assert_eq!(config.log.unwrap().level, LogLevel::Warn);
    }

    #[test]
    fn rejects_relative_log_dir_and_unknown_level() {
        let err = EngineConfig::from_json(
            r#"{"db_path":"/tmp/a.db","tenants":["acme"],"log":{"dir":"logs/dev"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(message) if message.contains("absolute")));

        let err = EngineConfig::from_json(
            r#"{"db_path":"/tmp/a.db","tenants":["acme"],"log":{"level":"loud","dir":"/tmp/l"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn frame_reflects_offset() {
        let config = EngineConfig::from_json(
            r#"{"db_path":"/tmp/a.db","tenants":["acme"],"utc_offset_minutes":-300}"#,
        )
        .unwrap();
        assert_eq!(config.frame().unwrap().local_minus_utc(), -300 * 60);
    }
}
