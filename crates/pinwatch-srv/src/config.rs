//! Monitor configuration.
//!
//! Sources, lowest precedence first: built-in defaults, a TOML file, then
//! `PINWATCH_<FIELD>` environment variables.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::{Result, SrvError};

/// Prefix of environment overrides, e.g. `PINWATCH_CHECKS_PER_MINUTE`
pub const ENV_PREFIX: &str = "PINWATCH_";

/// Configuration for a pinwatch monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Federation metadata document (JSON).
    #[serde(default)]
    pub metadata_path: PathBuf,

    /// How often the metadata file is re-read (seconds).
    #[serde(default = "default_metadata_reload")]
    pub metadata_reload_secs: u64,

    /// SQLite status database.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Upper bound on concurrent probes.
    #[serde(default = "default_max_parallel")]
    pub max_parallel_checks: usize,

    /// Dispatch rate.
    #[serde(default = "default_checks_per_minute")]
    pub checks_per_minute: u32,

    /// A server checked more recently than this is not due (seconds).
    #[serde(default = "default_min_check_interval")]
    pub min_check_interval_secs: u64,

    /// Freshness window for priority requests (seconds).
    #[serde(default = "default_priority_min_interval")]
    pub priority_min_interval_secs: u64,

    /// Maximum number of queued priority requests.
    #[serde(default = "default_priority_capacity")]
    pub priority_capacity: usize,

    /// TCP connect and TLS handshake timeout (seconds).
    #[serde(default = "default_tls_timeout")]
    pub tls_timeout_secs: u64,

    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Compact human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

impl FromStr for LogFormat {
    type Err = SrvError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(SrvError::Config(format!(
                "unknown log format '{other}', expected text or json"
            ))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Scheduler tuning derived from [`MonitorConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Permit pool size
    pub max_parallel: usize,
    /// Dispatch attempts per minute
    pub checks_per_minute: u32,
    /// Ordinary freshness window
    pub min_check_interval: Duration,
    /// Priority freshness window
    pub priority_min_interval: Duration,
    /// Priority set capacity
    pub priority_capacity: usize,
}

impl SchedulerConfig {
    /// Interval between dispatch attempts
    #[must_use]
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs(60) / self.checks_per_minute.max(1)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        MonitorConfig::default().scheduler()
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            metadata_path: PathBuf::new(),
            metadata_reload_secs: default_metadata_reload(),
            database_path: default_database_path(),
            max_parallel_checks: default_max_parallel(),
            checks_per_minute: default_checks_per_minute(),
            min_check_interval_secs: default_min_check_interval(),
            priority_min_interval_secs: default_priority_min_interval(),
            priority_capacity: default_priority_capacity(),
            tls_timeout_secs: default_tls_timeout(),
            log_format: LogFormat::default(),
        }
    }
}

impl MonitorConfig {
    /// Load the configuration: defaults, then `path` if given, then the
    /// process environment, then validation.
    ///
    /// Environment overrides that fail to parse are skipped; their
    /// descriptions are returned alongside the config so they can be logged
    /// once logging is up.
    pub fn load(path: Option<&Path>) -> Result<(Self, Vec<String>)> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let ignored = config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok((config, ignored))
    }

    /// Read a TOML file; absent fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SrvError::Config(format!("failed to read {}: {e}", path.display())))?;
        toml::from_str(&content)
            .map_err(|e| SrvError::Config(format!("failed to parse {}: {e}", path.display())))
    }

    /// Apply `PINWATCH_<FIELD>` overrides found through `lookup`.
    ///
    /// Returns one message per override that was present but malformed.
    pub fn apply_env<F>(&mut self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut ignored = Vec::new();
        let get = |field: &str| lookup(&format!("{ENV_PREFIX}{}", field.to_ascii_uppercase()));

        if let Some(value) = get("metadata_path") {
            self.metadata_path = PathBuf::from(value);
        }
        if let Some(value) = get("database_path") {
            self.database_path = PathBuf::from(value);
        }
        override_parsed(&get, "metadata_reload_secs", &mut self.metadata_reload_secs, &mut ignored);
        override_parsed(&get, "max_parallel_checks", &mut self.max_parallel_checks, &mut ignored);
        override_parsed(&get, "checks_per_minute", &mut self.checks_per_minute, &mut ignored);
        override_parsed(&get, "min_check_interval_secs", &mut self.min_check_interval_secs, &mut ignored);
        override_parsed(&get, "priority_min_interval_secs", &mut self.priority_min_interval_secs, &mut ignored);
        override_parsed(&get, "priority_capacity", &mut self.priority_capacity, &mut ignored);
        override_parsed(&get, "tls_timeout_secs", &mut self.tls_timeout_secs, &mut ignored);
        override_parsed(&get, "log_format", &mut self.log_format, &mut ignored);

        ignored
    }

    /// Reject values the monitor cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.metadata_path.as_os_str().is_empty() {
            return Err(SrvError::Config("metadata_path is required".into()));
        }
        if self.metadata_reload_secs < 1 {
            return Err(SrvError::Config("metadata_reload_secs must be at least 1".into()));
        }
        if self.max_parallel_checks < 1 {
            return Err(SrvError::Config("max_parallel_checks must be at least 1".into()));
        }
        if self.checks_per_minute < 1 {
            return Err(SrvError::Config("checks_per_minute must be at least 1".into()));
        }
        if self.min_check_interval_secs < 60 {
            return Err(SrvError::Config(
                "min_check_interval_secs must be at least 60".into(),
            ));
        }
        if self.priority_min_interval_secs < 1
            || self.priority_min_interval_secs > self.min_check_interval_secs
        {
            return Err(SrvError::Config(
                "priority_min_interval_secs must be between 1 and min_check_interval_secs".into(),
            ));
        }
        if self.priority_capacity < 1 {
            return Err(SrvError::Config("priority_capacity must be at least 1".into()));
        }
        if self.tls_timeout_secs < 1 {
            return Err(SrvError::Config("tls_timeout_secs must be at least 1".into()));
        }
        Ok(())
    }

    /// Scheduler view of this configuration
    #[must_use]
    pub const fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_parallel: self.max_parallel_checks,
            checks_per_minute: self.checks_per_minute,
            min_check_interval: Duration::from_secs(self.min_check_interval_secs),
            priority_min_interval: Duration::from_secs(self.priority_min_interval_secs),
            priority_capacity: self.priority_capacity,
        }
    }

    /// Probe timeout
    #[must_use]
    pub const fn tls_timeout(&self) -> Duration {
        Duration::from_secs(self.tls_timeout_secs)
    }

    /// Metadata reload period
    #[must_use]
    pub const fn metadata_reload(&self) -> Duration {
        Duration::from_secs(self.metadata_reload_secs)
    }
}

fn override_parsed<T, G>(get: &G, field: &str, slot: &mut T, ignored: &mut Vec<String>)
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    if let Some(value) = get(field) {
        match value.trim().parse() {
            Ok(parsed) => *slot = parsed,
            Err(_) => ignored.push(format!(
                "ignoring {ENV_PREFIX}{}={value:?}: not a valid value",
                field.to_ascii_uppercase()
            )),
        }
    }
}

// Default value functions for serde.
const fn default_metadata_reload() -> u64 {
    60
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./pinwatch.db")
}

const fn default_max_parallel() -> usize {
    5
}

const fn default_checks_per_minute() -> u32 {
    20
}

const fn default_min_check_interval() -> u64 {
    5 * 60 * 60
}

const fn default_priority_min_interval() -> u64 {
    60
}

const fn default_priority_capacity() -> usize {
    64
}

const fn default_tls_timeout() -> u64 {
    10
}
