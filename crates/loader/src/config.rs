use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use sluice_convert::ColumnOption;
use sluice_runtime::{
    DEFAULT_CLOSE_TIMEOUT, DEFAULT_COMMIT_TIMEOUT, DEFAULT_COPY_MODE, DEFAULT_DB_SCHEMA,
    DEFAULT_DEQUEUE_TIMEOUT, DEFAULT_ENQUEUE_TIMEOUT, DEFAULT_FINISH_TIMEOUT,
    DEFAULT_ROLLBACK_TIMEOUT, DEFAULT_TIMEZONE, DEFAULT_WRITE_TIMEOUT, STREAM_CHUNK_SIZE,
    default_pool_size,
};

use crate::copy::CopyStatement;
use crate::error::LoadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

impl FromStr for Compression {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(Compression::None),
            "GZIP" => Ok(Compression::Gzip),
            _ => Err(LoadError::Config(format!(
                "`compress` must be one of NONE, GZIP (got `{s}`)"
            ))),
        }
    }
}

impl TryFrom<String> for Compression {
    type Error = LoadError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Storage target of the destination's COPY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum CopyMode {
    #[default]
    Auto,
    Direct,
    Trickle,
}

impl fmt::Display for CopyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CopyMode::Auto => "AUTO",
            CopyMode::Direct => "DIRECT",
            CopyMode::Trickle => "TRICKLE",
        })
    }
}

impl FromStr for CopyMode {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AUTO" => Ok(CopyMode::Auto),
            "DIRECT" => Ok(CopyMode::Direct),
            "TRICKLE" => Ok(CopyMode::Trickle),
            _ => Err(LoadError::Config(format!(
                "`copy_mode` must be one of AUTO, DIRECT, TRICKLE (got `{s}`)"
            ))),
        }
    }
}

impl TryFrom<String> for CopyMode {
    type Error = LoadError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Per-stage timeout overrides in seconds.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutConfig {
    pub enqueue_secs: Option<f64>,
    pub dequeue_secs: Option<f64>,
    pub write_secs: Option<f64>,
    pub commit_secs: Option<f64>,
    pub rollback_secs: Option<f64>,
    pub close_secs: Option<f64>,
    pub finish_secs: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub enqueue: Duration,
    pub dequeue: Duration,
    pub write: Duration,
    pub commit: Duration,
    pub rollback: Duration,
    pub close: Duration,
    pub finish: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            enqueue: DEFAULT_ENQUEUE_TIMEOUT,
            dequeue: DEFAULT_DEQUEUE_TIMEOUT,
            write: DEFAULT_WRITE_TIMEOUT,
            commit: DEFAULT_COMMIT_TIMEOUT,
            rollback: DEFAULT_ROLLBACK_TIMEOUT,
            close: DEFAULT_CLOSE_TIMEOUT,
            finish: DEFAULT_FINISH_TIMEOUT,
        }
    }
}

impl Timeouts {
    pub fn from_config(cfg: &TimeoutConfig) -> Result<Self, LoadError> {
        let defaults = Self::default();
        let pick = |name: &str, secs: Option<f64>, default: Duration| match secs {
            None => Ok(default),
            Some(s) => Duration::try_from_secs_f64(s).map_err(|_| {
                LoadError::Config(format!("timeout `{name}` must be a non-negative number"))
            }),
        };

        Ok(Self {
            enqueue: pick("enqueue_secs", cfg.enqueue_secs, defaults.enqueue)?,
            dequeue: pick("dequeue_secs", cfg.dequeue_secs, defaults.dequeue)?,
            write: pick("write_secs", cfg.write_secs, defaults.write)?,
            commit: pick("commit_secs", cfg.commit_secs, defaults.commit)?,
            rollback: pick("rollback_secs", cfg.rollback_secs, defaults.rollback)?,
            close: pick("close_secs", cfg.close_secs, defaults.close)?,
            finish: pick("finish_secs", cfg.finish_secs, defaults.finish)?,
        })
    }
}

fn default_db_schema() -> String {
    DEFAULT_DB_SCHEMA.to_string()
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_copy_mode() -> CopyMode {
    // The runtime constant is the single source of the default.
    DEFAULT_COPY_MODE.parse().unwrap_or_default()
}

/// Load options as read from a JSON config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadConfig {
    #[serde(default = "default_db_schema")]
    pub schema: String,
    pub table: String,
    #[serde(default)]
    pub temp_table: Option<String>,
    #[serde(default)]
    pub pool_size: Option<usize>,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub compress: Compression,
    #[serde(default = "default_copy_mode")]
    pub copy_mode: CopyMode,
    #[serde(default)]
    pub abort_on_error: bool,
    #[serde(default)]
    pub reject_on_materialized_type_error: bool,
    #[serde(default)]
    pub abort_on_reject: bool,
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
    #[serde(default)]
    pub column_options: HashMap<String, ColumnOption>,
}

impl LoadConfig {
    /// Validate the options and resolve them into a [`LoadTask`].
    ///
    /// A missing temp table name is generated from the current time, so
    /// call this once per load.
    pub fn to_task(&self) -> Result<LoadTask, LoadError> {
        if self.table.trim().is_empty() {
            return Err(LoadError::Config("`table` must not be empty".into()));
        }

        let pool_size = self.pool_size.unwrap_or_else(default_pool_size);
        if pool_size == 0 {
            return Err(LoadError::Config("`pool_size` must be at least 1".into()));
        }

        let temp_table = self
            .temp_table
            .clone()
            .unwrap_or_else(|| temp_table_name(&self.table, SystemTime::now()));

        let copy = CopyStatement {
            schema: self.schema.clone(),
            table: temp_table,
            compression: self.compress,
            copy_mode: self.copy_mode,
            abort_on_error: self.abort_on_error,
            reject_on_materialized_type_error: self.reject_on_materialized_type_error,
        };

        Ok(LoadTask {
            pool_size,
            timeouts: Timeouts::from_config(&self.timeouts)?,
            copy,
            abort_on_reject: self.abort_on_reject,
            chunk_size: STREAM_CHUNK_SIZE,
        })
    }
}

/// `<table>_LOAD_TEMP_<secs><nanos>` with both parts as 8 hex digits.
pub fn temp_table_name(table: &str, now: SystemTime) -> String {
    let since = now.duration_since(UNIX_EPOCH).unwrap_or_default();
    format!(
        "{}_LOAD_TEMP_{:08x}{:08x}",
        table,
        since.as_secs(),
        since.subsec_nanos()
    )
}

/// Everything a worker pool needs to know about one load.
#[derive(Debug, Clone)]
pub struct LoadTask {
    pub pool_size: usize,
    pub timeouts: Timeouts,
    pub copy: CopyStatement,
    /// Fail the worker when the destination rejects any row.
    pub abort_on_reject: bool,
    /// Largest single write into the load stream.
    pub chunk_size: usize,
}

impl LoadTask {
    pub fn new(copy: CopyStatement, pool_size: usize) -> Self {
        Self {
            pool_size,
            timeouts: Timeouts::default(),
            copy,
            abort_on_reject: false,
            chunk_size: STREAM_CHUNK_SIZE,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
