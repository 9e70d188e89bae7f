use std::time::Duration;

use annotally_core::error::CoreError;
use annotally_db::bulk_update::{max_batch_size, DEFAULT_BATCH_SIZE, TASK_STATE_FIELDS};

/// How recompute requests are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Run on the caller's task before `dispatch` returns.
    Sync,
    /// Push onto the background queue and return a handle immediately.
    Queue,
}

/// Log output format for the worker binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Worker configuration loaded from environment variables.
///
/// Loaded once at startup and passed explicitly to every component;
/// changing a value requires a restart.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// PostgreSQL connection string (required).
    pub database_url: String,
    /// Pool size (default: `20`).
    pub max_connections: u32,
    /// Dispatch mode (default: `queue`).
    pub mode: DispatchMode,
    /// Rows per bulk `UPDATE` statement (default: `1000`, at most `8191`
    /// so a statement stays within the bind parameter limit).
    pub batch_size: usize,
    /// Pending jobs the background queue holds before `enqueue` waits
    /// (default: `256`).
    pub queue_capacity: usize,
    /// Interval of the consistency sweep (default: `300` seconds, `0`
    /// disables it).
    pub sweep_interval: Option<Duration>,
    /// Log format (default: `text`).
    pub log_format: LogFormat,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default  |
    /// |----------------------------|----------|
    /// | `DATABASE_URL`             | required |
    /// | `DATABASE_MAX_CONNECTIONS` | `20`     |
    /// | `RECOMPUTE_MODE`           | `queue`  |
    /// | `RECOMPUTE_BATCH_SIZE`     | `1000`   |
    /// | `RECOMPUTE_QUEUE_CAPACITY` | `256`    |
    /// | `SWEEP_INTERVAL_SECS`      | `300`    |
    /// | `LOG_FORMAT`               | `text`   |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| CoreError::Validation("DATABASE_URL must be set".to_string()))?;

        let max_connections: u32 = parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 20)?;

        let mode = match lookup("RECOMPUTE_MODE").as_deref().map(str::trim) {
            None | Some("queue") => DispatchMode::Queue,
            Some("sync") => DispatchMode::Sync,
            Some(other) => {
                return Err(CoreError::Validation(format!(
                    "RECOMPUTE_MODE must be `sync` or `queue`, got `{other}`"
                )));
            }
        };

        let batch_size: usize = parse_or(&lookup, "RECOMPUTE_BATCH_SIZE", DEFAULT_BATCH_SIZE)?;
        if batch_size == 0 {
            return Err(CoreError::Validation(
                "RECOMPUTE_BATCH_SIZE must be positive".to_string(),
            ));
        }
        let max_batch = max_batch_size(TASK_STATE_FIELDS.len());
        if batch_size > max_batch {
            return Err(CoreError::Validation(format!(
                "RECOMPUTE_BATCH_SIZE must be at most {max_batch}, got {batch_size}"
            )));
        }

        let queue_capacity: usize = parse_or(&lookup, "RECOMPUTE_QUEUE_CAPACITY", 256)?;
        if queue_capacity == 0 {
            return Err(CoreError::Validation(
                "RECOMPUTE_QUEUE_CAPACITY must be positive".to_string(),
            ));
        }

        let sweep_secs: u64 = parse_or(&lookup, "SWEEP_INTERVAL_SECS", 300)?;
        let sweep_interval = (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs));

        let log_format = match lookup("LOG_FORMAT").as_deref().map(str::trim) {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(CoreError::Validation(format!(
                    "LOG_FORMAT must be `text` or `json`, got `{other}`"
                )));
            }
        };

        Ok(Self {
            database_url,
            max_connections,
            mode,
            batch_size,
            queue_capacity,
            sweep_interval,
            log_format,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, CoreError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            CoreError::Validation(format!("{key} must be a valid number, got `{raw}`"))
        }),
    }
}
