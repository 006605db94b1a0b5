//! Queue configuration loaded from the environment.

use std::time::Duration;

use thiserror::Error;

use eventide_events::{DEFAULT_QUEUE, DriverOptions};

use crate::queue::WorkerOptions;

pub const ENV_QUEUE_NAME: &str = "EVENTIDE_QUEUE_NAME";
pub const ENV_RETRIES: &str = "EVENTIDE_QUEUE_RETRIES";
pub const ENV_RUN_AFTER_SECONDS: &str = "EVENTIDE_QUEUE_RUN_AFTER_SECONDS";
pub const ENV_QUEUE_TABLE: &str = "EVENTIDE_QUEUE_TABLE";
pub const ENV_FAILED_TABLE: &str = "EVENTIDE_QUEUE_FAILED_TABLE";
pub const ENV_RUN_ONCE: &str = "EVENTIDE_QUEUE_RUN_ONCE";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid table name {0:?}: expected [A-Za-z_][A-Za-z0-9_]*")]
    InvalidTable(String),
}

/// Names of the pending and dead-letter tables.
///
/// Both are checked to be plain SQL identifiers on construction, so they can be
/// spliced into statements as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTables {
    queue: String,
    failed: String,
}

impl QueueTables {
    pub fn new(queue: impl Into<String>, failed: impl Into<String>) -> Result<Self, ConfigError> {
        let queue = validate_table(queue.into())?;
        let failed = validate_table(failed.into())?;
        Ok(Self { queue, failed })
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn failed(&self) -> &str {
        &self.failed
    }
}

impl Default for QueueTables {
    fn default() -> Self {
        Self {
            queue: "queue_records".to_string(),
            failed: "failed_queue_records".to_string(),
        }
    }
}

fn validate_table(name: String) -> Result<String, ConfigError> {
    let mut chars = name.chars();
    let valid_head = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if valid_head && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(name)
    } else {
        Err(ConfigError::InvalidTable(name))
    }
}

/// Queue driver and worker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub queue_name: String,
    pub retries: u32,
    pub run_after: Duration,
    pub tables: QueueTables,
    pub run_once: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_name: DEFAULT_QUEUE.to_string(),
            retries: 3,
            run_after: Duration::from_secs(5),
            tables: QueueTables::default(),
            run_once: false,
        }
    }
}

impl QueueConfig {
    /// Read the `EVENTIDE_QUEUE_*` variables; unset ones keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let queue_name = match lookup(ENV_QUEUE_NAME) {
            Some(name) if name.trim().is_empty() => {
                return Err(invalid(ENV_QUEUE_NAME, name, "must not be empty"));
            }
            Some(name) => name,
            None => defaults.queue_name,
        };

        let retries = match lookup(ENV_RETRIES) {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .map_err(|e| invalid(ENV_RETRIES, raw.clone(), e.to_string()))?,
            None => defaults.retries,
        };

        let run_after = match lookup(ENV_RUN_AFTER_SECONDS) {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| invalid(ENV_RUN_AFTER_SECONDS, raw.clone(), e.to_string()))?,
            None => defaults.run_after,
        };

        let tables = QueueTables::new(
            lookup(ENV_QUEUE_TABLE).unwrap_or_else(|| defaults.tables.queue().to_string()),
            lookup(ENV_FAILED_TABLE).unwrap_or_else(|| defaults.tables.failed().to_string()),
        )?;

        let run_once = match lookup(ENV_RUN_ONCE) {
            Some(raw) => parse_bool(ENV_RUN_ONCE, &raw)?,
            None => defaults.run_once,
        };

        Ok(Self {
            queue_name,
            retries,
            run_after,
            tables,
            run_once,
        })
    }

    pub fn with_queue_name(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = queue_name.into();
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_run_once(mut self, run_once: bool) -> Self {
        self.run_once = run_once;
        self
    }

    /// Options for the queued driver.
    pub fn driver_options(&self) -> DriverOptions {
        DriverOptions::default()
            .with_queue_name(self.queue_name.clone())
            .with_retries(self.retries)
    }

    /// Options for a worker draining the configured queue.
    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions::default()
            .with_name(format!("queue-worker:{}", self.queue_name))
            .with_queue_name(self.queue_name.clone())
            .with_run_after(self.run_after)
            .with_run_once(self.run_once)
    }
}

fn invalid(key: &'static str, value: String, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value,
        reason: reason.into(),
    }
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(invalid(key, raw.to_string(), "expected a boolean")),
    }
}
