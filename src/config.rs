//! Configuration module for the log collector service.
//!
//! Settings are read from `LOG_COLLECTOR_*` environment variables and mapped onto
//! [`ProcessorOptions`] for the processor and onto the storage writer settings.

use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

use crate::options::{OptionsError, ProcessorOptions, DEFAULT_NUM_WORKERS};
use crate::queue::MAX_QUEUE_CAPACITY;

/// Default base URL of the storage backend
const DEFAULT_STORAGE_URL: &str = "http://localhost:8000";

/// Default initial queue capacity
const DEFAULT_QUEUE_SIZE: usize = 2000;

/// Default number of records to observe before dynamic resizing kicks in
const DEFAULT_QUEUE_SIZE_WARMUP: u64 = 1000;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const DEFAULT_MAX_RETRIES: u32 = 3;

/// Upper bound on the worker pool
const MAX_NUM_WORKERS: usize = 10_000;

/// Configuration for the log collector service.
///
/// All settings can be configured via environment variables:
/// - `LOG_COLLECTOR_STORAGE_URL`: storage backend URL (default: http://localhost:8000)
/// - `LOG_COLLECTOR_NUM_WORKERS`: queue workers (default: 50)
/// - `LOG_COLLECTOR_QUEUE_SIZE`: initial queue capacity (default: 2000)
/// - `LOG_COLLECTOR_QUEUE_SIZE_MEMORY_MIB`: memory budget for dynamic sizing, 0 disables (default: 0)
/// - `LOG_COLLECTOR_QUEUE_SIZE_WARMUP`: records before the first resize (default: 1000)
/// - `LOG_COLLECTOR_REPORT_BUSY`: fail batches with "server busy" on overflow (default: false)
/// - `LOG_COLLECTOR_BLOCKING_SUBMIT`: wait for queue room instead of dropping (default: false)
/// - `LOG_COLLECTOR_TAGS`: collector tags as `key=value,key2=value2` (default: none)
/// - `LOG_COLLECTOR_REQUEST_TIMEOUT_SECS`: storage request timeout (default: 30)
/// - `LOG_COLLECTOR_MAX_RETRIES`: storage retry attempts (default: 3)
/// - `LOG_COLLECTOR_TENANT`: tenant attached to generated batches (default: empty)
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the storage backend, without trailing slash
    pub storage_url: String,

    pub num_workers: usize,

    pub queue_size: usize,

    /// Memory budget for dynamic queue sizing in MiB
    pub queue_size_memory_mib: u64,

    pub queue_size_warmup: u64,

    pub report_busy: bool,

    pub blocking_submit: bool,

    /// Tags merged into every record's process
    pub collector_tags: BTreeMap<String, String>,

    /// HTTP request timeout duration
    pub request_timeout: Duration,

    /// Maximum number of retry attempts for failed requests
    pub max_retries: u32,

    pub tenant: String,
}

/// Error type for configuration loading failures
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub env_var: Option<String>,
}

impl ConfigError {
    fn for_var(env_var: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            env_var: Some(env_var.to_string()),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.env_var {
            Some(var) => write!(f, "Configuration error for {}: {}", var, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<OptionsError> for ConfigError {
    fn from(e: OptionsError) -> Self {
        Self {
            message: e.to_string(),
            env_var: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a numeric or boolean variable does not parse, a value
    /// is outside its allowed range, or `LOG_COLLECTOR_TAGS` is malformed.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use log_collector::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Storage URL: {}", config.storage_url);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let storage_url = env::var("LOG_COLLECTOR_STORAGE_URL")
            .unwrap_or_else(|_| DEFAULT_STORAGE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let num_workers = parse_bounded(
            "LOG_COLLECTOR_NUM_WORKERS",
            DEFAULT_NUM_WORKERS,
            1,
            MAX_NUM_WORKERS,
        )?;
        let queue_size = parse_bounded(
            "LOG_COLLECTOR_QUEUE_SIZE",
            DEFAULT_QUEUE_SIZE,
            1,
            MAX_QUEUE_CAPACITY,
        )?;
        let queue_size_memory_mib = parse_number("LOG_COLLECTOR_QUEUE_SIZE_MEMORY_MIB", 0u64)?;
        if queue_size_memory_mib.checked_mul(1024 * 1024).is_none() {
            return Err(ConfigError::for_var(
                "LOG_COLLECTOR_QUEUE_SIZE_MEMORY_MIB",
                format!("{} MiB is too large", queue_size_memory_mib),
            ));
        }
        let queue_size_warmup =
            parse_number("LOG_COLLECTOR_QUEUE_SIZE_WARMUP", DEFAULT_QUEUE_SIZE_WARMUP)?;

        let report_busy = parse_bool("LOG_COLLECTOR_REPORT_BUSY")?;
        let blocking_submit = parse_bool("LOG_COLLECTOR_BLOCKING_SUBMIT")?;

        let collector_tags = match env::var("LOG_COLLECTOR_TAGS") {
            Ok(value) => parse_tags(&value)
                .map_err(|message| ConfigError::for_var("LOG_COLLECTOR_TAGS", message))?,
            Err(_) => BTreeMap::new(),
        };

        let request_timeout = Duration::from_secs(parse_number(
            "LOG_COLLECTOR_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?);
        let max_retries = parse_number("LOG_COLLECTOR_MAX_RETRIES", DEFAULT_MAX_RETRIES)?;

        let tenant = env::var("LOG_COLLECTOR_TENANT").unwrap_or_default();

        Ok(Self {
            storage_url,
            num_workers,
            queue_size,
            queue_size_memory_mib,
            queue_size_warmup,
            report_busy,
            blocking_submit,
            collector_tags,
            request_timeout,
            max_retries,
            tenant,
        })
    }

    /// Map the service settings onto processor options.
    pub fn processor_options(&self) -> Result<ProcessorOptions, ConfigError> {
        let options = ProcessorOptions::builder()
            .num_workers(self.num_workers)
            .queue_size(self.queue_size)
            .dyn_queue_size_memory(self.queue_size_memory_mib * 1024 * 1024)
            .dyn_queue_size_warmup(self.queue_size_warmup)
            .report_busy(self.report_busy)
            .blocking_submit(self.blocking_submit)
            .collector_tags(self.collector_tags.clone())
            .build()?;
        Ok(options)
    }
}

impl Default for Config {
    /// Create a default configuration using default values.
    ///
    /// This is useful for testing or when environment variables are not set.
    fn default() -> Self {
        Self {
            storage_url: DEFAULT_STORAGE_URL.to_string(),
            num_workers: DEFAULT_NUM_WORKERS,
            queue_size: DEFAULT_QUEUE_SIZE,
            queue_size_memory_mib: 0,
            queue_size_warmup: DEFAULT_QUEUE_SIZE_WARMUP,
            report_busy: false,
            blocking_submit: false,
            collector_tags: BTreeMap::new(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            tenant: String::new(),
        }
    }
}

fn parse_number<N: std::str::FromStr>(env_var: &str, default: N) -> Result<N, ConfigError> {
    match env::var(env_var) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::for_var(env_var, format!("'{}' is not a valid number", value))),
        Err(_) => Ok(default),
    }
}

fn parse_bounded(env_var: &str, default: usize, min: usize, max: usize) -> Result<usize, ConfigError> {
    let value = parse_number(env_var, default)?;
    if value < min {
        return Err(ConfigError::for_var(
            env_var,
            format!("{} is below minimum ({})", value, min),
        ));
    }
    if value > max {
        return Err(ConfigError::for_var(
            env_var,
            format!("{} exceeds maximum allowed ({})", value, max),
        ));
    }
    Ok(value)
}

fn parse_bool(env_var: &str) -> Result<bool, ConfigError> {
    match env::var(env_var) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            _ => Err(ConfigError::for_var(
                env_var,
                format!("'{}' is not a valid boolean", value),
            )),
        },
        Err(_) => Ok(false),
    }
}

/// Parse `key=value,key2=value2`. Empty entries are skipped.
fn parse_tags(value: &str) -> Result<BTreeMap<String, String>, String> {
    let mut tags = BTreeMap::new();
    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((key, tag_value)) = entry.split_once('=') else {
            return Err(format!("tag '{}' is not in key=value form", entry));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("tag '{}' has an empty key", entry));
        }
        tags.insert(key.to_string(), tag_value.trim().to_string());
    }
    Ok(tags)
}
