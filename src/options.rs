//! Processor options.
//!
//! [`ProcessorOptionsBuilder`] collects named settings, fills in defaults for
//! anything left unset, validates the result, and hands back an immutable
//! [`ProcessorOptions`] snapshot.
//!
//! ```
//! use log_collector::options::ProcessorOptions;
//!
//! let options = ProcessorOptions::builder()
//!     .num_workers(4)
//!     .queue_size(2_000)
//!     .report_busy(true)
//!     .build()
//!     .expect("valid options");
//! assert_eq!(options.num_workers, 4);
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::model::LogRecord;
use crate::queue::MAX_QUEUE_CAPACITY;
use crate::sanitizer::Sanitizer;

/// Default number of queue workers.
pub const DEFAULT_NUM_WORKERS: usize = 50;

/// Default period between capacity controller ticks.
pub const DEFAULT_RESIZE_INTERVAL: Duration = Duration::from_secs(60);

/// Called once per batch before tagging, with the batch and its tenant.
pub type PreProcessLogs = Arc<dyn Fn(&[LogRecord], &str) + Send + Sync>;

/// Called for each record right before it is written to storage.
pub type PreSave = Arc<dyn Fn(&LogRecord, &str) + Send + Sync>;

/// Decides whether a record is accepted into the queue.
pub type LogFilter = Arc<dyn Fn(&LogRecord) -> bool + Send + Sync>;

/// Called with every record the queue refuses.
pub type OnDroppedLog = Arc<dyn Fn(&LogRecord) + Send + Sync>;

/// Errors raised while validating processor options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionsError {
    /// The queue size was never set
    MissingQueueSize,

    /// The queue size is outside `1..=MAX_QUEUE_CAPACITY`
    QueueSizeOutOfRange(usize),

    /// At least one worker is required
    NoWorkers,

    /// The capacity controller needs a non-zero tick interval
    ZeroResizeInterval,
}

impl std::fmt::Display for OptionsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionsError::MissingQueueSize => write!(f, "queue size must be set"),
            OptionsError::QueueSizeOutOfRange(size) => write!(
                f,
                "queue size {} is outside the allowed range 1..={}",
                size, MAX_QUEUE_CAPACITY
            ),
            OptionsError::NoWorkers => write!(f, "number of workers must be greater than 0"),
            OptionsError::ZeroResizeInterval => {
                write!(f, "resize interval must be greater than 0")
            }
        }
    }
}

impl std::error::Error for OptionsError {}

/// Validated, immutable processor settings.
#[derive(Clone)]
pub struct ProcessorOptions {
    /// Number of queue workers
    pub num_workers: usize,

    /// Initial queue capacity
    pub queue_size: usize,

    /// Fail the whole batch with `Busy` as soon as one record is refused
    pub report_busy: bool,

    /// Wait for queue room instead of refusing records
    pub blocking_submit: bool,

    /// Tags merged into every record's process attributes
    pub collector_tags: BTreeMap<String, String>,

    /// Records processed before the capacity controller may act
    pub dyn_queue_size_warmup: u64,

    /// Memory budget for queued records in bytes; 0 disables resizing
    pub dyn_queue_size_memory: u64,

    /// Period of the capacity controller
    pub resize_interval: Duration,

    /// Count record sizes even when dynamic resizing is off
    pub log_size_metrics_enabled: bool,

    /// Drain buffered records on close; when false they are reported as dropped
    pub drain_on_close: bool,

    pub log_filter: LogFilter,

    pub pre_process_logs: PreProcessLogs,

    pub pre_save: PreSave,

    pub on_dropped_log: Option<OnDroppedLog>,

    /// Appended after the built-in sanitizers
    pub sanitizer: Option<Arc<dyn Sanitizer>>,
}

impl ProcessorOptions {
    pub fn builder() -> ProcessorOptionsBuilder {
        ProcessorOptionsBuilder::default()
    }

    /// Whether workers must count record sizes.
    pub fn counts_log_sizes(&self) -> bool {
        self.dyn_queue_size_memory > 0 || self.log_size_metrics_enabled
    }
}

impl std::fmt::Debug for ProcessorOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorOptions")
            .field("num_workers", &self.num_workers)
            .field("queue_size", &self.queue_size)
            .field("report_busy", &self.report_busy)
            .field("blocking_submit", &self.blocking_submit)
            .field("collector_tags", &self.collector_tags)
            .field("dyn_queue_size_warmup", &self.dyn_queue_size_warmup)
            .field("dyn_queue_size_memory", &self.dyn_queue_size_memory)
            .field("resize_interval", &self.resize_interval)
            .field("log_size_metrics_enabled", &self.log_size_metrics_enabled)
            .field("drain_on_close", &self.drain_on_close)
            .field("on_dropped_log", &self.on_dropped_log.is_some())
            .field("sanitizer", &self.sanitizer.is_some())
            .finish_non_exhaustive()
    }
}

/// Collects processor settings; see [`ProcessorOptions`] for their meaning.
#[derive(Default)]
pub struct ProcessorOptionsBuilder {
    num_workers: Option<usize>,
    queue_size: Option<usize>,
    report_busy: bool,
    blocking_submit: bool,
    collector_tags: BTreeMap<String, String>,
    dyn_queue_size_warmup: u64,
    dyn_queue_size_memory: u64,
    resize_interval: Option<Duration>,
    log_size_metrics_enabled: bool,
    drain_on_close: Option<bool>,
    log_filter: Option<LogFilter>,
    pre_process_logs: Option<PreProcessLogs>,
    pre_save: Option<PreSave>,
    on_dropped_log: Option<OnDroppedLog>,
    sanitizer: Option<Arc<dyn Sanitizer>>,
}

impl ProcessorOptionsBuilder {
    pub fn num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = Some(num_workers);
        self
    }

    pub fn queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = Some(queue_size);
        self
    }

    pub fn report_busy(mut self, report_busy: bool) -> Self {
        self.report_busy = report_busy;
        self
    }

    pub fn blocking_submit(mut self, blocking_submit: bool) -> Self {
        self.blocking_submit = blocking_submit;
        self
    }

    /// Replace the collector tag set.
    pub fn collector_tags<K, V>(mut self, tags: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.collector_tags = tags
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    pub fn dyn_queue_size_warmup(mut self, records: u64) -> Self {
        self.dyn_queue_size_warmup = records;
        self
    }

    /// Memory budget in bytes for the capacity controller.
    pub fn dyn_queue_size_memory(mut self, bytes: u64) -> Self {
        self.dyn_queue_size_memory = bytes;
        self
    }

    pub fn resize_interval(mut self, interval: Duration) -> Self {
        self.resize_interval = Some(interval);
        self
    }

    pub fn log_size_metrics_enabled(mut self, enabled: bool) -> Self {
        self.log_size_metrics_enabled = enabled;
        self
    }

    pub fn drain_on_close(mut self, drain: bool) -> Self {
        self.drain_on_close = Some(drain);
        self
    }

    pub fn log_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&LogRecord) -> bool + Send + Sync + 'static,
    {
        self.log_filter = Some(Arc::new(filter));
        self
    }

    pub fn pre_process_logs<F>(mut self, hook: F) -> Self
    where
        F: Fn(&[LogRecord], &str) + Send + Sync + 'static,
    {
        self.pre_process_logs = Some(Arc::new(hook));
        self
    }

    pub fn pre_save<F>(mut self, hook: F) -> Self
    where
        F: Fn(&LogRecord, &str) + Send + Sync + 'static,
    {
        self.pre_save = Some(Arc::new(hook));
        self
    }

    pub fn on_dropped_log<F>(mut self, callback: F) -> Self
    where
        F: Fn(&LogRecord) + Send + Sync + 'static,
    {
        self.on_dropped_log = Some(Arc::new(callback));
        self
    }

    pub fn sanitizer<S>(mut self, sanitizer: S) -> Self
    where
        S: Sanitizer + 'static,
    {
        self.sanitizer = Some(Arc::new(sanitizer));
        self
    }

    /// Fill in defaults and validate.
    pub fn build(self) -> Result<ProcessorOptions, OptionsError> {
        let num_workers = self.num_workers.unwrap_or(DEFAULT_NUM_WORKERS);
        if num_workers == 0 {
            return Err(OptionsError::NoWorkers);
        }

        let queue_size = match self.queue_size {
            None | Some(0) => return Err(OptionsError::MissingQueueSize),
            Some(size) if size > MAX_QUEUE_CAPACITY => {
                return Err(OptionsError::QueueSizeOutOfRange(size))
            }
            Some(size) => size,
        };

        let resize_interval = self.resize_interval.unwrap_or(DEFAULT_RESIZE_INTERVAL);
        if resize_interval.is_zero() {
            return Err(OptionsError::ZeroResizeInterval);
        }

        let log_filter: LogFilter = match self.log_filter {
            Some(filter) => filter,
            None => Arc::new(|_: &LogRecord| true),
        };
        let pre_process_logs: PreProcessLogs = match self.pre_process_logs {
            Some(hook) => hook,
            None => Arc::new(|_: &[LogRecord], _: &str| {}),
        };
        let pre_save: PreSave = match self.pre_save {
            Some(hook) => hook,
            None => Arc::new(|_: &LogRecord, _: &str| {}),
        };

        Ok(ProcessorOptions {
            num_workers,
            queue_size,
            report_busy: self.report_busy,
            blocking_submit: self.blocking_submit,
            collector_tags: self.collector_tags,
            dyn_queue_size_warmup: self.dyn_queue_size_warmup,
            dyn_queue_size_memory: self.dyn_queue_size_memory,
            resize_interval,
            log_size_metrics_enabled: self.log_size_metrics_enabled,
            drain_on_close: self.drain_on_close.unwrap_or(true),
            log_filter,
            pre_process_logs,
            pre_save,
            on_dropped_log: self.on_dropped_log,
            sanitizer: self.sanitizer,
        })
    }
}
