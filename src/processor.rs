//! Log processor: batch intake in front of the bounded queue and worker pool.
//!
//! `process_logs` runs on the caller's task. It invokes the pre-batch hook, merges
//! collector tags into each record's process, then enqueues the records one by one.
//! Queue workers validate, sanitize and persist each record independently of the
//! request that submitted it, so persistence failures never reach the caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::capacity::CapacityController;
use crate::model::{KeyValue, LogRecord, Process};
use crate::options::ProcessorOptions;
use crate::pipeline::{ChainedProcessLog, CountStage, PreSaveStage, ProcessLog, SaveStage};
use crate::queue::BoundedQueue;
use crate::sanitizer::{
    standard_sanitizers, ChainedSanitizer, Sanitizer, SERVICE_NAME_REPLACEMENT,
};
use crate::stats::{CapacityStats, ProcessorMetrics, ProcessorStats};
use crate::storage::StorageWriter;

/// Transport a batch arrived on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InboundTransport {
    Grpc,
    Http,
    #[default]
    Unknown,
}

impl std::fmt::Display for InboundTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InboundTransport::Grpc => write!(f, "grpc"),
            InboundTransport::Http => write!(f, "http"),
            InboundTransport::Unknown => write!(f, "unknown"),
        }
    }
}

/// Format a batch was originally encoded in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Proto,
    Otlp,
    #[default]
    Unknown,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Proto => write!(f, "proto"),
            LogFormat::Otlp => write!(f, "otlp"),
            LogFormat::Unknown => write!(f, "unknown"),
        }
    }
}

/// Per-batch attribution passed along with the records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogOptions {
    pub log_format: LogFormat,
    pub inbound_transport: InboundTransport,
    pub tenant: String,
}

/// A record waiting in the queue.
#[derive(Debug)]
pub struct QueueItem {
    pub queued_at: Instant,
    pub record: LogRecord,
    pub tenant: String,
}

/// Errors returned to the batch caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    /// The queue refused a record while report-busy is enabled.
    ///
    /// `results` holds the outcome of every record before the refused one.
    Busy { results: Vec<bool> },
}

impl std::fmt::Display for ProcessorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessorError::Busy { .. } => write!(f, "server busy"),
        }
    }
}

impl std::error::Error for ProcessorError {}

/// The processing contract offered to the ingestion gateway.
#[async_trait]
pub trait LogProcessor: Send + Sync {
    /// Accept a batch; returns one flag per record, `false` meaning dropped.
    async fn process_logs(
        &self,
        records: Vec<LogRecord>,
        options: LogOptions,
    ) -> Result<Vec<bool>, ProcessorError>;

    /// Stop intake and wait for buffered records to be handled.
    async fn close(&self) -> Result<(), ProcessorError>;
}

/// Work done by a queue worker for each item.
struct ItemProcessor {
    sanitizer: ChainedSanitizer,
    chain: ChainedProcessLog,
    metrics: Arc<ProcessorMetrics>,
}

impl ItemProcessor {
    async fn process_item(&self, item: QueueItem) {
        self.metrics.record_in_queue_latency(item.queued_at.elapsed());
        let QueueItem { record, tenant, .. } = item;

        if record.process.is_none() {
            error!(tenant = %tenant, "Process is empty for the log, dropping it");
            ProcessorMetrics::incr(&self.metrics.malformed);
            return;
        }

        let record = self.sanitizer.sanitize(record);
        self.chain.process(&record, &tenant).await;
    }
}

/// [`LogProcessor`] backed by a [`BoundedQueue`] and a fixed worker pool.
pub struct QueuedLogProcessor {
    queue: Arc<BoundedQueue<QueueItem>>,
    options: ProcessorOptions,
    metrics: Arc<ProcessorMetrics>,
    capacity_stats: Arc<CapacityStats>,
    controller_task: Mutex<Option<JoinHandle<()>>>,
    stop: CancellationToken,
    closed: AtomicBool,
}

impl QueuedLogProcessor {
    /// Build the processor and start its workers.
    ///
    /// `additional` stages run after persistence for every record. Must be called
    /// from within a tokio runtime.
    pub fn new(
        writer: Arc<dyn StorageWriter>,
        additional: Vec<Arc<dyn ProcessLog>>,
        options: ProcessorOptions,
    ) -> Self {
        let metrics = Arc::new(ProcessorMetrics::default());
        let capacity_stats = Arc::new(CapacityStats::new());

        let on_dropped = {
            let metrics = metrics.clone();
            let callback = options.on_dropped_log.clone();
            move |item: QueueItem| {
                ProcessorMetrics::incr(&metrics.dropped);
                if let Some(callback) = &callback {
                    callback(&item.record);
                }
            }
        };
        let queue = Arc::new(BoundedQueue::new(options.queue_size, Some(on_dropped)));

        let mut sanitizers = standard_sanitizers();
        if let Some(sanitizer) = &options.sanitizer {
            sanitizers.push(sanitizer.clone());
        }

        let pre_save: Arc<dyn ProcessLog> = Arc::new(PreSaveStage {
            hook: options.pre_save.clone(),
        });
        let save: Arc<dyn ProcessLog> = Arc::new(SaveStage {
            writer,
            metrics: metrics.clone(),
        });
        let mut stages = vec![pre_save, save];
        if options.dyn_queue_size_memory > 0 {
            info!(
                memory_mib = options.dyn_queue_size_memory / 1024 / 1024,
                queue_size_warmup = options.dyn_queue_size_warmup,
                "Dynamically adjusting the queue size at runtime"
            );
        }
        if options.counts_log_sizes() {
            stages.push(Arc::new(CountStage {
                stats: capacity_stats.clone(),
            }));
        }
        stages.extend(additional);

        let items = Arc::new(ItemProcessor {
            sanitizer: ChainedSanitizer::new(sanitizers),
            chain: ChainedProcessLog::new(stages),
            metrics: metrics.clone(),
        });
        queue.start_consumers(options.num_workers, move |item: QueueItem| {
            let items = items.clone();
            async move { items.process_item(item).await }
        });

        let stop = CancellationToken::new();
        let controller = Arc::new(CapacityController::new(
            queue.clone(),
            capacity_stats.clone(),
            options.dyn_queue_size_memory,
            options.dyn_queue_size_warmup,
        ));
        let controller_task = controller.spawn(options.resize_interval, stop.clone());

        info!(
            num_workers = options.num_workers,
            queue_size = options.queue_size,
            report_busy = options.report_busy,
            blocking_submit = options.blocking_submit,
            "Log processor started"
        );

        Self {
            queue,
            options,
            metrics,
            capacity_stats,
            controller_task: Mutex::new(controller_task),
            stop,
            closed: AtomicBool::new(false),
        }
    }

    /// Merge the collector tags into every record's process and give empty service
    /// names their replacement.
    ///
    /// Records that shared one `Process` share the prepared replacement as well, so
    /// each distinct process is handled once and aliasing survives into storage.
    /// Nothing is written in place.
    fn prepare_processes(&self, records: &mut [LogRecord]) {
        // Keyed by the original allocation; the original is kept alive alongside
        // so its address cannot be reused while the map exists.
        let mut prepared: HashMap<*const Process, (Arc<Process>, Arc<Process>)> = HashMap::new();
        for record in records.iter_mut() {
            let Some(process) = record.process.take() else {
                continue;
            };
            let replacement = prepared
                .entry(Arc::as_ptr(&process))
                .or_insert_with(|| {
                    let updated = self.prepare_process(&process);
                    (process.clone(), updated)
                })
                .1
                .clone();
            record.process = Some(replacement);
        }
    }

    fn prepare_process(&self, process: &Arc<Process>) -> Arc<Process> {
        let missing: Vec<KeyValue> = self
            .options
            .collector_tags
            .iter()
            .filter(|(key, value)| {
                let present = process.has_string_attribute(key, value);
                if present {
                    debug!(key = %key, value = %value, "Ignoring collector tag already present on process");
                }
                !present
            })
            .map(|(key, value)| KeyValue::string(key.clone(), value.clone()))
            .collect();
        let unnamed = process.service_name.is_empty();

        if missing.is_empty() && !unnamed {
            return process.clone();
        }

        let mut updated = Process::clone(process);
        if unnamed {
            updated.service_name = SERVICE_NAME_REPLACEMENT.to_string();
        }
        updated.attributes.extend(missing);
        Arc::new(updated)
    }

    async fn enqueue_log(&self, record: LogRecord, options: &LogOptions) -> bool {
        if !(self.options.log_filter)(&record) {
            ProcessorMetrics::incr(&self.metrics.rejected);
            debug!(
                service_name = record.service_name().unwrap_or_default(),
                format = %options.log_format,
                transport = %options.inbound_transport,
                "Log record rejected by filter"
            );
            // Not dropped: the record was actively rejected.
            return true;
        }

        let item = QueueItem {
            queued_at: Instant::now(),
            record,
            tenant: options.tenant.clone(),
        };
        if self.options.blocking_submit {
            self.queue.produce_blocking(item).await
        } else {
            self.queue.produce(item)
        }
    }

    /// Snapshot of the processor's counters and queue state.
    pub fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            bytes_processed: self.capacity_stats.bytes_processed(),
            records_processed: self.capacity_stats.records_processed(),
            queue_length: self.queue.size(),
            queue_capacity: self.queue.capacity(),
            ..self.metrics.snapshot()
        }
    }

}

#[async_trait]
impl LogProcessor for QueuedLogProcessor {
    async fn process_logs(
        &self,
        mut records: Vec<LogRecord>,
        options: LogOptions,
    ) -> Result<Vec<bool>, ProcessorError> {
        (self.options.pre_process_logs)(&records, &options.tenant);
        ProcessorMetrics::incr(&self.metrics.batches);
        self.metrics.record_received(
            options.log_format,
            options.inbound_transport,
            records.len() as u64,
        );

        // Must finish before the first record is enqueued: records of this batch may
        // share a Process that no worker has seen yet.
        self.prepare_processes(&mut records);

        let mut results = Vec::with_capacity(records.len());
        for record in records {
            let ok = self.enqueue_log(record, &options).await;
            if !ok && self.options.report_busy {
                warn!(
                    accepted = results.len(),
                    tenant = %options.tenant,
                    "Queue full, rejecting the rest of the batch"
                );
                return Err(ProcessorError::Busy { results });
            }
            results.push(ok);
        }
        Ok(results)
    }

    async fn close(&self) -> Result<(), ProcessorError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.stop.cancel();
        let controller_task = self
            .controller_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = controller_task {
            if let Err(e) = task.await {
                warn!(error = %e, "Capacity controller terminated abnormally");
            }
        }

        if self.options.drain_on_close {
            self.queue.stop().await;
        } else {
            self.queue.stop_discarding().await;
        }

        info!("Log processor closed");
        Ok(())
    }
}

impl Drop for QueuedLogProcessor {
    fn drop(&mut self) {
        // Lets the controller loop and idle workers exit if close() was never called.
        self.stop.cancel();
        self.queue.signal_stop();
    }
}
