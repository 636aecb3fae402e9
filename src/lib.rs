//! Log Collector Library
//!
//! This library provides the processing core between an ingestion gateway and log
//! storage:
//!
//! - **queue**: Bounded queue with a fixed worker pool and drop reporting
//! - **processor**: Batch intake, collector tagging and per-record processing
//! - **sanitizer**: Record normalization applied by the workers
//! - **pipeline**: Persistence chain (pre-save hook, save, size counting, extras)
//! - **capacity**: Memory-budget based dynamic queue sizing
//! - **options**: Processor options builder
//! - **stats**: Processor and capacity counters
//! - **storage**: Storage writer trait and an in-memory writer
//! - **client**: HTTP storage writer with retry logic
//! - **config**: Environment-based service configuration
//! - **log_generator**: Synthetic log batches for driving the service
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use log_collector::model::{LogRecord, Process, Severity};
//! use log_collector::options::ProcessorOptions;
//! use log_collector::processor::{LogOptions, LogProcessor, QueuedLogProcessor};
//! use log_collector::storage::MemoryLogWriter;
//!
//! #[tokio::main]
//! async fn main() {
//!     let options = ProcessorOptions::builder()
//!         .num_workers(4)
//!         .queue_size(1000)
//!         .collector_tags([("collector", "edge-1")])
//!         .build()
//!         .expect("valid options");
//!
//!     let writer = Arc::new(MemoryLogWriter::new());
//!     let processor = QueuedLogProcessor::new(writer.clone(), Vec::new(), options);
//!
//!     let process = Arc::new(Process::new("checkout"));
//!     let records = vec![LogRecord::new(process, Severity::Info, "order placed")];
//!     let results = processor
//!         .process_logs(records, LogOptions::default())
//!         .await
//!         .expect("not busy");
//!     assert_eq!(results, vec![true]);
//!
//!     processor.close().await.ok();
//!     assert_eq!(writer.len(), 1);
//! }
//! ```

// Module declarations
pub mod capacity;
pub mod client;
pub mod config;
pub mod log_generator;
pub mod model;
pub mod options;
pub mod pipeline;
pub mod processor;
pub mod queue;
pub mod sanitizer;
pub mod stats;
pub mod storage;

// Re-export commonly used types at crate root for convenience
pub use capacity::CapacityController;
pub use client::{ClientError, HttpLogWriter};
pub use config::{Config, ConfigError};
pub use log_generator::{GeneratorConfig, LogGenerator};
pub use model::{AnyValue, KeyValue, LogRecord, Process, Severity};
pub use options::{OptionsError, ProcessorOptions, ProcessorOptionsBuilder};
pub use pipeline::{ChainedProcessLog, ProcessLog};
pub use processor::{
    InboundTransport, LogFormat, LogOptions, LogProcessor, ProcessorError, QueuedLogProcessor,
};
pub use queue::{BoundedQueue, MAX_QUEUE_CAPACITY};
pub use sanitizer::{ChainedSanitizer, EmptyServiceNameSanitizer, Sanitizer};
pub use stats::{CapacityStats, ProcessorStats};
pub use storage::{MemoryLogWriter, StorageError, StorageWriter};
