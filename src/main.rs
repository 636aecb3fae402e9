//! Log Collector - queued log processing service
//!
//! This service feeds generated log batches through the queued log processor,
//! which sanitizes, tags and persists each record to the storage backend.
//!
//! ## Features
//!
//! - Bounded queue with a fixed worker pool and configurable backpressure
//! - Optional memory-based dynamic queue sizing
//! - HTTP persistence with retry logic
//! - Graceful shutdown on Ctrl+C
//!
//! ## Configuration
//!
//! Configuration is loaded from `LOG_COLLECTOR_*` environment variables (see
//! `log_collector::config::Config`), plus:
//!
//! - `RUST_LOG`: Logging level filter (default: info)

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use log_collector::client::HttpLogWriter;
use log_collector::config::Config;
use log_collector::log_generator::{GeneratorConfig, LogGenerator};
use log_collector::processor::{
    InboundTransport, LogFormat, LogOptions, LogProcessor, QueuedLogProcessor,
};

/// Interval between generated batches
const GENERATION_INTERVAL: Duration = Duration::from_millis(200);

/// Time allowed for draining the queue on shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between progress reports
const REPORT_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    init_tracing();

    info!("Starting Log Collector service...");

    let config = match Config::from_env() {
        Ok(config) => {
            info!(
                storage_url = %config.storage_url,
                num_workers = config.num_workers,
                queue_size = config.queue_size,
                queue_size_memory_mib = config.queue_size_memory_mib,
                max_retries = config.max_retries,
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let options = match config.processor_options() {
        Ok(options) => options,
        Err(e) => {
            error!(error = %e, "Invalid processor options");
            std::process::exit(1);
        }
    };

    let writer = match HttpLogWriter::new(&config) {
        Ok(writer) => {
            info!(logs_url = %writer.logs_url(), "Storage writer initialized");
            Arc::new(writer)
        }
        Err(e) => {
            error!(error = %e, "Failed to create storage writer");
            std::process::exit(1);
        }
    };

    let generator = match LogGenerator::new(GeneratorConfig::default()) {
        Ok(generator) => {
            info!(
                batch_size = generator.config().batch_size,
                devices_per_type = generator.config().devices_per_type,
                "Log generator initialized"
            );
            generator
        }
        Err(e) => {
            error!(error = %e, "Failed to create log generator");
            std::process::exit(1);
        }
    };

    let processor = Arc::new(QueuedLogProcessor::new(writer, Vec::new(), options));

    let shutdown = CancellationToken::new();
    let generator_handle = {
        let processor = processor.clone();
        let shutdown = shutdown.clone();
        let tenant = config.tenant.clone();
        tokio::spawn(async move {
            info!("Generator task started");
            run_generator(generator, processor, tenant, shutdown).await;
            info!("Generator task completed");
        })
    };

    info!("Log Collector running. Press Ctrl+C to stop.");
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, stopping..."),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }

    info!("Initiating graceful shutdown...");
    shutdown.cancel();
    if let Err(e) = generator_handle.await {
        warn!(error = %e, "Generator task panicked during shutdown");
    }

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, processor.close()).await {
        Ok(Ok(())) => info!("Processor drained"),
        Ok(Err(e)) => warn!(error = %e, "Processor close failed"),
        Err(_) => warn!("Processor shutdown timed out after {:?}", SHUTDOWN_TIMEOUT),
    }

    let stats = processor.stats();
    info!(
        batches = stats.batches,
        received = stats.logs_received,
        saved = stats.logs_saved,
        dropped = stats.logs_dropped,
        save_failures = stats.save_failures,
        "Log Collector stopped"
    );
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

/// Feed generated batches into the processor until `shutdown` fires.
async fn run_generator(
    generator: LogGenerator,
    processor: Arc<QueuedLogProcessor>,
    tenant: String,
    shutdown: CancellationToken,
) {
    let mut ticker = interval(GENERATION_INTERVAL);
    let mut accepted: u64 = 0;
    let mut dropped: u64 = 0;
    let mut last_report_time = Instant::now();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let options = LogOptions {
            log_format: LogFormat::Otlp,
            inbound_transport: InboundTransport::Unknown,
            tenant: tenant.clone(),
        };
        match processor.process_logs(generator.generate_batch(), options).await {
            Ok(results) => {
                let ok = results.iter().filter(|r| **r).count() as u64;
                accepted += ok;
                dropped += results.len() as u64 - ok;
            }
            Err(e) => {
                warn!(error = %e, "Batch rejected");
            }
        }

        if last_report_time.elapsed() >= REPORT_INTERVAL {
            let stats = processor.stats();
            info!(
                accepted,
                dropped,
                queue_length = stats.queue_length,
                queue_capacity = stats.queue_capacity,
                average_in_queue_latency_ms = stats.average_in_queue_latency.as_millis() as u64,
                "Generator progress"
            );
            accepted = 0;
            dropped = 0;
            last_report_time = Instant::now();
        }
    }
}
