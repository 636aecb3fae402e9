//! Counters shared between the processor, its workers and the capacity controller.
//!
//! All counters are monotonic `AtomicU64`s updated with `Ordering::Relaxed`:
//! readers only ever take a sample, so no ordering with other memory is needed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::processor::{InboundTransport, LogFormat};

/// Running totals used to size the queue.
#[derive(Debug, Default)]
pub struct CapacityStats {
    bytes_processed: AtomicU64,
    records_processed: AtomicU64,
}

impl CapacityStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one processed record of `bytes` bytes.
    pub fn record(&self, bytes: u64) {
        self.bytes_processed.fetch_add(bytes, Ordering::Relaxed);
        self.records_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed.load(Ordering::Relaxed)
    }

    pub fn records_processed(&self) -> u64 {
        self.records_processed.load(Ordering::Relaxed)
    }

    /// Average record size in bytes, or `None` before any record was counted.
    pub fn average_record_size(&self) -> Option<u64> {
        let records = self.records_processed();
        if records == 0 {
            return None;
        }
        Some(self.bytes_processed() / records)
    }
}

/// Processor counters, updated from the intake path and the workers.
#[derive(Debug, Default)]
pub(crate) struct ProcessorMetrics {
    pub(crate) received: AtomicU64,
    pub(crate) rejected: AtomicU64,
    pub(crate) dropped: AtomicU64,
    pub(crate) malformed: AtomicU64,
    pub(crate) saved: AtomicU64,
    pub(crate) save_failures: AtomicU64,
    pub(crate) batches: AtomicU64,
    in_queue_latency_micros: AtomicU64,
    dequeued: AtomicU64,
    received_by_source: Mutex<HashMap<(LogFormat, InboundTransport), u64>>,
}

impl ProcessorMetrics {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self, format: LogFormat, transport: InboundTransport, count: u64) {
        self.received.fetch_add(count, Ordering::Relaxed);
        *self
            .received_by_source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry((format, transport))
            .or_insert(0) += count;
    }

    pub(crate) fn record_in_queue_latency(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.in_queue_latency_micros
            .fetch_add(micros, Ordering::Relaxed);
        self.dequeued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ProcessorStats {
        let dequeued = self.dequeued.load(Ordering::Relaxed);
        let latency_total = self.in_queue_latency_micros.load(Ordering::Relaxed);
        ProcessorStats {
            batches: self.batches.load(Ordering::Relaxed),
            logs_received: self.received.load(Ordering::Relaxed),
            logs_rejected: self.rejected.load(Ordering::Relaxed),
            logs_dropped: self.dropped.load(Ordering::Relaxed),
            logs_malformed: self.malformed.load(Ordering::Relaxed),
            logs_saved: self.saved.load(Ordering::Relaxed),
            save_failures: self.save_failures.load(Ordering::Relaxed),
            average_in_queue_latency: if dequeued == 0 {
                Duration::ZERO
            } else {
                Duration::from_micros(latency_total / dequeued)
            },
            received_by_source: self
                .received_by_source
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            ..ProcessorStats::default()
        }
    }
}

/// Point-in-time view of the processor's counters and queue.
#[derive(Debug, Clone, Default)]
pub struct ProcessorStats {
    /// Number of `process_logs` calls
    pub batches: u64,

    /// Records handed to `process_logs`
    pub logs_received: u64,

    /// Records refused by the record filter
    pub logs_rejected: u64,

    /// Records refused by the queue (full or stopped)
    pub logs_dropped: u64,

    /// Records dequeued without a process
    pub logs_malformed: u64,

    /// Records the storage writer accepted
    pub logs_saved: u64,

    /// Records the storage writer failed to persist
    pub save_failures: u64,

    /// Bytes counted for queue sizing
    pub bytes_processed: u64,

    /// Records counted for queue sizing
    pub records_processed: u64,

    pub queue_length: usize,

    pub queue_capacity: usize,

    /// Mean time between enqueue and dequeue
    pub average_in_queue_latency: Duration,

    /// Received records per source format and transport
    pub received_by_source: HashMap<(LogFormat, InboundTransport), u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_stats_average() {
        let stats = CapacityStats::new();
        assert_eq!(stats.average_record_size(), None);

        stats.record(1000);
        stats.record(3000);
        assert_eq!(stats.records_processed(), 2);
        assert_eq!(stats.bytes_processed(), 4000);
        assert_eq!(stats.average_record_size(), Some(2000));
    }

    #[test]
    fn test_capacity_stats_concurrent_updates() {
        let stats = std::sync::Arc::new(CapacityStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record(10);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(stats.records_processed(), 8000);
        assert_eq!(stats.bytes_processed(), 80_000);
    }

    #[test]
    fn test_metrics_snapshot() {
        let metrics = ProcessorMetrics::default();
        metrics.record_received(LogFormat::Otlp, InboundTransport::Http, 3);
        metrics.record_received(LogFormat::Otlp, InboundTransport::Http, 2);
        metrics.record_received(LogFormat::Proto, InboundTransport::Grpc, 1);
        ProcessorMetrics::incr(&metrics.dropped);
        metrics.record_in_queue_latency(Duration::from_micros(100));
        metrics.record_in_queue_latency(Duration::from_micros(300));

        let stats = metrics.snapshot();
        assert_eq!(stats.logs_received, 6);
        assert_eq!(stats.logs_dropped, 1);
        assert_eq!(stats.average_in_queue_latency, Duration::from_micros(200));
        assert_eq!(
            stats.received_by_source[&(LogFormat::Otlp, InboundTransport::Http)],
            5
        );
        assert_eq!(
            stats.received_by_source[&(LogFormat::Proto, InboundTransport::Grpc)],
            1
        );
    }
}
