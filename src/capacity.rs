//! Adaptive queue sizing.
//!
//! When a memory budget is configured, [`CapacityController`] periodically divides
//! that budget by the observed average record size and resizes the queue to the
//! result. Small differences are ignored so the queue does not flap between sizes.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::processor::QueueItem;
use crate::queue::{BoundedQueue, MAX_QUEUE_CAPACITY};
use crate::stats::CapacityStats;

/// Minimum ratio between ideal and current capacity before resizing.
pub const MIN_REQUIRED_CHANGE: f64 = 1.2;

/// Resizes a queue to fit a memory budget.
pub struct CapacityController {
    queue: Arc<BoundedQueue<QueueItem>>,
    stats: Arc<CapacityStats>,

    /// Budget in bytes for the queued records
    memory_budget: u64,

    /// Records to observe before the first resize
    warm_up: u64,

    /// Serializes resize decisions
    resize_lock: Mutex<()>,
}

impl CapacityController {
    pub fn new(
        queue: Arc<BoundedQueue<QueueItem>>,
        stats: Arc<CapacityStats>,
        memory_budget: u64,
        warm_up: u64,
    ) -> Self {
        Self {
            queue,
            stats,
            memory_budget,
            warm_up,
            resize_lock: Mutex::new(()),
        }
    }

    /// Whether the controller will ever resize; fixed at construction.
    pub fn is_active(&self) -> bool {
        self.memory_budget > 0
    }

    /// Run one sampling step, resizing the queue if warranted.
    ///
    /// Returns the new capacity when a resize happened.
    pub fn update_queue_size(&self) -> Option<usize> {
        if !self.is_active() {
            return None;
        }

        let records = self.stats.records_processed();
        if records == 0 || records < self.warm_up {
            return None;
        }

        let _guard = self
            .resize_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let average = match self.stats.average_record_size() {
            Some(average) if average > 0 => average,
            _ => return None,
        };

        let ideal = (self.memory_budget / average).clamp(1, MAX_QUEUE_CAPACITY as u64) as usize;
        let current = self.queue.capacity();
        if !exceeds_required_change(ideal, current) {
            debug!(ideal, current, "Queue capacity within tolerance, not resizing");
            return None;
        }

        info!(
            new_size = ideal,
            average_log_size_bytes = average,
            "Resizing the internal log queue"
        );
        self.queue.resize(ideal);
        Some(ideal)
    }

    /// Spawn the periodic loop; it exits when `cancel` fires.
    ///
    /// Returns `None` without spawning anything when the controller is idle.
    pub fn spawn(
        self: Arc<Self>,
        period: Duration,
        cancel: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        if !self.is_active() {
            return None;
        }

        Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Skip the first immediate tick
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Capacity controller stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        self.update_queue_size();
                    }
                }
            }
        }))
    }
}

/// True if `a` and `b` differ by more than [`MIN_REQUIRED_CHANGE`] as a ratio.
fn exceeds_required_change(a: usize, b: usize) -> bool {
    let (larger, smaller) = if a > b { (a, b) } else { (b, a) };
    if smaller == 0 {
        return larger > 0;
    }
    larger as f64 / smaller as f64 > MIN_REQUIRED_CHANGE
}
