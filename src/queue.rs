//! Bounded queue with a fixed pool of consumer workers.
//!
//! The queue holds at most `capacity` items. Producers either get rejected
//! immediately ([`BoundedQueue::produce`]) or wait for room
//! ([`BoundedQueue::produce_blocking`]). Every rejected item is handed to the drop
//! callback exactly once, so an item is always either consumed by one worker or
//! reported as dropped.
//!
//! The buffer and its bound share a single mutex; `tokio::sync::Notify` wakes
//! consumers when items arrive and blocked producers when room frees up.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Hard ceiling on the queue capacity.
pub const MAX_QUEUE_CAPACITY: usize = 1_000_000;

type DropCallback<T> = Box<dyn Fn(T) + Send + Sync>;

struct QueueState<T> {
    items: VecDeque<T>,
    capacity: usize,
    stopped: bool,
}

/// Capacity-bounded buffer between producers and a worker pool.
pub struct BoundedQueue<T> {
    state: Mutex<QueueState<T>>,

    /// Signalled when an item is pushed or the queue stops
    not_empty: Notify,

    /// Signalled when an item is popped, the queue grows, or it stops
    not_full: Notify,

    on_dropped: Option<DropCallback<T>>,

    workers: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<U>(mutex: &Mutex<U>) -> MutexGuard<'_, U> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn clamp_capacity(capacity: usize) -> usize {
    capacity.clamp(1, MAX_QUEUE_CAPACITY)
}

impl<T: Send + 'static> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items.
    ///
    /// The capacity is clamped into `1..=MAX_QUEUE_CAPACITY`. `on_dropped` receives
    /// every item the queue refuses.
    pub fn new<F>(capacity: usize, on_dropped: Option<F>) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let capacity = clamp_capacity(capacity);
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.min(10_000)),
                capacity,
                stopped: false,
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            on_dropped: on_dropped.map(|f| Box::new(f) as DropCallback<T>),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Try to enqueue without waiting.
    ///
    /// Returns `false` if the queue is full or stopped; the item then goes to the
    /// drop callback.
    pub fn produce(&self, item: T) -> bool {
        let rejected = {
            let mut state = lock(&self.state);
            if state.stopped || state.items.len() >= state.capacity {
                Some(item)
            } else {
                state.items.push_back(item);
                None
            }
        };

        match rejected {
            None => {
                self.not_empty.notify_one();
                true
            }
            Some(item) => {
                self.report_dropped(item);
                false
            }
        }
    }

    /// Enqueue, waiting for room if the queue is full.
    ///
    /// Returns `false` only if the queue is (or becomes) stopped while waiting; the
    /// item then goes to the drop callback.
    pub async fn produce_blocking(&self, item: T) -> bool {
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = lock(&self.state);
                if state.stopped {
                    drop(state);
                    self.report_dropped(item);
                    return false;
                }
                if state.items.len() < state.capacity {
                    state.items.push_back(item);
                    drop(state);
                    self.not_empty.notify_one();
                    return true;
                }
            }

            notified.await;
        }
    }

    /// Spawn `num_workers` tokio tasks, each pulling items and awaiting `handler`.
    ///
    /// A panicking handler loses only the item it was given; the worker logs the
    /// panic and keeps consuming. Must be called from within a tokio runtime.
    pub fn start_consumers<F, Fut>(self: &Arc<Self>, num_workers: usize, handler: F)
    where
        F: Fn(T) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut workers = lock(&self.workers);
        for worker_id in 0..num_workers {
            let queue = self.clone();
            let handler = handler.clone();
            workers.push(tokio::spawn(async move {
                debug!(worker_id, "Queue worker started");
                while let Some(item) = queue.next_item().await {
                    if let Err(panic) = AssertUnwindSafe(handler(item)).catch_unwind().await {
                        error!(
                            worker_id,
                            panic = panic_message(panic.as_ref()),
                            "Queue handler panicked, item lost"
                        );
                    }
                }
                debug!(worker_id, "Queue worker stopped");
            }));
        }
    }

    /// Wait for the next item. Returns `None` once the queue is stopped and empty.
    async fn next_item(&self) -> Option<T> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = lock(&self.state);
                if let Some(item) = state.items.pop_front() {
                    drop(state);
                    self.not_full.notify_one();
                    return Some(item);
                }
                if state.stopped {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Change the capacity bound.
    ///
    /// The new capacity is clamped into `1..=MAX_QUEUE_CAPACITY`. Buffered items are
    /// never dropped: shrinking below the current size only rejects new items until
    /// the workers catch up. Returns `true` if the capacity changed.
    pub fn resize(&self, new_capacity: usize) -> bool {
        let new_capacity = clamp_capacity(new_capacity);
        let old_capacity = {
            let mut state = lock(&self.state);
            let old = state.capacity;
            state.capacity = new_capacity;
            old
        };

        if old_capacity == new_capacity {
            return false;
        }

        info!(old_capacity, new_capacity, "Queue capacity changed");

        if new_capacity > old_capacity {
            self.not_full.notify_waiters();
        }
        true
    }

    /// Stop accepting items and wait for the workers to drain the buffer and exit.
    ///
    /// Anything still buffered once the workers are gone is reported as dropped.
    pub async fn stop(&self) {
        self.signal_stop();
        self.join_workers().await;

        let leftover: Vec<T> = lock(&self.state).items.drain(..).collect();
        if !leftover.is_empty() {
            warn!(
                leftover = leftover.len(),
                "Queue workers exited with items still buffered"
            );
        }
        for item in leftover {
            self.report_dropped(item);
        }
    }

    /// Stop accepting items, report every buffered item as dropped, then wait for
    /// the workers to exit.
    pub async fn stop_discarding(&self) {
        let discarded: Vec<T> = {
            let mut state = lock(&self.state);
            state.stopped = true;
            state.items.drain(..).collect()
        };

        if !discarded.is_empty() {
            warn!(
                discarded = discarded.len(),
                "Queue stopped, discarding buffered items"
            );
        }
        for item in discarded {
            self.report_dropped(item);
        }

        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
        self.join_workers().await;
    }

    /// Stop accepting items and wake everyone waiting, without joining the workers.
    ///
    /// Workers still drain what is buffered before exiting.
    pub fn signal_stop(&self) {
        lock(&self.state).stopped = true;
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    async fn join_workers(&self) {
        let handles = std::mem::take(&mut *lock(&self.workers));
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Queue worker terminated abnormally");
            }
        }
    }

    fn report_dropped(&self, item: T) {
        if let Some(on_dropped) = &self.on_dropped {
            on_dropped(item);
        }
    }

    /// Current capacity bound.
    pub fn capacity(&self) -> usize {
        lock(&self.state).capacity
    }

    /// Number of buffered items not yet taken by a worker.
    pub fn size(&self) -> usize {
        lock(&self.state).items.len()
    }

    /// Whether the queue has been stopped.
    pub fn is_stopped(&self) -> bool {
        lock(&self.state).stopped
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn recording_queue(capacity: usize) -> (BoundedQueue<u32>, Arc<Mutex<Vec<u32>>>) {
        let dropped = Arc::new(Mutex::new(Vec::new()));
        let sink = dropped.clone();
        let queue = BoundedQueue::new(
            capacity,
            Some(move |item: u32| sink.lock().unwrap().push(item)),
        );
        (queue, dropped)
    }

    #[tokio::test]
    async fn test_produce_up_to_capacity_then_drop() {
        for capacity in [1usize, 2, 5, 16] {
            let (queue, dropped) = recording_queue(capacity);

            for i in 0..capacity {
                assert!(queue.produce(i as u32), "item {} should be accepted", i);
            }
            assert!(!queue.produce(999));

            assert_eq!(queue.size(), capacity);
            assert_eq!(*dropped.lock().unwrap(), vec![999]);
        }
    }

    #[tokio::test]
    async fn test_two_slots_one_worker_third_item_dropped() {
        let (queue, dropped) = recording_queue(2);

        let results: Vec<bool> = (1..=3).map(|i| queue.produce(i)).collect();

        assert_eq!(results, vec![true, true, false]);
        assert_eq!(*dropped.lock().unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn test_capacity_is_clamped() {
        let queue: BoundedQueue<u32> = BoundedQueue::new(0, None::<fn(u32)>);
        assert_eq!(queue.capacity(), 1);

        let queue: BoundedQueue<u32> = BoundedQueue::new(MAX_QUEUE_CAPACITY + 1, None::<fn(u32)>);
        assert_eq!(queue.capacity(), MAX_QUEUE_CAPACITY);
    }

    #[tokio::test]
    async fn test_consumers_process_all_items() {
        let queue = Arc::new(BoundedQueue::new(100, None::<fn(u32)>));
        let (tx, mut rx) = mpsc::unbounded_channel();

        queue.start_consumers(4, move |item: u32| {
            let tx = tx.clone();
            async move {
                tx.send(item).ok();
            }
        });

        for i in 0..50 {
            assert!(queue.produce(i));
        }

        let mut seen = Vec::new();
        while seen.len() < 50 {
            let item = timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("items should be consumed")
                .expect("channel open");
            seen.push(item);
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_single_worker_is_fifo() {
        let queue = Arc::new(BoundedQueue::new(10, None::<fn(u32)>));
        for i in 0..5 {
            queue.produce(i);
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        queue.start_consumers(1, move |item: u32| {
            let tx = tx.clone();
            async move {
                tx.send(item).ok();
            }
        });
        queue.stop().await;

        let mut order = Vec::new();
        while let Ok(item) = rx.try_recv() {
            order.push(item);
        }
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_stop_drains_buffered_items() {
        let queue = Arc::new(BoundedQueue::new(10, None::<fn(u32)>));
        for i in 0..10 {
            assert!(queue.produce(i));
        }

        let processed = Arc::new(AtomicUsize::new(0));
        let counter = processed.clone();
        queue.start_consumers(2, move |_item: u32| {
            let counter = counter.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        timeout(Duration::from_secs(2), queue.stop())
            .await
            .expect("stop should finish once drained");

        assert_eq!(processed.load(Ordering::SeqCst), 10);
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_lose_buffered_items() {
        let (queue, dropped) = recording_queue(10);
        let queue = Arc::new(queue);
        for i in 0..4 {
            assert!(queue.produce(i));
        }

        let processed = Arc::new(Mutex::new(Vec::new()));
        let sink = processed.clone();
        queue.start_consumers(1, move |item: u32| {
            let sink = sink.clone();
            async move {
                if item == 0 {
                    panic!("handler failed on {}", item);
                }
                sink.lock().unwrap().push(item);
            }
        });

        timeout(Duration::from_secs(2), queue.stop())
            .await
            .expect("stop should finish after a handler panic");

        assert_eq!(*processed.lock().unwrap(), vec![1, 2, 3]);
        assert!(dropped.lock().unwrap().is_empty());
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test]
    async fn test_stop_reports_items_left_without_workers() {
        let (queue, dropped) = recording_queue(4);
        queue.produce(1);
        queue.produce(2);

        // No consumers were ever started, so nothing can drain the buffer.
        queue.stop().await;

        assert_eq!(queue.size(), 0);
        assert_eq!(*dropped.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("static message");
        assert_eq!(panic_message(boxed.as_ref()), "static message");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(boxed.as_ref()), "owned message");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }

    #[tokio::test]
    async fn test_produce_after_stop_is_rejected() {
        let (queue, dropped) = recording_queue(4);
        queue.stop().await;
        queue.stop().await;

        assert!(queue.is_stopped());
        assert!(!queue.produce(7));
        assert!(!queue.produce_blocking(8).await);
        assert_eq!(*dropped.lock().unwrap(), vec![7, 8]);
    }

    #[tokio::test]
    async fn test_stop_discarding_reports_buffered_items() {
        let (queue, dropped) = recording_queue(4);
        queue.produce(1);
        queue.produce(2);

        queue.stop_discarding().await;

        assert_eq!(queue.size(), 0);
        assert_eq!(*dropped.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_blocking_produce_waits_for_room() {
        let queue = Arc::new(BoundedQueue::new(1, None::<fn(u32)>));
        assert!(queue.produce(1));

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.produce_blocking(2).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        let (tx, mut rx) = mpsc::unbounded_channel();
        queue.start_consumers(1, move |item: u32| {
            let tx = tx.clone();
            async move {
                tx.send(item).ok();
            }
        });

        let accepted = timeout(Duration::from_secs(1), producer)
            .await
            .expect("producer should be unblocked")
            .unwrap();
        assert!(accepted);

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
    }

    #[tokio::test]
    async fn test_blocking_produce_released_by_stop() {
        let (queue, dropped) = recording_queue(1);
        let queue = Arc::new(queue);
        assert!(queue.produce(1));

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.produce_blocking(2).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        queue.stop_discarding().await;

        let accepted = timeout(Duration::from_secs(1), producer)
            .await
            .expect("producer should be released")
            .unwrap();
        assert!(!accepted);

        let mut dropped = dropped.lock().unwrap().clone();
        dropped.sort_unstable();
        assert_eq!(dropped, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_resize_keeps_buffered_items() {
        let (queue, dropped) = recording_queue(4);
        for i in 0..4 {
            queue.produce(i);
        }

        assert!(queue.resize(2));
        assert_eq!(queue.capacity(), 2);
        assert_eq!(queue.size(), 4);
        assert!(!queue.produce(10));

        assert!(queue.resize(8));
        assert!(queue.produce(11));
        assert_eq!(queue.size(), 5);
        assert_eq!(*dropped.lock().unwrap(), vec![10]);

        assert!(!queue.resize(8));
    }

    #[tokio::test]
    async fn test_resize_wakes_blocked_producer() {
        let queue = Arc::new(BoundedQueue::new(1, None::<fn(u32)>));
        assert!(queue.produce(1));

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.produce_blocking(2).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        queue.resize(2);

        let accepted = timeout(Duration::from_secs(1), producer)
            .await
            .expect("growth should unblock the producer")
            .unwrap();
        assert!(accepted);
        assert_eq!(queue.size(), 2);
    }
}
