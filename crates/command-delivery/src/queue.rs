//! Bounded command queue with burst admission throttling.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::time::{sleep, timeout, Instant};
use tracing::debug;

/// Rolling burst window state for admission throttling.
struct BurstWindow {
    max_commands: u32,
    burst_period: Duration,
    /// Releases granted in the current window.
    released: u32,
    /// First release of the current window.
    window_start: Option<Instant>,
}

/// A bounded FIFO of pending dispatch units.
///
/// Capacity is enforced with a pair of semaphores; the deque itself is only
/// locked for a push or pop, never across a suspension point. When built
/// with a burst throttle, at most `max_commands` items are released via
/// [`take`](Self::take)/[`poll`](Self::poll) per rolling `burst_period`;
/// once exhausted, releases block until the period has elapsed since the
/// first release of the current burst. Throttling gates admission out of
/// the queue only; it says nothing about whether the item is later
/// actually transmitted.
pub struct CommandQueue<T> {
    capacity: usize,
    items: Mutex<VecDeque<T>>,
    /// One permit per queued item; take/poll wait on this.
    occupied: Semaphore,
    /// One permit per free slot; put/offer wait on this.
    free: Semaphore,
    throttling_enabled: AtomicBool,
    /// Admissions serialize through this lock, so a sleeping admission
    /// holds back every other taker.
    window: AsyncMutex<Option<BurstWindow>>,
}

impl<T> CommandQueue<T> {
    /// Create an unthrottled queue holding at most `capacity` items.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            occupied: Semaphore::new(0),
            free: Semaphore::new(capacity),
            throttling_enabled: AtomicBool::new(false),
            window: AsyncMutex::new(None),
        }
    }

    /// Create a queue whose releases are throttled to `max_commands` per
    /// rolling `burst_period`.
    pub fn with_throttle(capacity: usize, max_commands: u32, burst_period: Duration) -> Self {
        let queue = Self::new(capacity);
        queue.throttling_enabled.store(true, Ordering::Release);
        *queue.window.try_lock().expect("fresh queue window lock") = Some(BurstWindow {
            max_commands,
            burst_period,
            released: 0,
            window_start: None,
        });
        queue
    }

    /// Maximum number of items this queue holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of queued items.
    pub fn size(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    /// Free slots remaining.
    pub fn remaining_capacity(&self) -> usize {
        self.capacity - self.size()
    }

    /// Append an item, waiting as long as needed for a free slot.
    pub async fn put(&self, item: T) {
        let permit = self
            .free
            .acquire()
            .await
            .expect("queue capacity semaphore closed");
        permit.forget();
        self.items.lock().unwrap().push_back(item);
        self.occupied.add_permits(1);
    }

    /// Append an item without waiting; a full queue returns it unchanged.
    pub fn try_put(&self, item: T) -> Result<(), T> {
        match self.free.try_acquire() {
            Ok(permit) => {
                permit.forget();
                self.items.lock().unwrap().push_back(item);
                self.occupied.add_permits(1);
                Ok(())
            }
            Err(_) => Err(item),
        }
    }

    /// Append an item, waiting up to `wait` for a free slot; a full queue
    /// returns it unchanged.
    pub async fn offer(&self, item: T, wait: Duration) -> Result<(), T> {
        match timeout(wait, self.free.acquire()).await {
            Ok(Ok(permit)) => {
                permit.forget();
                self.items.lock().unwrap().push_back(item);
                self.occupied.add_permits(1);
                Ok(())
            }
            _ => Err(item),
        }
    }

    /// Remove and return the oldest item, waiting as long as needed for one
    /// and for the burst throttle to admit its release.
    pub async fn take(&self) -> T {
        loop {
            let permit = self
                .occupied
                .acquire()
                .await
                .expect("queue item semaphore closed");
            self.admit().await;
            let popped = self.items.lock().unwrap().pop_front();
            match popped {
                Some(item) => {
                    permit.forget();
                    self.free.add_permits(1);
                    return item;
                }
                None => {
                    // The item this permit represented was drained out from
                    // under us; the permit dies with it.
                    permit.forget();
                }
            }
        }
    }

    /// Remove and return the oldest item, waiting up to `wait` for one to
    /// become available. The burst throttle still gates the release once an
    /// item is available.
    pub async fn poll(&self, wait: Duration) -> Option<T> {
        let deadline = Instant::now() + wait;
        loop {
            let permit = match tokio::time::timeout_at(deadline, self.occupied.acquire()).await {
                Ok(Ok(permit)) => permit,
                _ => return None,
            };
            self.admit().await;
            let popped = self.items.lock().unwrap().pop_front();
            match popped {
                Some(item) => {
                    permit.forget();
                    self.free.add_permits(1);
                    return Some(item);
                }
                None => {
                    permit.forget();
                }
            }
        }
    }

    /// Remove every queued item at once, without throttling.
    ///
    /// Intended for shutdown paths; concurrent takers simply find the queue
    /// empty afterwards.
    pub fn drain(&self) -> Vec<T> {
        let mut items = self.items.lock().unwrap();
        let drained: Vec<T> = items.drain(..).collect();
        drop(items);

        for _ in &drained {
            // Permits not claimed here are held by in-flight takers, which
            // discard them when they find the deque empty.
            if let Ok(permit) = self.occupied.try_acquire() {
                permit.forget();
            }
        }
        self.free.add_permits(drained.len());
        drained
    }

    /// Whether burst admission throttling is currently in effect.
    pub fn is_throttling_enabled(&self) -> bool {
        self.throttling_enabled.load(Ordering::Acquire)
    }

    /// Turn off admission throttling. Queued items and their FIFO order are
    /// unaffected; subsequent releases are immediate.
    pub fn disable_queue_throttling(&self) {
        self.throttling_enabled.store(false, Ordering::Release);
        debug!("Queue admission throttling disabled");
    }

    /// Gate one release through the burst window.
    async fn admit(&self) {
        if !self.is_throttling_enabled() {
            return;
        }
        let mut guard = self.window.lock().await;
        if !self.is_throttling_enabled() {
            return;
        }
        let Some(window) = guard.as_mut() else {
            return;
        };

        let now = Instant::now();
        match window.window_start {
            None => {
                window.window_start = Some(now);
                window.released = 1;
            }
            Some(start) if now.duration_since(start) >= window.burst_period => {
                // The previous window elapsed on its own.
                window.window_start = Some(now);
                window.released = 1;
            }
            Some(start) => {
                if window.released < window.max_commands {
                    window.released += 1;
                } else {
                    let reopen = start + window.burst_period;
                    debug!(
                        burst = window.max_commands,
                        "Queue burst exhausted, blocking release until window reopens"
                    );
                    sleep(reopen - now).await;
                    window.window_start = Some(Instant::now());
                    window.released = 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_bounded_capacity_and_fifo_order() {
        let queue: CommandQueue<u32> = CommandQueue::new(5);

        for i in 0..5 {
            queue.put(i).await;
        }
        assert_eq!(queue.size(), 5);
        assert_eq!(queue.remaining_capacity(), 0);

        // A sixth item is rejected after the timed wait.
        assert_eq!(queue.offer(99, Duration::from_millis(500)).await, Err(99));

        // Items come back in insertion order.
        for i in 0..5 {
            assert_eq!(queue.take().await, i);
        }

        // And an empty queue times out on poll.
        assert_eq!(queue.poll(Duration::from_millis(500)).await, None);
    }

    #[tokio::test]
    async fn test_try_put_rejects_when_full() {
        let queue: CommandQueue<&str> = CommandQueue::new(1);

        assert!(queue.try_put("first").is_ok());
        assert_eq!(queue.try_put("second"), Err("second"));

        assert_eq!(queue.take().await, "first");
        assert!(queue.try_put("third").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_throttle_blocks_after_max_releases() {
        let queue: CommandQueue<u32> =
            CommandQueue::with_throttle(10, 2, Duration::from_millis(1000));
        assert!(queue.is_throttling_enabled());

        for i in 0..5 {
            queue.put(i).await;
        }

        // First burst of two releases immediately.
        let start = Instant::now();
        assert_eq!(queue.take().await, 0);
        assert_eq!(queue.take().await, 1);
        assert!(start.elapsed() < Duration::from_millis(1000));

        // The remaining three must wait out at least one full burst period.
        let start = Instant::now();
        assert_eq!(queue.take().await, 2);
        assert_eq!(queue.take().await, 3);
        assert_eq!(queue.take().await, 4);
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_queue_throttling_releases_immediately() {
        let queue: CommandQueue<u32> =
            CommandQueue::with_throttle(10, 2, Duration::from_millis(1000));

        queue.disable_queue_throttling();
        assert!(!queue.is_throttling_enabled());

        for i in 0..5 {
            queue.put(i).await;
        }

        let start = Instant::now();
        for i in 0..5 {
            assert_eq!(queue.take().await, i);
        }
        assert!(start.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_preserves_queued_items() {
        let queue: CommandQueue<u32> =
            CommandQueue::with_throttle(10, 1, Duration::from_millis(1000));

        queue.put(1).await;
        queue.put(2).await;
        queue.put(3).await;

        assert_eq!(queue.take().await, 1);
        queue.disable_queue_throttling();

        assert_eq!(queue.size(), 2);
        assert_eq!(queue.take().await, 2);
        assert_eq!(queue.take().await, 3);
    }

    #[tokio::test]
    async fn test_drain_empties_queue_and_frees_capacity() {
        let queue: CommandQueue<u32> = CommandQueue::new(3);

        queue.put(1).await;
        queue.put(2).await;
        queue.put(3).await;

        let drained = queue.drain();
        assert_eq!(drained, vec![1, 2, 3]);
        assert_eq!(queue.size(), 0);
        assert_eq!(queue.remaining_capacity(), 3);

        // Capacity is fully reusable after a drain.
        queue.put(4).await;
        queue.put(5).await;
        queue.put(6).await;
        assert_eq!(queue.take().await, 4);
    }

    #[tokio::test]
    async fn test_producer_consumer_preserves_order() {
        let queue = std::sync::Arc::new(CommandQueue::<u32>::new(4));

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                for i in 0..20 {
                    queue.put(i).await;
                }
            })
        };

        for i in 0..20 {
            assert_eq!(queue.take().await, i);
        }
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn test_blocked_put_proceeds_after_take() {
        let queue = std::sync::Arc::new(CommandQueue::<u32>::new(1));
        queue.put(1).await;

        let blocked = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue.put(2).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        assert_eq!(queue.take().await, 1);
        blocked.await.unwrap();
        assert_eq!(queue.take().await, 2);
    }
}
