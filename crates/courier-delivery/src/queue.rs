//! Thread-safe priority queue with delayed re-insertion.
//!
//! Ready tasks are ordered by priority (high > medium > low) and FIFO by
//! original enqueue order within a tier. Tasks whose `next_eligible_at`
//! lies in the future sit in a separate delay heap and are promoted by a
//! timer when they come due, so idle workers park on a notification or the
//! earliest deadline instead of polling.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::task::DeliveryTask;

struct ReadyEntry(DeliveryTask);

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.priority == other.0.priority && self.0.seq == other.0.seq
    }
}

impl Eq for ReadyEntry {}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then lower seq (earlier enqueue).
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.seq.cmp(&self.0.seq))
    }
}

struct DelayedEntry(DeliveryTask);

impl PartialEq for DelayedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.next_eligible_at == other.0.next_eligible_at && self.0.seq == other.0.seq
    }
}

impl Eq for DelayedEntry {}

impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap inverted: earliest eligibility on top.
        other
            .0
            .next_eligible_at
            .cmp(&self.0.next_eligible_at)
            .then_with(|| other.0.seq.cmp(&self.0.seq))
    }
}

#[derive(Default)]
struct Inner {
    ready: BinaryHeap<ReadyEntry>,
    delayed: BinaryHeap<DelayedEntry>,
}

impl Inner {
    /// Moves every due delayed task into the ready heap.
    fn promote_due(&mut self, now: Instant) {
        while self
            .delayed
            .peek()
            .is_some_and(|entry| entry.0.next_eligible_at <= now)
        {
            if let Some(entry) = self.delayed.pop() {
                self.ready.push(ReadyEntry(entry.0));
            }
        }
    }
}

/// Shared delivery queue. Safe for concurrent push/pop from many workers.
pub struct DeliveryQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    next_seq: AtomicU64,
}

impl DeliveryQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            next_seq: AtomicU64::new(1),
        }
    }

    /// Accepts a task, routing it to the ready or delay heap based on its
    /// eligibility instant. First-time tasks get their FIFO seq here;
    /// retried tasks keep the one they were born with.
    pub fn push(&self, mut task: DeliveryTask) {
        if task.seq == 0 {
            task.seq = self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
        }

        let now = Instant::now();
        {
            let mut inner = self.inner.lock();
            if task.next_eligible_at <= now {
                inner.ready.push(ReadyEntry(task));
            } else {
                inner.delayed.push(DelayedEntry(task));
            }
        }
        self.notify.notify_one();
    }

    /// Pops the highest-priority eligible task, waiting for a push or for
    /// the earliest delayed task to come due. Cancellation-safe: a task is
    /// only removed in the same poll that returns it.
    pub async fn pop(&self) -> DeliveryTask {
        loop {
            let notified = self.notify.notified();

            let deadline = {
                let mut inner = self.inner.lock();
                inner.promote_due(Instant::now());
                if let Some(entry) = inner.ready.pop() {
                    // Notify stores at most one permit, so a burst of pushes
                    // can under-wake the pool; chain the wakeup while work
                    // remains.
                    if !inner.ready.is_empty() {
                        self.notify.notify_one();
                    }
                    return entry.0;
                }
                inner.delayed.peek().map(|e| e.0.next_eligible_at)
            };

            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Total tasks held, ready and delayed.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.ready.len() + inner.delayed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DeliveryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use courier_common::{Category, Priority};
    use courier_signing::{SignedPayload, WebhookPayload};

    use super::*;

    fn task(input: &str, priority: Priority) -> DeliveryTask {
        let payload = WebhookPayload::new(input, Category::Task, None, priority, None);
        let signed = SignedPayload::build(payload, None).unwrap();
        DeliveryTask::new("http://dest.example.com/hook".into(), signed, Category::Task, priority)
    }

    #[tokio::test]
    async fn pops_by_priority_then_fifo() {
        let queue = DeliveryQueue::new();
        queue.push(task("first-low", Priority::Low));
        queue.push(task("first-high", Priority::High));
        queue.push(task("second-high", Priority::High));
        queue.push(task("first-medium", Priority::Medium));

        assert_eq!(queue.pop().await.payload.payload.input, "first-high");
        assert_eq!(queue.pop().await.payload.payload.input, "second-high");
        assert_eq!(queue.pop().await.payload.payload.input, "first-medium");
        assert_eq!(queue.pop().await.payload.payload.input, "first-low");
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_task_waits_for_eligibility() {
        let queue = DeliveryQueue::new();
        let mut delayed = task("later", Priority::High);
        delayed.next_eligible_at = Instant::now() + Duration::from_secs(5);
        queue.push(delayed);
        queue.push(task("now", Priority::Low));

        // The low-priority task is the only eligible one right now.
        assert_eq!(queue.pop().await.payload.payload.input, "now");

        let start = Instant::now();
        assert_eq!(queue.pop().await.payload.payload.input, "later");
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn retried_task_keeps_tier_position() {
        let queue = DeliveryQueue::new();
        queue.push(task("a", Priority::Medium));
        queue.push(task("b", Priority::Medium));

        let mut a = queue.pop().await;
        assert_eq!(a.payload.payload.input, "a");

        // Failed attempt: re-enqueue with a short backoff. Once eligible
        // again, it should still come out ahead of "b".
        a.next_eligible_at = Instant::now() + Duration::from_millis(10);
        queue.push(a);

        assert_eq!(queue.pop().await.payload.payload.input, "a");
        assert_eq!(queue.pop().await.payload.payload.input, "b");
    }

    #[tokio::test]
    async fn push_wakes_waiting_worker() {
        let queue = std::sync::Arc::new(DeliveryQueue::new());
        let popper = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::task::yield_now().await;
        queue.push(task("wake", Priority::Medium));

        let popped = tokio::time::timeout(Duration::from_secs(1), popper)
            .await
            .expect("pop should complete")
            .expect("popper task should not panic");
        assert_eq!(popped.payload.payload.input, "wake");
    }
}
