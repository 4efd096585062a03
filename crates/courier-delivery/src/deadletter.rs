//! Dead-letter storage for tasks that exhausted their retry budget.
//!
//! The sink is a trait so deployments can plug a durable store behind it;
//! the in-process default keeps a bounded ring of recent entries for the
//! status API.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_common::{Category, Priority};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::DeliveryTask;

/// Terminal record of a failed delivery, kept for inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub task_id: Uuid,
    pub destination: String,
    pub category: Category,
    pub priority: Priority,
    pub attempts: u32,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn from_task(task: &DeliveryTask, reason: impl Into<String>) -> Self {
        Self {
            task_id: task.id,
            destination: task.destination.clone(),
            category: task.category,
            priority: task.priority,
            attempts: task.attempts,
            reason: reason.into(),
            created_at: task.created_at,
            dead_lettered_at: Utc::now(),
        }
    }
}

/// Terminal failure storage. Implementations must tolerate concurrent
/// stores from multiple dispatcher workers.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn store(&self, entry: DeadLetter);

    /// Most recent entries, newest first.
    async fn recent(&self, limit: usize) -> Vec<DeadLetter>;

    async fn count(&self) -> usize;
}

/// Bounded in-memory sink; the oldest entry is evicted at capacity.
pub struct InMemoryDeadLetterSink {
    capacity: usize,
    entries: Mutex<VecDeque<DeadLetter>>,
}

impl InMemoryDeadLetterSink {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, entries: Mutex::new(VecDeque::new()) }
    }
}

impl Default for InMemoryDeadLetterSink {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    async fn store(&self, entry: DeadLetter) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    async fn recent(&self, limit: usize) -> Vec<DeadLetter> {
        let entries = self.entries.lock();
        entries.iter().rev().take(limit).cloned().collect()
    }

    async fn count(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use courier_signing::{SignedPayload, WebhookPayload};

    use super::*;

    fn entry(reason: &str) -> DeadLetter {
        let payload =
            WebhookPayload::new("x", Category::Task, None, Priority::Medium, None);
        let signed = SignedPayload::build(payload, None).unwrap();
        let task = DeliveryTask::new(
            "http://dest.example.com/hook".into(),
            signed,
            Category::Task,
            Priority::Medium,
        );
        DeadLetter::from_task(&task, reason)
    }

    #[tokio::test]
    async fn stores_and_lists_newest_first() {
        let sink = InMemoryDeadLetterSink::new(10);
        sink.store(entry("first")).await;
        sink.store(entry("second")).await;

        let recent = sink.recent(10).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].reason, "second");
        assert_eq!(sink.count().await, 2);
    }

    #[tokio::test]
    async fn evicts_oldest_at_capacity() {
        let sink = InMemoryDeadLetterSink::new(2);
        sink.store(entry("a")).await;
        sink.store(entry("b")).await;
        sink.store(entry("c")).await;

        let recent = sink.recent(10).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].reason, "c");
        assert_eq!(recent[1].reason, "b");
    }
}
