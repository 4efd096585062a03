//! Delivery task: the unit of work flowing through the pipeline.

use chrono::{DateTime, Utc};
use courier_common::{Category, DeliveryState, Priority};
use courier_signing::SignedPayload;
use tokio::time::Instant;
use uuid::Uuid;

/// One pending webhook delivery.
///
/// Owned exclusively by the queue until a dispatcher worker pops it; the
/// worker owns it for the duration of one attempt and either drops it
/// (terminal state), re-enqueues it (retry), or hands it to the dead-letter
/// sink.
#[derive(Debug, Clone)]
pub struct DeliveryTask {
    pub id: Uuid,
    pub destination: String,
    pub payload: SignedPayload,
    pub category: Category,
    pub priority: Priority,
    /// Completed delivery attempts, including circuit-breaker fast-fails.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    /// Earliest instant the task may be dispatched; pushed forward by the
    /// retry scheduler and by rate-limit deferrals.
    pub next_eligible_at: Instant,
    pub state: DeliveryState,
    /// FIFO position within the priority tier. Assigned once on first
    /// enqueue and kept across retries, so a retried task rejoins its tier
    /// at its original position.
    pub(crate) seq: u64,
}

impl DeliveryTask {
    pub fn new(
        destination: String,
        payload: SignedPayload,
        category: Category,
        priority: Priority,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            destination,
            payload,
            category,
            priority,
            attempts: 0,
            created_at: Utc::now(),
            next_eligible_at: Instant::now(),
            state: DeliveryState::Queued,
            seq: 0,
        }
    }
}
