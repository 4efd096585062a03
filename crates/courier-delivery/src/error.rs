//! Delivery Error Types

use courier_common::Category;
use courier_signing::SigningError;
use thiserror::Error;

/// Errors surfaced synchronously to the producer at enqueue time.
///
/// Everything after a successful enqueue is recovered inside the subsystem
/// and only observable through the status API.
#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("unknown category: {0}")]
    UnknownCategory(String),

    #[error("unknown priority: {0}")]
    UnknownPriority(String),

    #[error("input exceeds {max} characters (got {len})")]
    InputTooLarge { len: usize, max: usize },

    #[error("no destination configured for category {0}")]
    MissingDestination(Category),

    #[error("payload signing failed: {0}")]
    Signing(#[from] SigningError),

    #[error("delivery service is shutting down")]
    ShuttingDown,
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("configuration error: {0}")]
    Configuration(String),
}
