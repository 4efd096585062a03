//! Courier Delivery Engine
//!
//! This crate provides the outbound webhook delivery pipeline with:
//! - DeliveryService: Central orchestrator owning the queue and worker pool
//! - DeliveryQueue: Priority queue with timer-based delayed re-insertion
//! - RateLimiter: Per-destination fixed-window admission control
//! - CircuitBreakerRegistry: Per-destination failure isolation
//! - WebhookTransport / HttpTransport: Signed HTTP POST with per-category timeout
//! - Retry scheduling: Exponential backoff with per-category attempt budgets
//! - MetricsAggregator: Rolling-window counters and derived health score
//! - DeadLetterSink: Terminal failure storage behind a pluggable trait

pub mod breaker;
pub mod deadletter;
pub mod error;
pub mod limiter;
pub mod metrics;
pub mod queue;
pub mod retry;
pub mod service;
pub mod task;
pub mod transport;

mod dispatcher;

pub use breaker::{BreakerDecision, CircuitBreakerRegistry};
pub use deadletter::{DeadLetter, DeadLetterSink, InMemoryDeadLetterSink};
pub use error::{DeliveryError, EnqueueError};
pub use limiter::{RateDecision, RateLimiter};
pub use metrics::MetricsAggregator;
pub use queue::DeliveryQueue;
pub use retry::RetryDecision;
pub use service::{DeliveryService, NewDelivery};
pub use task::DeliveryTask;
pub use transport::{DeliveryOutcome, HttpTransport, WebhookTransport};

pub type Result<T> = std::result::Result<T, DeliveryError>;
