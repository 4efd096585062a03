//! Dispatcher worker loop.
//!
//! A fixed pool of workers pulls from the shared queue. Each attempt runs
//! the gate sequence: circuit breaker (fast-fail consumes an attempt), rate
//! limiter (flow control, free re-queue), then the transport. Outcomes feed
//! the breaker, the rolling metrics, and the retry scheduler.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use ::metrics::{counter, gauge, histogram};
use courier_common::{CategoryConfig, CourierConfig, DeliveryState};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::breaker::{BreakerDecision, CircuitBreakerRegistry};
use crate::deadletter::{DeadLetter, DeadLetterSink};
use crate::limiter::{RateDecision, RateLimiter};
use crate::metrics::MetricsAggregator;
use crate::queue::DeliveryQueue;
use crate::retry::{self, RetryDecision};
use crate::task::DeliveryTask;
use crate::transport::WebhookTransport;

/// Everything a worker needs, shared across the pool.
pub(crate) struct DispatchContext {
    pub config: CourierConfig,
    pub queue: Arc<DeliveryQueue>,
    pub limiter: Arc<RateLimiter>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub transport: Arc<dyn WebhookTransport>,
    pub metrics: Arc<MetricsAggregator>,
    pub dead_letters: Arc<dyn DeadLetterSink>,
    pub active_workers: AtomicU32,
}

pub(crate) async fn run_worker(
    worker_id: usize,
    ctx: Arc<DispatchContext>,
    mut shutdown: broadcast::Receiver<()>,
) {
    debug!(worker_id, "delivery worker started");

    loop {
        let task = tokio::select! {
            task = ctx.queue.pop() => task,
            _ = shutdown.recv() => break,
        };

        // A task picked up here is never preempted; shutdown waits for the
        // in-flight attempt to finish.
        ctx.active_workers.fetch_add(1, Ordering::SeqCst);
        gauge!("courier_active_workers").increment(1.0);

        process_task(&ctx, task).await;

        ctx.active_workers.fetch_sub(1, Ordering::SeqCst);
        gauge!("courier_active_workers").decrement(1.0);
    }

    debug!(worker_id, "delivery worker stopped");
}

async fn process_task(ctx: &DispatchContext, mut task: DeliveryTask) {
    task.state = DeliveryState::Dispatching;
    let category_config = ctx.config.category(task.category);

    let mut holds_trial = false;
    if category_config.circuit_breaker {
        match ctx.breakers.check(&task.destination) {
            BreakerDecision::Deny { retry_in } => {
                // Short-circuit without network I/O. Counts as a failed
                // attempt so a persistently-down destination still
                // dead-letters.
                task.attempts += 1;
                counter!("courier_circuit_rejections_total", "category" => task.category.as_str())
                    .increment(1);
                debug!(
                    task_id = %task.id,
                    destination = %task.destination,
                    retry_in_ms = retry_in.as_millis() as u64,
                    "circuit open, failing fast"
                );
                fail_task(ctx, task, &category_config, "circuit open".to_string()).await;
                return;
            }
            BreakerDecision::AllowTrial => holds_trial = true,
            BreakerDecision::Allow => {}
        }
    }

    if let RateDecision::Deny { retry_after } = ctx.limiter.check(&task.destination) {
        // Flow control, not a failure: the attempt is skipped without
        // consuming the retry budget and re-checked when the window resets.
        // A trial slot granted above never reached the wire, so it is
        // handed back rather than left in flight.
        if holds_trial {
            ctx.breakers.release_trial(&task.destination);
        }
        ctx.metrics.record_rate_limited();
        counter!("courier_rate_limited_total", "category" => task.category.as_str()).increment(1);
        debug!(
            task_id = %task.id,
            destination = %task.destination,
            retry_after_ms = retry_after.as_millis() as u64,
            "rate limit reached, deferring"
        );
        task.state = DeliveryState::Queued;
        task.next_eligible_at = Instant::now() + retry_after;
        ctx.queue.push(task);
        return;
    }

    task.attempts += 1;
    let outcome = ctx.transport.deliver(&task, &category_config).await;

    ctx.metrics.record_attempt_duration(outcome.duration());
    histogram!("courier_delivery_duration_ms").record(outcome.duration().as_millis() as f64);
    counter!(
        "courier_delivery_attempts_total",
        "category" => task.category.as_str(),
        "outcome" => outcome.label()
    )
    .increment(1);

    if outcome.is_success() {
        if category_config.circuit_breaker {
            ctx.breakers.record_success(&task.destination);
        }
        ctx.metrics.record_success();
        task.state = DeliveryState::Succeeded;
        info!(
            task_id = %task.id,
            destination = %task.destination,
            attempts = task.attempts,
            duration_ms = outcome.duration().as_millis() as u64,
            "delivery succeeded"
        );
    } else {
        if category_config.circuit_breaker {
            ctx.breakers.record_failure(&task.destination);
        }
        warn!(
            task_id = %task.id,
            destination = %task.destination,
            attempts = task.attempts,
            outcome = outcome.label(),
            "delivery attempt failed"
        );
        fail_task(ctx, task, &category_config, outcome.describe()).await;
    }
}

/// Routes a failed attempt: backoff re-enqueue while budget remains,
/// dead-letter once it is exhausted. Failures never reach the producer.
async fn fail_task(
    ctx: &DispatchContext,
    mut task: DeliveryTask,
    category_config: &CategoryConfig,
    reason: String,
) {
    ctx.metrics.record_failure();

    match retry::decide(&ctx.config.retry, task.attempts, category_config.max_attempts) {
        RetryDecision::Retry { delay } => {
            ctx.metrics.record_retry();
            counter!("courier_retries_total", "category" => task.category.as_str()).increment(1);
            debug!(
                task_id = %task.id,
                attempts = task.attempts,
                delay_ms = delay.as_millis() as u64,
                "scheduling retry"
            );
            task.state = DeliveryState::Queued;
            task.next_eligible_at = Instant::now() + delay;
            ctx.queue.push(task);
        }
        RetryDecision::DeadLetter => {
            ctx.metrics.record_dead_letter();
            counter!("courier_dead_letters_total", "category" => task.category.as_str())
                .increment(1);
            error!(
                task_id = %task.id,
                destination = %task.destination,
                attempts = task.attempts,
                reason = %reason,
                "retry budget exhausted, dead-lettering"
            );
            task.state = DeliveryState::DeadLettered;
            let entry = DeadLetter::from_task(&task, reason);
            ctx.dead_letters.store(entry).await;
        }
    }
}
