//! DeliveryService - central orchestrator for webhook delivery.
//!
//! Owns the queue, the per-destination registries, the worker pool, and the
//! maintenance task. The producer-facing `enqueue` validates and signs
//! synchronously and never touches the network; everything after that is
//! recovered internally and surfaced only through `stats()`.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use courier_common::{
    CourierConfig, DeliveryStats, DestinationStats, Priority, MAX_INPUT_CHARS,
};
use courier_signing::{SignedPayload, WebhookPayload};
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::breaker::CircuitBreakerRegistry;
use crate::deadletter::{DeadLetter, DeadLetterSink, InMemoryDeadLetterSink};
use crate::dispatcher::{self, DispatchContext};
use crate::error::{DeliveryError, EnqueueError};
use crate::limiter::RateLimiter;
use crate::metrics::MetricsAggregator;
use crate::queue::DeliveryQueue;
use crate::task::DeliveryTask;
use crate::transport::{HttpTransport, WebhookTransport};

/// A delivery request from the producer.
#[derive(Debug, Clone)]
pub struct NewDelivery {
    pub category: String,
    pub raw_input: String,
    pub expanded_text: Option<String>,
    pub priority: Option<String>,
    pub subcategory: Option<String>,
}

pub struct DeliveryService {
    ctx: Arc<DispatchContext>,
    shutdown_tx: broadcast::Sender<()>,
    running: AtomicBool,
    accepting: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl DeliveryService {
    /// Builds a service over an injected transport (tests use a fake).
    pub fn new(config: CourierConfig, transport: Arc<dyn WebhookTransport>) -> Self {
        Self::with_dead_letter_sink(config, transport, Arc::new(InMemoryDeadLetterSink::default()))
    }

    /// Builds a service with a pluggable dead-letter sink.
    pub fn with_dead_letter_sink(
        config: CourierConfig,
        transport: Arc<dyn WebhookTransport>,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let ctx = Arc::new(DispatchContext {
            limiter: Arc::new(RateLimiter::new(config.rate_limit.clone())),
            breakers: Arc::new(CircuitBreakerRegistry::new(config.breaker.clone())),
            queue: Arc::new(DeliveryQueue::new()),
            metrics: Arc::new(MetricsAggregator::default()),
            transport,
            dead_letters,
            active_workers: AtomicU32::new(0),
            config,
        });

        Self {
            ctx,
            shutdown_tx,
            running: AtomicBool::new(false),
            accepting: AtomicBool::new(true),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Builds a service with the production HTTP transport.
    pub fn with_http_transport(config: CourierConfig) -> Result<Self, DeliveryError> {
        let transport = Arc::new(HttpTransport::new(&config.user_agent)?);
        Ok(Self::new(config, transport))
    }

    /// Spawns the worker pool and the maintenance task. Idempotent.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(
            max_concurrency = self.ctx.config.max_concurrency,
            signing_enabled = self.ctx.config.signing_enabled(),
            "starting delivery service"
        );
        if !self.ctx.config.signing_enabled() {
            warn!("no signing secret configured, payloads will be sent unsigned");
        }

        let mut handles = self.handles.lock();
        for worker_id in 0..self.ctx.config.max_concurrency {
            let ctx = self.ctx.clone();
            let shutdown = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(dispatcher::run_worker(worker_id, ctx, shutdown)));
        }
        handles.push(self.spawn_sweeper());
    }

    /// Periodic maintenance: expired rate windows are swept so idle
    /// destinations do not accumulate.
    fn spawn_sweeper(&self) -> JoinHandle<()> {
        let limiter = self.ctx.limiter.clone();
        let interval = self.ctx.config.rate_limit.sweep_interval;
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // skip the immediate first tick
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        limiter.sweep();
                        debug!("swept expired rate windows");
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }

    /// Stops intake, signals the pool, and waits for in-flight deliveries
    /// to finish.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        info!(
            queued = self.ctx.queue.len(),
            active = self.ctx.active_workers.load(Ordering::SeqCst),
            "shutting down delivery service"
        );
        let _ = self.shutdown_tx.send(());

        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        let _ = join_all(handles).await;
        info!("delivery service stopped");
    }

    /// Validates, signs, and queues one delivery. Returns once the task is
    /// queued, not once delivered; later failures never propagate back.
    pub fn enqueue(&self, request: NewDelivery) -> Result<Uuid, EnqueueError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(EnqueueError::ShuttingDown);
        }

        let category = request
            .category
            .parse()
            .map_err(|e: courier_common::UnknownCategory| EnqueueError::UnknownCategory(e.0))?;

        let priority = match request.priority.as_deref() {
            Some(p) => p
                .parse()
                .map_err(|e: courier_common::UnknownPriority| EnqueueError::UnknownPriority(e.0))?,
            None => Priority::default(),
        };

        let input_len = request.raw_input.chars().count();
        if input_len > MAX_INPUT_CHARS {
            return Err(EnqueueError::InputTooLarge { len: input_len, max: MAX_INPUT_CHARS });
        }

        let category_config = self.ctx.config.category(category);
        let destination = category_config
            .destination
            .clone()
            .ok_or(EnqueueError::MissingDestination(category))?;

        let secret = self.ctx.config.signing_secret_for(category);
        let payload = WebhookPayload::new(
            request.raw_input,
            category,
            request.subcategory,
            priority,
            request.expanded_text,
        );
        let signed = SignedPayload::build(payload, secret.as_ref().map(|s| s.as_bytes()))?;

        let task = DeliveryTask::new(destination.clone(), signed, category, priority);
        let task_id = task.id;

        self.ctx.metrics.record_queued();
        ::metrics::counter!("courier_enqueued_total", "category" => category.as_str()).increment(1);
        debug!(
            task_id = %task_id,
            category = %category,
            priority = %priority,
            destination = %destination,
            "delivery enqueued"
        );
        self.ctx.queue.push(task);
        Ok(task_id)
    }

    /// Operational snapshot for the status surface.
    pub fn stats(&self) -> DeliveryStats {
        let destinations: BTreeSet<String> = self
            .ctx
            .config
            .categories
            .values()
            .filter_map(|c| c.destination.clone())
            .collect();

        let per_destination = destinations
            .into_iter()
            .map(|destination| DestinationStats {
                circuit_state: self.ctx.breakers.current_state(&destination),
                rate_window_remaining: self.ctx.limiter.remaining(&destination),
                destination,
            })
            .collect();

        let metrics = self.ctx.metrics.snapshot();

        let mut issues = Vec::new();
        if !self.ctx.config.signing_enabled() {
            issues.push("payload signing disabled: no HMAC secret configured".to_string());
        }
        for (destination, since_failure) in self.ctx.breakers.tripped_destinations() {
            match since_failure {
                Some(age) => issues.push(format!(
                    "circuit not closed for {destination} (last failure {}s ago)",
                    age.as_secs()
                )),
                None => issues.push(format!("circuit not closed for {destination}")),
            }
        }
        if metrics.dead_lettered > 0 {
            issues.push(format!(
                "{} deliveries dead-lettered in the last {}s",
                metrics.dead_lettered, metrics.window_secs
            ));
        }

        DeliveryStats {
            queue_length: self.ctx.queue.len(),
            active_workers: self.ctx.active_workers.load(Ordering::SeqCst),
            max_concurrency: self.ctx.config.max_concurrency,
            signing_enabled: self.ctx.config.signing_enabled(),
            per_destination,
            health: self.ctx.metrics.health_report(issues),
            metrics,
        }
    }

    /// Most recent dead letters, newest first.
    pub async fn dead_letters(&self, limit: usize) -> Vec<DeadLetter> {
        self.ctx.dead_letters.recent(limit).await
    }
}
