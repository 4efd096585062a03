//! Enqueue validation and status API tests.
//!
//! Validation failures must be synchronous and leave nothing queued; the
//! producer never learns about anything that happens after a successful
//! enqueue.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_common::{Category, CircuitState, CourierConfig, CategoryConfig};
use courier_delivery::{
    DeliveryOutcome, DeliveryService, DeliveryTask, EnqueueError, NewDelivery, WebhookTransport,
};

struct NoopTransport;

#[async_trait]
impl WebhookTransport for NoopTransport {
    async fn deliver(&self, _task: &DeliveryTask, _config: &CategoryConfig) -> DeliveryOutcome {
        DeliveryOutcome::Success { status: 200, duration: Duration::from_millis(1) }
    }
}

fn service(config: CourierConfig) -> DeliveryService {
    DeliveryService::new(config, Arc::new(NoopTransport))
}

fn config_with_task_destination() -> CourierConfig {
    let mut config = CourierConfig::default();
    if let Some(task) = config.categories.get_mut(&Category::Task) {
        task.destination = Some("https://automation.example.com/tasks".into());
    }
    config
}

fn delivery(category: &str, input: &str) -> NewDelivery {
    NewDelivery {
        category: category.into(),
        raw_input: input.into(),
        expanded_text: None,
        priority: None,
        subcategory: None,
    }
}

#[tokio::test]
async fn unknown_category_rejected_and_not_queued() {
    let service = service(config_with_task_destination());

    let err = service.enqueue(delivery("journal", "x")).unwrap_err();
    assert!(matches!(err, EnqueueError::UnknownCategory(ref c) if c == "journal"));

    let stats = service.stats();
    assert_eq!(stats.queue_length, 0);
    assert_eq!(stats.metrics.queued, 0);
}

#[tokio::test]
async fn unknown_priority_rejected() {
    let service = service(config_with_task_destination());
    let mut request = delivery("task", "x");
    request.priority = Some("urgent".into());

    let err = service.enqueue(request).unwrap_err();
    assert!(matches!(err, EnqueueError::UnknownPriority(_)));
    assert_eq!(service.stats().queue_length, 0);
}

#[tokio::test]
async fn oversized_input_rejected() {
    let service = service(config_with_task_destination());
    let err = service
        .enqueue(delivery("task", &"x".repeat(10_001)))
        .unwrap_err();
    assert!(matches!(err, EnqueueError::InputTooLarge { len: 10_001, max: 10_000 }));
    assert_eq!(service.stats().queue_length, 0);
}

#[tokio::test]
async fn missing_destination_rejected() {
    // Only task has a destination; idea does not.
    let service = service(config_with_task_destination());
    let err = service.enqueue(delivery("idea", "x")).unwrap_err();
    assert!(matches!(err, EnqueueError::MissingDestination(Category::Idea)));
}

#[tokio::test]
async fn valid_enqueue_is_queued_immediately() {
    // Workers not started: the task must sit in the queue.
    let service = service(config_with_task_destination());
    let id = service.enqueue(delivery("task", "ship the release notes")).unwrap();
    assert!(!id.is_nil());

    let stats = service.stats();
    assert_eq!(stats.queue_length, 1);
    assert_eq!(stats.metrics.queued, 1);
    assert_eq!(stats.active_workers, 0);
    assert_eq!(stats.max_concurrency, 5);
}

#[tokio::test]
async fn enqueue_rejected_after_shutdown() {
    let service = service(config_with_task_destination());
    service.start();
    service.shutdown().await;

    let err = service.enqueue(delivery("task", "x")).unwrap_err();
    assert!(matches!(err, EnqueueError::ShuttingDown));
}

#[tokio::test]
async fn stats_report_configured_destinations() {
    let mut config = config_with_task_destination();
    if let Some(idea) = config.categories.get_mut(&Category::Idea) {
        idea.destination = Some("https://automation.example.com/ideas".into());
    }
    let service = service(config);

    let stats = service.stats();
    assert_eq!(stats.per_destination.len(), 2);
    for dest in &stats.per_destination {
        assert_eq!(dest.circuit_state, CircuitState::Closed);
        assert_eq!(dest.rate_window_remaining, 20);
    }
}

#[tokio::test]
async fn unsigned_mode_surfaces_in_stats() {
    let svc = service(config_with_task_destination());
    let stats = svc.stats();
    assert!(!stats.signing_enabled);
    assert!(stats
        .health
        .issues
        .iter()
        .any(|i| i.contains("signing disabled")));

    let mut config = config_with_task_destination();
    config.signing_secret = Some("wh-secret".into());
    let svc = service(config);
    let stats = svc.stats();
    assert!(stats.signing_enabled);
    assert!(stats.health.issues.is_empty());
}
