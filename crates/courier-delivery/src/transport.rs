//! Delivery executor: one signed HTTP POST per attempt.
//!
//! The transport is a trait seam so the dispatcher can be exercised against
//! an in-process fake; the production implementation posts the canonical
//! payload body with the signature headers and classifies the result for
//! the retry scheduler and circuit breaker.

use std::time::Duration;

use async_trait::async_trait;
use courier_common::CategoryConfig;
use tokio::time::Instant;
use tracing::{debug, info_span, warn, Instrument};

use crate::error::DeliveryError;
use crate::task::DeliveryTask;

/// Classified result of one delivery attempt.
#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    /// HTTP 2xx.
    Success { status: u16, duration: Duration },
    /// Non-2xx response.
    HttpError { status: u16, duration: Duration },
    /// Deadline exceeded; the in-flight request was cancelled.
    Timeout { duration: Duration },
    /// Connection-level failure.
    Network { message: String, duration: Duration },
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryOutcome::Success { .. })
    }

    pub fn duration(&self) -> Duration {
        match self {
            DeliveryOutcome::Success { duration, .. }
            | DeliveryOutcome::HttpError { duration, .. }
            | DeliveryOutcome::Timeout { duration }
            | DeliveryOutcome::Network { duration, .. } => *duration,
        }
    }

    /// Short label for logs and metric dimensions.
    pub fn label(&self) -> &'static str {
        match self {
            DeliveryOutcome::Success { .. } => "success",
            DeliveryOutcome::HttpError { .. } => "http_error",
            DeliveryOutcome::Timeout { .. } => "timeout",
            DeliveryOutcome::Network { .. } => "network",
        }
    }

    pub fn describe(&self) -> String {
        match self {
            DeliveryOutcome::Success { status, .. } => format!("HTTP {status}"),
            DeliveryOutcome::HttpError { status, .. } => format!("HTTP {status}"),
            DeliveryOutcome::Timeout { duration } => {
                format!("timed out after {}ms", duration.as_millis())
            }
            DeliveryOutcome::Network { message, .. } => format!("network error: {message}"),
        }
    }
}

/// Seam between the dispatcher and the wire.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn deliver(&self, task: &DeliveryTask, config: &CategoryConfig) -> DeliveryOutcome;
}

/// Production transport backed by a pooled reqwest client.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(user_agent: &str) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(user_agent)
            .build()
            .map_err(|e| DeliveryError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookTransport for HttpTransport {
    async fn deliver(&self, task: &DeliveryTask, config: &CategoryConfig) -> DeliveryOutcome {
        let span = info_span!(
            "webhook_delivery",
            task_id = %task.id,
            destination = %task.destination,
            category = %task.category,
            attempt = task.attempts,
        );

        async move {
            let start = Instant::now();

            let mut request = self
                .client
                .post(&task.destination)
                .timeout(config.timeout)
                .header("Content-Type", "application/json")
                .header("X-Webhook-Timestamp", &task.payload.payload.timestamp)
                .header("X-Webhook-Nonce", &task.payload.payload.nonce)
                .body(task.payload.body.clone());

            if let Some(signature) = task.payload.signature_header() {
                request = request.header("X-Webhook-Signature", signature);
            }
            if let Some(token) = &config.bearer_token {
                request = request.header("Authorization", format!("Bearer {token}"));
            }

            match request.send().await {
                Ok(response) => {
                    let duration = start.elapsed();
                    let status = response.status().as_u16();
                    if response.status().is_success() {
                        debug!(status, duration_ms = duration.as_millis() as u64, "delivered");
                        DeliveryOutcome::Success { status, duration }
                    } else {
                        warn!(status, duration_ms = duration.as_millis() as u64, "destination rejected delivery");
                        DeliveryOutcome::HttpError { status, duration }
                    }
                }
                Err(e) => {
                    let duration = start.elapsed();
                    if e.is_timeout() {
                        warn!(
                            timeout_ms = config.timeout.as_millis() as u64,
                            "delivery timed out"
                        );
                        DeliveryOutcome::Timeout { duration }
                    } else {
                        warn!(error = %e, "delivery failed before a response");
                        DeliveryOutcome::Network { message: e.to_string(), duration }
                    }
                }
            }
        }
        .instrument(span)
        .await
    }
}
