//! Courier Delivery Server
//!
//! Runs the webhook delivery pipeline and exposes its operational surface:
//! - POST /api/deliveries    enqueue ingress for the producer
//! - GET  /api/stats         queue, worker, per-destination and rolling metrics
//! - GET  /api/deadletters   recent terminally-failed deliveries
//! - GET  /health            basic health, /health/live + /health/ready probes
//! - GET  /metrics           Prometheus exposition
//!
//! Configuration is environment-driven; see `load_config`.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use courier_common::{Category, CourierConfig, HealthStatus};
use courier_delivery::{DeliveryService, EnqueueError, NewDelivery};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Clone)]
struct AppState {
    service: Arc<DeliveryService>,
    prometheus: PrometheusHandle,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    info!("Starting Courier Delivery Server");

    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install prometheus recorder: {e}"))?;

    let config = load_config();
    let configured: Vec<&str> = Category::ALL
        .iter()
        .filter(|c| config.category(**c).destination.is_some())
        .map(|c| c.as_str())
        .collect();
    if configured.is_empty() {
        warn!("no destination configured for any category; every enqueue will be rejected");
    } else {
        info!(categories = ?configured, "destinations configured");
    }

    let service = Arc::new(DeliveryService::with_http_transport(config)?);
    service.start();

    let state = AppState { service: service.clone(), prometheus };
    let app = Router::new()
        .route("/api/deliveries", post(enqueue_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/deadletters", get(dead_letters_handler))
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let listen_addr =
        std::env::var("COURIER_LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = TcpListener::bind(&listen_addr).await?;
    info!(addr = %listen_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, draining delivery workers");
    service.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    info!("shutdown signal received");
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Debug, Deserialize)]
struct EnqueueRequest {
    category: String,
    input: String,
    #[serde(default)]
    expanded: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    subcategory: Option<String>,
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    delivery_id: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

async fn enqueue_handler(
    State(state): State<AppState>,
    Json(request): Json<EnqueueRequest>,
) -> impl IntoResponse {
    let result = state.service.enqueue(NewDelivery {
        category: request.category,
        raw_input: request.input,
        expanded_text: request.expanded,
        priority: request.priority,
        subcategory: request.subcategory,
    });

    match result {
        Ok(id) => (
            StatusCode::ACCEPTED,
            Json(EnqueueResponse { delivery_id: id.to_string() }).into_response(),
        ),
        Err(e) => {
            let status = match e {
                EnqueueError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::BAD_REQUEST,
            };
            (status, Json(ErrorResponse { error: e.to_string() }).into_response())
        }
    }
}

async fn stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.stats())
}

#[derive(Debug, Deserialize)]
struct DeadLettersQuery {
    #[serde(default)]
    limit: Option<usize>,
}

async fn dead_letters_handler(
    State(state): State<AppState>,
    Query(query): Query<DeadLettersQuery>,
) -> impl IntoResponse {
    let entries = state.service.dead_letters(query.limit.unwrap_or(50)).await;
    Json(entries)
}

#[derive(Debug, Serialize)]
struct SimpleHealthResponse {
    status: String,
    version: String,
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.service.stats().health;
    let status = match health.status {
        HealthStatus::Healthy => "UP",
        HealthStatus::Degraded => "DEGRADED",
        HealthStatus::Unhealthy => "UNHEALTHY",
    };
    Json(SimpleHealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Debug, Serialize)]
struct ProbeResponse {
    status: String,
}

async fn liveness_handler() -> impl IntoResponse {
    Json(ProbeResponse { status: "LIVE".to_string() })
}

async fn readiness_handler() -> impl IntoResponse {
    Json(ProbeResponse { status: "READY".to_string() })
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.prometheus.render()
}

// ============================================================================
// Configuration
// ============================================================================

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Assembles the delivery configuration from the environment.
///
/// Recognized variables (all optional; defaults come from the library):
/// - `COURIER_DESTINATION_<CATEGORY>`: webhook URL per category
/// - `COURIER_SIGNING_SECRET`, `COURIER_SIGNING_SECRET_<CATEGORY>`
/// - `COURIER_BEARER_TOKEN_<CATEGORY>`
/// - `COURIER_TIMEOUT_SECS_<CATEGORY>`, `COURIER_MAX_ATTEMPTS_<CATEGORY>`
/// - `COURIER_RATE_LIMIT_MAX`, `COURIER_RATE_LIMIT_WINDOW_SECS`
/// - `COURIER_BREAKER_THRESHOLD`, `COURIER_BREAKER_COOLDOWN_SECS`
/// - `COURIER_RETRY_BASE_MS`, `COURIER_MAX_CONCURRENCY`
fn load_config() -> CourierConfig {
    let mut config = CourierConfig::default();

    config.signing_secret = std::env::var("COURIER_SIGNING_SECRET").ok();

    for category in Category::ALL {
        let suffix = category.as_str().to_uppercase();
        let Some(category_config) = config.categories.get_mut(&category) else {
            continue;
        };

        if let Ok(url) = std::env::var(format!("COURIER_DESTINATION_{suffix}")) {
            category_config.destination = Some(url);
        }
        if let Ok(secret) = std::env::var(format!("COURIER_SIGNING_SECRET_{suffix}")) {
            category_config.signing_secret = Some(secret);
        }
        if let Ok(token) = std::env::var(format!("COURIER_BEARER_TOKEN_{suffix}")) {
            category_config.bearer_token = Some(token);
        }
        if let Some(secs) = env_parse::<u64>(&format!("COURIER_TIMEOUT_SECS_{suffix}")) {
            category_config.timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = env_parse::<u32>(&format!("COURIER_MAX_ATTEMPTS_{suffix}")) {
            category_config.max_attempts = attempts;
        }
    }

    if let Some(max) = env_parse::<u32>("COURIER_RATE_LIMIT_MAX") {
        config.rate_limit.max_requests = max;
    }
    if let Some(secs) = env_parse::<u64>("COURIER_RATE_LIMIT_WINDOW_SECS") {
        config.rate_limit.window = Duration::from_secs(secs);
    }
    if let Some(threshold) = env_parse::<u32>("COURIER_BREAKER_THRESHOLD") {
        config.breaker.failure_threshold = threshold;
    }
    if let Some(secs) = env_parse::<u64>("COURIER_BREAKER_COOLDOWN_SECS") {
        config.breaker.cooldown = Duration::from_secs(secs);
    }
    if let Some(ms) = env_parse::<u64>("COURIER_RETRY_BASE_MS") {
        config.retry.base_delay = Duration::from_millis(ms);
    }
    if let Some(n) = env_parse::<usize>("COURIER_MAX_CONCURRENCY") {
        config.max_concurrency = n;
    }

    config
}
