use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ============================================================================
// Categories & Priorities
// ============================================================================

/// Maximum length of the raw input carried in a payload, in characters.
pub const MAX_INPUT_CHARS: usize = 10_000;

/// Maximum length of the expanded text carried in a payload, in characters.
pub const MAX_EXPANDED_CHARS: usize = 50_000;

/// The closed set of event categories. Each category routes to exactly one
/// configured destination endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Task,
    Idea,
    Note,
    Reference,
    Sensitive,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Task,
        Category::Idea,
        Category::Note,
        Category::Reference,
        Category::Sensitive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Task => "task",
            Category::Idea => "idea",
            Category::Note => "note",
            Category::Reference => "reference",
            Category::Sensitive => "sensitive",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "task" => Ok(Category::Task),
            "idea" => Ok(Category::Idea),
            "note" => Ok(Category::Note),
            "reference" => Ok(Category::Reference),
            "sensitive" => Ok(Category::Sensitive),
            _ => Err(UnknownCategory(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown category: {0}")]
pub struct UnknownCategory(pub String);

/// Dispatch priority. Ordering is `Low < Medium < High`; the queue serves
/// higher priorities first among eligible tasks.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = UnknownPriority;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            _ => Err(UnknownPriority(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown priority: {0}")]
pub struct UnknownPriority(pub String);

// ============================================================================
// Delivery lifecycle
// ============================================================================

/// Lifecycle state of a delivery task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Queued,
    Dispatching,
    Succeeded,
    Failed,
    DeadLettered,
}

/// Circuit breaker state for a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => f.write_str("closed"),
            CircuitState::Open => f.write_str("open"),
            CircuitState::HalfOpen => f.write_str("half_open"),
        }
    }
}

// ============================================================================
// Configuration Types
// ============================================================================

/// Per-category delivery configuration.
#[derive(Debug, Clone)]
pub struct CategoryConfig {
    /// Destination webhook URL. Enqueue rejects categories without one.
    pub destination: Option<String>,
    /// Category-specific HMAC secret, overriding the shared secret.
    pub signing_secret: Option<String>,
    /// Optional bearer token sent in the Authorization header.
    pub bearer_token: Option<String>,
    /// HTTP timeout for one delivery attempt.
    pub timeout: Duration,
    /// Maximum delivery attempts before dead-lettering.
    pub max_attempts: u32,
    /// Whether deliveries for this category pass through the circuit breaker.
    pub circuit_breaker: bool,
}

impl CategoryConfig {
    /// Built-in defaults for a category: fast categories get short timeouts
    /// and a standard retry budget, the sensitive category gets maximal
    /// delivery effort (long timeout, large budget, no breaker).
    pub fn defaults_for(category: Category) -> Self {
        let (timeout_secs, max_attempts, circuit_breaker) = match category {
            Category::Task => (5, 3, true),
            Category::Idea => (10, 3, true),
            Category::Note => (10, 2, true),
            Category::Reference => (15, 2, true),
            Category::Sensitive => (20, 6, false),
        };
        Self {
            destination: None,
            signing_secret: None,
            bearer_token: None,
            timeout: Duration::from_secs(timeout_secs),
            max_attempts,
            circuit_breaker,
        }
    }
}

/// Fixed-window rate limiting, applied per destination.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub max_requests: u32,
    /// How often expired window entries are swept from memory.
    pub sweep_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_requests: 20,
            sweep_interval: Duration::from_secs(300),
        }
    }
}

/// Circuit breaker thresholds, applied per destination.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long an open circuit waits before allowing a trial call.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, cooldown: Duration::from_secs(60) }
    }
}

/// Exponential backoff parameters for retry scheduling.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { base_delay: Duration::from_millis(1000), max_delay: Duration::from_secs(300) }
    }
}

/// Top-level configuration for the delivery subsystem.
#[derive(Debug, Clone)]
pub struct CourierConfig {
    pub categories: HashMap<Category, CategoryConfig>,
    /// Shared HMAC secret. When neither this nor a per-category secret is
    /// set, payloads are sent unsigned and the degraded mode is reported
    /// through the status API.
    pub signing_secret: Option<String>,
    pub rate_limit: RateLimitConfig,
    pub breaker: BreakerConfig,
    pub retry: RetryConfig,
    /// Maximum concurrent delivery attempts across all destinations.
    pub max_concurrency: usize,
    pub user_agent: String,
}

impl Default for CourierConfig {
    fn default() -> Self {
        let categories = Category::ALL
            .iter()
            .map(|&c| (c, CategoryConfig::defaults_for(c)))
            .collect();
        Self {
            categories,
            signing_secret: None,
            rate_limit: RateLimitConfig::default(),
            breaker: BreakerConfig::default(),
            retry: RetryConfig::default(),
            max_concurrency: 5,
            user_agent: format!("courier/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl CourierConfig {
    /// Category configuration, falling back to built-in defaults for
    /// categories absent from the map.
    pub fn category(&self, category: Category) -> CategoryConfig {
        self.categories
            .get(&category)
            .cloned()
            .unwrap_or_else(|| CategoryConfig::defaults_for(category))
    }

    /// Effective signing secret for a category: per-category override first,
    /// then the shared secret.
    pub fn signing_secret_for(&self, category: Category) -> Option<String> {
        self.categories
            .get(&category)
            .and_then(|c| c.signing_secret.clone())
            .or_else(|| self.signing_secret.clone())
    }

    /// True when at least one category can produce signed payloads.
    pub fn signing_enabled(&self) -> bool {
        self.signing_secret.is_some()
            || self.categories.values().any(|c| c.signing_secret.is_some())
    }
}

// ============================================================================
// Status API Types
// ============================================================================

/// Per-destination view exposed by the status API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationStats {
    pub destination: String,
    pub circuit_state: CircuitState,
    /// Requests still admissible in the current rate window.
    pub rate_window_remaining: u32,
}

/// Rolling-window counters and timing, windowed over the metrics horizon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowMetrics {
    pub queued: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
    pub rate_limited: u64,
    pub dead_lettered: u64,
    /// Mean duration of completed delivery attempts, in milliseconds.
    pub avg_delivery_ms: f64,
    pub window_secs: u64,
}

/// Derived health verdict based on the rolling success rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// Success rate over the rolling window, 0.0 to 1.0.
    pub success_rate: f64,
    pub issues: Vec<String>,
}

/// Snapshot returned by the operational status API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryStats {
    pub queue_length: usize,
    pub active_workers: u32,
    pub max_concurrency: usize,
    pub signing_enabled: bool,
    pub per_destination: Vec<DestinationStats>,
    pub metrics: WindowMetrics,
    pub health: HealthReport,
}
