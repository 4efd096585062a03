//! Per-destination circuit breaking.
//!
//! One breaker instance per destination URL, so one failing integration
//! cannot block deliveries to others. State machine: Closed -> Open after
//! N consecutive failures, Open -> HalfOpen once the cooldown elapses.
//! HalfOpen means exactly one trial call is in flight: the transition is
//! the only place a trial is granted, and the circuit returns to Closed on
//! trial success or Open on trial failure. A trial aborted before reaching
//! the wire (rate-limit deferral) must be handed back via `release_trial`,
//! which re-opens the circuit as immediately eligible so the next check
//! grants a fresh trial. A success in any state forces Closed.

use std::time::Duration;

use courier_common::{BreakerConfig, CircuitState};
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
struct CircuitEntry {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    next_attempt_at: Option<Instant>,
}

impl CircuitEntry {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            next_attempt_at: None,
        }
    }
}

/// Outcome of a breaker check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerDecision {
    Allow,
    /// Cooldown elapsed: this attempt holds the single HalfOpen trial slot
    /// and must settle it via `record_success`, `record_failure`, or
    /// `release_trial`.
    AllowTrial,
    /// Short-circuited without network I/O; retry no sooner than `retry_in`.
    Deny { retry_in: Duration },
}

pub struct CircuitBreakerRegistry {
    config: BreakerConfig,
    circuits: DashMap<String, CircuitEntry>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self { config, circuits: DashMap::new() }
    }

    /// Checks whether a delivery attempt may proceed. The Open -> HalfOpen
    /// transition happens here once the cooldown has elapsed and grants the
    /// trial slot to the calling attempt; while HalfOpen, every other check
    /// is denied.
    pub fn check(&self, destination: &str) -> BreakerDecision {
        let now = Instant::now();
        let mut entry = self
            .circuits
            .entry(destination.to_string())
            .or_insert_with(CircuitEntry::closed);

        match entry.state {
            CircuitState::Closed => BreakerDecision::Allow,
            CircuitState::Open => {
                let eligible = entry.next_attempt_at.is_some_and(|at| now >= at);
                if eligible {
                    info!(destination = %destination, "circuit half-open, allowing trial call");
                    entry.state = CircuitState::HalfOpen;
                    BreakerDecision::AllowTrial
                } else {
                    let retry_in = entry
                        .next_attempt_at
                        .map(|at| at.saturating_duration_since(now))
                        .unwrap_or(self.config.cooldown);
                    BreakerDecision::Deny { retry_in }
                }
            }
            CircuitState::HalfOpen => BreakerDecision::Deny { retry_in: self.config.cooldown },
        }
    }

    /// Hands back a trial slot whose attempt never reached the wire. The
    /// circuit re-opens as immediately eligible, so the next check grants a
    /// fresh trial instead of waiting out the in-flight one forever.
    pub fn release_trial(&self, destination: &str) {
        let now = Instant::now();
        let mut entry = self
            .circuits
            .entry(destination.to_string())
            .or_insert_with(CircuitEntry::closed);

        if entry.state == CircuitState::HalfOpen {
            debug!(destination = %destination, "trial call skipped before dispatch, releasing slot");
            entry.state = CircuitState::Open;
            entry.next_attempt_at = Some(now);
        }
    }

    /// Records a successful delivery: resets the failure count and forces
    /// the circuit Closed from any state.
    pub fn record_success(&self, destination: &str) {
        let mut entry = self
            .circuits
            .entry(destination.to_string())
            .or_insert_with(CircuitEntry::closed);

        if entry.state != CircuitState::Closed {
            info!(destination = %destination, "circuit closed, destination recovered");
        }
        *entry = CircuitEntry::closed();
    }

    /// Records a failed delivery, opening the circuit when the consecutive
    /// failure threshold is reached or the HalfOpen trial fails.
    pub fn record_failure(&self, destination: &str) {
        let now = Instant::now();
        let mut entry = self
            .circuits
            .entry(destination.to_string())
            .or_insert_with(CircuitEntry::closed);

        entry.consecutive_failures += 1;
        entry.last_failure_at = Some(now);

        match entry.state {
            CircuitState::Closed => {
                if entry.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        destination = %destination,
                        consecutive_failures = entry.consecutive_failures,
                        cooldown_secs = self.config.cooldown.as_secs(),
                        "circuit opened"
                    );
                    entry.state = CircuitState::Open;
                    entry.next_attempt_at = Some(now + self.config.cooldown);
                }
            }
            CircuitState::HalfOpen => {
                warn!(destination = %destination, "trial call failed, circuit re-opened");
                entry.state = CircuitState::Open;
                entry.next_attempt_at = Some(now + self.config.cooldown);
            }
            CircuitState::Open => {}
        }
    }

    /// Current state for a destination; unknown destinations read Closed.
    pub fn current_state(&self, destination: &str) -> CircuitState {
        self.circuits
            .get(destination)
            .map(|e| e.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Destinations whose circuit is currently Open or HalfOpen, with the
    /// time since their last recorded failure.
    pub fn tripped_destinations(&self) -> Vec<(String, Option<Duration>)> {
        self.circuits
            .iter()
            .filter(|e| e.value().state != CircuitState::Closed)
            .map(|e| (e.key().clone(), e.value().last_failure_at.map(|at| at.elapsed())))
            .collect()
    }
}
