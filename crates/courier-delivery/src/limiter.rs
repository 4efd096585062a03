//! Per-destination fixed-window rate limiting.
//!
//! Each destination key owns an independent window; admission checks touch
//! only that key's map entry, so unrelated destinations never contend.
//! Expired windows are reset lazily on the next check and swept
//! periodically to bound memory.

use std::time::Duration;

use courier_common::RateLimitConfig;
use dashmap::DashMap;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    window_start: Instant,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allow,
    /// Denied: the caller must not touch the network. `retry_after` is the
    /// time until the current window resets.
    Deny { retry_after: Duration },
}

pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<String, RateWindow>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config, windows: DashMap::new() }
    }

    /// Admits or denies one request for the destination. The first call in
    /// a new window resets the counter to 1 and allows; subsequent calls
    /// increment until the configured max is reached.
    pub fn check(&self, destination: &str) -> RateDecision {
        let now = Instant::now();
        let mut entry = self
            .windows
            .entry(destination.to_string())
            .or_insert(RateWindow { count: 0, window_start: now });

        if now.duration_since(entry.window_start) >= self.config.window {
            entry.count = 0;
            entry.window_start = now;
        }

        if entry.count < self.config.max_requests {
            entry.count += 1;
            RateDecision::Allow
        } else {
            let elapsed = now.duration_since(entry.window_start);
            RateDecision::Deny { retry_after: self.config.window.saturating_sub(elapsed) }
        }
    }

    /// Requests still admissible in the destination's current window.
    pub fn remaining(&self, destination: &str) -> u32 {
        match self.windows.get(destination) {
            Some(window) => {
                if window.window_start.elapsed() >= self.config.window {
                    self.config.max_requests
                } else {
                    self.config.max_requests.saturating_sub(window.count)
                }
            }
            None => self.config.max_requests,
        }
    }

    /// Drops entries whose window has expired. Called periodically by the
    /// maintenance task.
    pub fn sweep(&self) {
        let window = self.config.window;
        self.windows.retain(|_, w| w.window_start.elapsed() < window);
    }

    #[cfg(test)]
    fn tracked_destinations(&self) -> usize {
        self.windows.len()
    }
}
