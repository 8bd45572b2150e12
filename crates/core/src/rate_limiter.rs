//! Sliding-window admission control for the redemption endpoint.
//!
//! Each key (client address, or device fingerprint when no address is known)
//! keeps the timestamps of its admitted requests inside the trailing window.
//! A request is admitted only if fewer than `max_requests` entries are newer
//! than `now - window`; rejected requests are not recorded.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Duration;

use crate::types::Timestamp;

/// Default number of admitted requests per window.
pub const DEFAULT_MAX_REQUESTS: u32 = 60;

/// Default window length in seconds.
pub const DEFAULT_WINDOW_SECS: u32 = 60;

/// Configuration errors for [`RateLimiter`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimiterError {
    #[error("max_requests must be at least 1")]
    InvalidMaxRequests,
    #[error("window must be at least one second")]
    InvalidWindow,
}

/// Limits applied to every key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    max_requests: u32,
    window_secs: u32,
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window_secs: u32) -> Self {
        Self {
            max_requests,
            window_secs,
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window_secs(&self) -> u32 {
        self.window_secs
    }

    fn window(&self) -> Duration {
        Duration::seconds(i64::from(self.window_secs))
    }

    pub fn validate(&self) -> Result<(), RateLimiterError> {
        if self.max_requests == 0 {
            return Err(RateLimiterError::InvalidMaxRequests);
        }
        if self.window_secs == 0 {
            return Err(RateLimiterError::InvalidWindow);
        }
        Ok(())
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW_SECS)
    }
}

/// Outcome of one admission check, with metadata for HTTP responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Whole seconds until the oldest in-window entry ages out (when denied).
    pub retry_after_secs: Option<u64>,
    /// Requests still admissible in the current window after this one.
    pub remaining: u32,
}

struct LimiterState {
    config: RateLimitConfig,
    history: HashMap<String, VecDeque<Timestamp>>,
}

/// Per-key sliding-window limiter.
///
/// One mutex guards the whole map; every check is a single critical section,
/// so concurrent callers on the same key cannot both slip under the cap.
pub struct RateLimiter {
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Result<Self, RateLimiterError> {
        config.validate()?;
        Ok(Self {
            state: Mutex::new(LimiterState {
                config,
                history: HashMap::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> RateLimitConfig {
        self.lock().config
    }

    /// Swap in new limits. Recorded histories are kept and judged against
    /// the new window on their next access.
    pub fn reconfigure(&self, config: RateLimitConfig) -> Result<(), RateLimiterError> {
        config.validate()?;
        let mut state = self.lock();
        if state.config != config {
            tracing::info!(
                max_requests = config.max_requests,
                window_secs = config.window_secs,
                "Rate limiter reconfigured"
            );
        }
        state.config = config;
        Ok(())
    }

    /// Admission check returning only the verdict.
    pub fn allow(&self, key: &str, now: Timestamp) -> bool {
        self.check(key, now).allowed
    }

    /// Admission check. Records `now` for `key` only when admitted.
    pub fn check(&self, key: &str, now: Timestamp) -> RateLimitDecision {
        let mut state = self.lock();
        let config = state.config;
        let max = usize::try_from(config.max_requests).unwrap_or(usize::MAX);
        let window = config.window();
        let cutoff = now - window;

        let entries = state.history.entry(key.to_owned()).or_default();
        prune(entries, cutoff);

        if entries.len() < max {
            entries.push_back(now);
            let remaining = u32::try_from(max - entries.len()).unwrap_or(u32::MAX);
            return RateLimitDecision {
                allowed: true,
                retry_after_secs: None,
                remaining,
            };
        }

        let retry_after_secs = entries
            .front()
            .map(|oldest| seconds_until(*oldest + window, now));
        RateLimitDecision {
            allowed: false,
            retry_after_secs,
            remaining: 0,
        }
    }

    /// Prune every key and drop the ones with no recent activity.
    ///
    /// Returns the number of keys removed.
    pub fn sweep(&self, now: Timestamp) -> usize {
        let mut state = self.lock();
        let cutoff = now - state.config.window();
        let before = state.history.len();
        state.history.retain(|_, entries| {
            prune(entries, cutoff);
            !entries.is_empty()
        });
        before - state.history.len()
    }

    /// Number of keys currently holding history.
    pub fn tracked_keys(&self) -> usize {
        self.lock().history.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self {
            state: Mutex::new(LimiterState {
                config: RateLimitConfig::default(),
                history: HashMap::new(),
            }),
        }
    }
}

/// Drop leading entries at or before `cutoff`.
fn prune(entries: &mut VecDeque<Timestamp>, cutoff: Timestamp) {
    while entries.front().is_some_and(|t| *t <= cutoff) {
        entries.pop_front();
    }
}

/// Whole seconds from `now` until `at`, rounded up, at least 1.
fn seconds_until(at: Timestamp, now: Timestamp) -> u64 {
    let millis = (at - now).num_milliseconds().max(0);
    let secs = (millis + 999) / 1000;
    u64::try_from(secs).unwrap_or(0).max(1)
}
