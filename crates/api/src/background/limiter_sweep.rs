//! Periodic eviction of idle rate-limiter keys.
//!
//! Pruning on `check` only touches the key being checked, so addresses that
//! never return would otherwise stay in the map forever.

use std::sync::Arc;
use std::time::Duration;

use cardgate_core::clock::Clock;
use cardgate_core::rate_limiter::RateLimiter;
use tokio_util::sync::CancellationToken;

/// Run the sweep loop every `interval` until `cancel` is triggered.
pub async fn run(
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(interval_secs = interval.as_secs(), "Rate limiter sweep started");

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Rate limiter sweep stopping");
                break;
            }
            _ = ticker.tick() => {
                let removed = limiter.sweep(clock.now());
                if removed > 0 {
                    tracing::debug!(removed, remaining = limiter.tracked_keys(), "Evicted idle rate-limit keys");
                }
            }
        }
    }
}
