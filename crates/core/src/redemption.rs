//! Redemption orchestration.
//!
//! [`RedemptionService::redeem`] answers "may this device use this card right
//! now?" Steps run in a fixed order: feature flag, rate limit, key
//! validation, fingerprint, then the store's atomic find-redeem-update. The
//! first two reject before any store access.

use std::sync::Arc;

use crate::card::{key_prefix, normalize_lookup_key, RedeemOutcome};
use crate::clock::Clock;
use crate::device::fingerprint;
use crate::error::CoreError;
use crate::notify::SnapshotPublisher;
use crate::rate_limiter::RateLimiter;
use crate::settings::SettingsStore;
use crate::store::CardStore;

/// One inbound redemption attempt.
#[derive(Debug, Clone)]
pub struct RedemptionRequest {
    pub card_key: String,
    /// Client-supplied signature, e.g. the `User-Agent` header.
    pub client_signature: String,
    /// Peer address if known.
    pub network_address: Option<String>,
}

/// What the caller is told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// First use; the card is now active for this device.
    Activated { remaining_minutes: i64 },
    /// The device is bound and time remains.
    Valid { remaining_minutes: i64 },
    Expired,
    NotFound,
    RateLimited { retry_after_secs: u64 },
    DeviceLimitExceeded { max_devices: i32 },
    FeatureDisabled,
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verdict::Activated { .. } | Verdict::Valid { .. })
    }

    pub fn remaining_minutes(&self) -> i64 {
        match self {
            Verdict::Activated { remaining_minutes } | Verdict::Valid { remaining_minutes } => {
                *remaining_minutes
            }
            _ => 0,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Verdict::Activated { .. } => "Card activated",
            Verdict::Valid { .. } => "Card is valid",
            Verdict::Expired => "Card has expired",
            Verdict::NotFound => "Card not found",
            Verdict::RateLimited { .. } => "Too many requests, please try again later",
            Verdict::DeviceLimitExceeded { .. } => "Device limit reached for this card",
            Verdict::FeatureDisabled => "Card verification is disabled",
        }
    }
}

impl From<RedeemOutcome> for Verdict {
    fn from(outcome: RedeemOutcome) -> Self {
        match outcome {
            RedeemOutcome::Activated { remaining_minutes } => {
                Verdict::Activated { remaining_minutes }
            }
            RedeemOutcome::Valid {
                remaining_minutes, ..
            } => Verdict::Valid { remaining_minutes },
            RedeemOutcome::Expired => Verdict::Expired,
            RedeemOutcome::DeviceLimitExceeded { max_devices } => {
                Verdict::DeviceLimitExceeded { max_devices }
            }
        }
    }
}

pub struct RedemptionService {
    store: Arc<dyn CardStore>,
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
    settings: Arc<SettingsStore>,
    publisher: SnapshotPublisher,
}

impl RedemptionService {
    pub fn new(
        store: Arc<dyn CardStore>,
        limiter: Arc<RateLimiter>,
        clock: Arc<dyn Clock>,
        settings: Arc<SettingsStore>,
        publisher: SnapshotPublisher,
    ) -> Self {
        Self {
            store,
            limiter,
            clock,
            settings,
            publisher,
        }
    }

    /// Evaluate one redemption.
    ///
    /// `Err(CoreError::Validation)` for a malformed key; `Err(CoreError::Internal)`
    /// for a storage failure, in which case nothing was committed.
    pub async fn redeem(&self, request: &RedemptionRequest) -> Result<Verdict, CoreError> {
        if !self.settings.current().api_enabled {
            return Ok(Verdict::FeatureDisabled);
        }

        let now = self.clock.now();
        let address = request.network_address.as_deref().unwrap_or("");
        let device = fingerprint(&request.client_signature, address);
        let limiter_key = request
            .network_address
            .as_deref()
            .unwrap_or_else(|| device.as_str());

        let decision = self.limiter.check(limiter_key, now);
        if !decision.allowed {
            tracing::debug!(limiter_key, "Redemption rate-limited");
            return Ok(Verdict::RateLimited {
                retry_after_secs: decision.retry_after_secs.unwrap_or(1),
            });
        }

        let key = normalize_lookup_key(&request.card_key)?;

        let redemption = match self.store.redeem(key, &device, now).await {
            Ok(Some(redemption)) => redemption,
            Ok(None) => {
                tracing::debug!(key_prefix = key_prefix(key), "Unknown card key");
                return Ok(Verdict::NotFound);
            }
            Err(e) => {
                tracing::error!(
                    key_prefix = key_prefix(key),
                    error = %e,
                    "Redemption failed in storage"
                );
                return Err(CoreError::Internal(e.to_string()));
            }
        };

        let card_id = redemption.card.id;
        match &redemption.outcome {
            RedeemOutcome::Activated { .. } => {
                tracing::info!(card_id, key_prefix = key_prefix(key), "Card activated");
            }
            RedeemOutcome::Valid {
                newly_bound: true, ..
            } => {
                tracing::info!(
                    card_id,
                    devices = redemption.card.device_count(),
                    "Additional device bound to card"
                );
            }
            RedeemOutcome::DeviceLimitExceeded { max_devices } => {
                tracing::warn!(card_id, max_devices, "Device limit reached");
            }
            RedeemOutcome::Valid { .. } | RedeemOutcome::Expired => {}
        }

        if redemption.outcome.mutated() {
            self.publisher.publish().await;
        }

        Ok(redemption.outcome.into())
    }
}
