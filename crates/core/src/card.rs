//! Card entity and the redemption state machine.
//!
//! A card is `Unused` until its first successful redemption, after which it is
//! `Active` with a first-use timestamp and a set of bound devices. Expiry is
//! never stored: an active card is expired once `now >= first_used_at +
//! granted_minutes`.

use std::collections::BTreeSet;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::device::DeviceId;
use crate::error::CoreError;
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Number of random bytes in a generated card key.
pub const KEY_BYTES: usize = 16;

/// Length of a generated card key in hex characters.
pub const KEY_HEX_LEN: usize = KEY_BYTES * 2;

/// Longest key accepted from imports.
pub const MAX_IMPORTED_KEY_LEN: usize = 64;

/// Longest key accepted on the redemption path before it is rejected outright.
pub const MAX_LOOKUP_KEY_LEN: usize = 128;

/// Number of leading key characters that may appear in logs.
pub const KEY_LOG_PREFIX_LEN: usize = 8;

/// Smallest grantable duration.
pub const MIN_MINUTES: i32 = 1;

/// Largest grantable duration (ten years).
pub const MAX_MINUTES: i32 = 5_256_000;

/// Default cap on distinct bound devices.
pub const DEFAULT_MAX_DEVICES: i32 = 1;

/// Largest accepted device cap.
pub const MAX_DEVICES_LIMIT: i32 = 1_000;

/// Longest remark, in characters.
pub const MAX_REMARK_LEN: usize = 200;

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

/// Generate a fresh 128-bit random key, hex-encoded.
pub fn generate_card_key() -> String {
    let bytes: [u8; KEY_BYTES] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// The loggable prefix of a key. Full keys never go to logs.
pub fn key_prefix(key: &str) -> &str {
    key.get(..KEY_LOG_PREFIX_LEN).unwrap_or(key)
}

/// Normalize a key presented for redemption.
pub fn normalize_lookup_key(raw: &str) -> Result<&str, CoreError> {
    let key = raw.trim();
    if key.is_empty() {
        return Err(CoreError::Validation("card_key must not be empty".into()));
    }
    if key.len() > MAX_LOOKUP_KEY_LEN {
        return Err(CoreError::Validation(format!(
            "card_key exceeds {MAX_LOOKUP_KEY_LEN} characters"
        )));
    }
    Ok(key)
}

/// Validate a key supplied by an import rather than generated here.
pub fn validate_imported_key(key: &str) -> Result<(), CoreError> {
    if key.is_empty() || key.len() > MAX_IMPORTED_KEY_LEN {
        return Err(CoreError::Validation(format!(
            "card_key must be 1-{MAX_IMPORTED_KEY_LEN} characters"
        )));
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(CoreError::Validation(
            "card_key may only contain letters, digits, '-' and '_'".into(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Field validation
// ---------------------------------------------------------------------------

pub fn validate_minutes(minutes: i32) -> Result<(), CoreError> {
    if !(MIN_MINUTES..=MAX_MINUTES).contains(&minutes) {
        return Err(CoreError::Validation(format!(
            "minutes must be between {MIN_MINUTES} and {MAX_MINUTES}"
        )));
    }
    Ok(())
}

pub fn validate_max_devices(max_devices: i32) -> Result<(), CoreError> {
    if !(1..=MAX_DEVICES_LIMIT).contains(&max_devices) {
        return Err(CoreError::Validation(format!(
            "max_devices must be between 1 and {MAX_DEVICES_LIMIT}"
        )));
    }
    Ok(())
}

/// Trim a remark; blank remarks become `None`.
pub fn normalize_remark(remark: Option<&str>) -> Result<Option<String>, CoreError> {
    let Some(trimmed) = remark.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(None);
    };
    if trimmed.chars().count() > MAX_REMARK_LEN {
        return Err(CoreError::Validation(format!(
            "remark exceeds {MAX_REMARK_LEN} characters"
        )));
    }
    Ok(Some(trimmed.to_string()))
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Stored lifecycle state of a card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardState {
    Unused,
    Active {
        first_used_at: Timestamp,
        devices: BTreeSet<DeviceId>,
    },
}

impl CardState {
    /// Rebuild a state from the flat storage representation, checking the
    /// invariants that tie `used`, `first_used_at` and the device set together.
    pub fn from_parts(
        used: bool,
        first_used_at: Option<Timestamp>,
        devices: impl IntoIterator<Item = DeviceId>,
        max_devices: i32,
    ) -> Result<Self, String> {
        let devices: BTreeSet<DeviceId> = devices.into_iter().collect();
        match (used, first_used_at) {
            (false, None) if devices.is_empty() => Ok(CardState::Unused),
            (false, None) => Err("unused card has bound devices".into()),
            (false, Some(_)) => Err("unused card has a first-use time".into()),
            (true, None) => Err("used card has no first-use time".into()),
            (true, Some(_)) if devices.is_empty() => Err("used card has no bound device".into()),
            (true, Some(_)) if devices.len() > usize::try_from(max_devices).unwrap_or(0) => {
                Err(format!(
                    "{} bound devices exceed max_devices {max_devices}",
                    devices.len()
                ))
            }
            (true, Some(first_used_at)) => Ok(CardState::Active {
                first_used_at,
                devices,
            }),
        }
    }
}

/// Derived status used for filtering and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardStatus {
    Unused,
    Active,
    Expired,
}

impl CardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unused => "unused",
            Self::Active => "active",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "unused" => Ok(Self::Unused),
            "active" => Ok(Self::Active),
            "expired" => Ok(Self::Expired),
            other => Err(CoreError::Validation(format!(
                "Unknown card status: '{other}'. Valid statuses: unused, active, expired"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Redemption outcome
// ---------------------------------------------------------------------------

/// Result of applying one redemption to a card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedeemOutcome {
    /// First successful redemption; the card is now active.
    Activated { remaining_minutes: i64 },
    /// The device is (now) bound and time remains.
    Valid {
        remaining_minutes: i64,
        newly_bound: bool,
    },
    /// The card ran out; nothing changed.
    Expired,
    /// A new device was refused because the card is at capacity.
    DeviceLimitExceeded { max_devices: i32 },
}

impl RedeemOutcome {
    /// Whether the transition changed the card and must be persisted.
    pub fn mutated(&self) -> bool {
        matches!(
            self,
            RedeemOutcome::Activated { .. }
                | RedeemOutcome::Valid {
                    newly_bound: true,
                    ..
                }
        )
    }
}

// ---------------------------------------------------------------------------
// Card
// ---------------------------------------------------------------------------

/// A card that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCard {
    pub key: String,
    pub remark: Option<String>,
    pub granted_minutes: i32,
    pub max_devices: i32,
    pub created_at: Timestamp,
    pub state: CardState,
}

impl NewCard {
    /// A freshly issued, unused card with a random key.
    pub fn unused(
        granted_minutes: i32,
        max_devices: i32,
        remark: Option<&str>,
        now: Timestamp,
    ) -> Result<Self, CoreError> {
        validate_minutes(granted_minutes)?;
        validate_max_devices(max_devices)?;
        Ok(Self {
            key: generate_card_key(),
            remark: normalize_remark(remark)?,
            granted_minutes,
            max_devices,
            created_at: now,
            state: CardState::Unused,
        })
    }

    /// Attach the identifier assigned by the store.
    pub fn with_id(self, id: DbId) -> Card {
        Card {
            id,
            key: self.key,
            remark: self.remark,
            granted_minutes: self.granted_minutes,
            max_devices: self.max_devices,
            created_at: self.created_at,
            state: self.state,
        }
    }
}

/// A stored card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Card {
    pub id: DbId,
    pub key: String,
    pub remark: Option<String>,
    pub granted_minutes: i32,
    pub max_devices: i32,
    pub created_at: Timestamp,
    pub state: CardState,
}

impl Card {
    pub fn is_used(&self) -> bool {
        matches!(self.state, CardState::Active { .. })
    }

    pub fn first_used_at(&self) -> Option<Timestamp> {
        match &self.state {
            CardState::Unused => None,
            CardState::Active { first_used_at, .. } => Some(*first_used_at),
        }
    }

    /// Bound devices in a stable order. Empty while unused.
    pub fn devices(&self) -> impl Iterator<Item = &DeviceId> {
        let devices = match &self.state {
            CardState::Unused => None,
            CardState::Active { devices, .. } => Some(devices),
        };
        devices.into_iter().flatten()
    }

    pub fn device_count(&self) -> usize {
        self.devices().count()
    }

    pub fn is_bound_to(&self, device: &DeviceId) -> bool {
        match &self.state {
            CardState::Unused => false,
            CardState::Active { devices, .. } => devices.contains(device),
        }
    }

    pub fn expires_at(&self) -> Option<Timestamp> {
        self.first_used_at()
            .map(|first| first + Duration::minutes(i64::from(self.granted_minutes)))
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at().is_some_and(|expires| now >= expires)
    }

    /// Whole minutes left, floored. Unused cards report their full grant.
    pub fn remaining_minutes(&self, now: Timestamp) -> i64 {
        match self.expires_at() {
            None => i64::from(self.granted_minutes),
            Some(expires) if now >= expires => 0,
            Some(expires) => (expires - now).num_minutes().max(0),
        }
    }

    pub fn status(&self, now: Timestamp) -> CardStatus {
        if !self.is_used() {
            CardStatus::Unused
        } else if self.is_expired(now) {
            CardStatus::Expired
        } else {
            CardStatus::Active
        }
    }

    /// Apply one redemption attempt by `device` at `now`.
    ///
    /// The same `now` is used for the expiry test and the remaining-time
    /// computation. Expiry is checked before the device cap, so an expired
    /// card always reports `Expired`.
    pub fn redeem(&mut self, device: &DeviceId, now: Timestamp) -> RedeemOutcome {
        let granted = i64::from(self.granted_minutes);
        let expires_at = self.expires_at();
        let max_devices = self.max_devices;

        match self.state {
            CardState::Unused => {
                self.state = CardState::Active {
                    first_used_at: now,
                    devices: BTreeSet::from([device.clone()]),
                };
                RedeemOutcome::Activated {
                    remaining_minutes: granted,
                }
            }
            CardState::Active {
                ref mut devices, ..
            } => {
                let Some(expires_at) = expires_at.filter(|expires| now < *expires) else {
                    return RedeemOutcome::Expired;
                };
                let remaining_minutes = (expires_at - now).num_minutes().max(0);

                if devices.contains(device) {
                    return RedeemOutcome::Valid {
                        remaining_minutes,
                        newly_bound: false,
                    };
                }
                // Existing bindings beyond a lowered cap are kept; only new
                // devices are refused.
                if devices.len() >= usize::try_from(max_devices).unwrap_or(0) {
                    return RedeemOutcome::DeviceLimitExceeded { max_devices };
                }
                devices.insert(device.clone());
                RedeemOutcome::Valid {
                    remaining_minutes,
                    newly_bound: true,
                }
            }
        }
    }

    pub fn summary(&self, now: Timestamp) -> CardSummary {
        CardSummary {
            id: self.id,
            card_key: self.key.clone(),
            remark: self.remark.clone(),
            minutes: self.granted_minutes,
            max_devices: self.max_devices,
            created_at: self.created_at,
            is_used: self.is_used(),
            used_at: self.first_used_at(),
            devices: self.devices().map(|d| d.as_str().to_string()).collect(),
            status: self.status(now),
            remaining_minutes: self.remaining_minutes(now),
        }
    }
}

/// Serialized view of a card for listings and change notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardSummary {
    pub id: DbId,
    pub card_key: String,
    pub remark: Option<String>,
    pub minutes: i32,
    pub max_devices: i32,
    pub created_at: Timestamp,
    pub is_used: bool,
    pub used_at: Option<Timestamp>,
    pub devices: Vec<String>,
    pub status: CardStatus,
    pub remaining_minutes: i64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::{TimeZone, Utc};

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn card(minutes: i32, max_devices: i32) -> Card {
        NewCard::unused(minutes, max_devices, None, t0())
            .unwrap()
            .with_id(1)
    }

    fn device(name: &str) -> DeviceId {
        crate::device::fingerprint(name, "127.0.0.1")
    }

    // -- Key helpers -------------------------------------------------------

    #[test]
    fn generated_key_is_32_hex_chars() {
        let key = generate_card_key();
        assert_eq!(key.len(), KEY_HEX_LEN);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generated_keys_differ() {
        assert_ne!(generate_card_key(), generate_card_key());
    }

    #[test]
    fn key_prefix_handles_short_keys() {
        assert_eq!(key_prefix("abcdef0123456789"), "abcdef01");
        assert_eq!(key_prefix("abc"), "abc");
    }

    #[test]
    fn lookup_key_is_trimmed_and_required() {
        assert_eq!(normalize_lookup_key("  abc \n").unwrap(), "abc");
        assert_matches!(normalize_lookup_key("   "), Err(CoreError::Validation(_)));
        let long = "a".repeat(MAX_LOOKUP_KEY_LEN + 1);
        assert_matches!(normalize_lookup_key(&long), Err(CoreError::Validation(_)));
    }

    #[test]
    fn imported_key_rejects_odd_characters() {
        assert!(validate_imported_key("abc-DEF_123").is_ok());
        assert!(validate_imported_key("has space").is_err());
        assert!(validate_imported_key("").is_err());
    }

    // -- Creation ----------------------------------------------------------

    #[test]
    fn new_card_starts_unused() {
        let c = card(10, 1);
        assert!(!c.is_used());
        assert_eq!(c.first_used_at(), None);
        assert_eq!(c.device_count(), 0);
        assert_eq!(c.status(t0()), CardStatus::Unused);
        assert_eq!(c.remaining_minutes(t0() + Duration::days(30)), 10);
    }

    #[test]
    fn creation_validates_inputs() {
        assert!(NewCard::unused(0, 1, None, t0()).is_err());
        assert!(NewCard::unused(10, 0, None, t0()).is_err());
        assert!(NewCard::unused(MAX_MINUTES + 1, 1, None, t0()).is_err());
        let long_remark = "x".repeat(MAX_REMARK_LEN + 1);
        assert!(NewCard::unused(10, 1, Some(&long_remark), t0()).is_err());
    }

    #[test]
    fn blank_remark_becomes_none() {
        let c = NewCard::unused(10, 1, Some("   "), t0()).unwrap();
        assert_eq!(c.remark, None);
        let c = NewCard::unused(10, 1, Some(" vip "), t0()).unwrap();
        assert_eq!(c.remark.as_deref(), Some("vip"));
    }

    // -- State machine -----------------------------------------------------

    #[test]
    fn first_redemption_activates_with_full_grant() {
        let mut c = card(30, 3);
        let outcome = c.redeem(&device("a"), t0());
        assert_eq!(outcome, RedeemOutcome::Activated { remaining_minutes: 30 });
        assert!(outcome.mutated());
        assert_eq!(c.first_used_at(), Some(t0()));
        assert!(c.is_bound_to(&device("a")));
    }

    #[test]
    fn bound_device_gets_floored_remaining_minutes() {
        let mut c = card(10, 1);
        c.redeem(&device("a"), t0());

        let outcome = c.redeem(&device("a"), t0() + Duration::seconds(90));
        // 8.5 minutes left, floored to 8.
        assert_eq!(
            outcome,
            RedeemOutcome::Valid {
                remaining_minutes: 8,
                newly_bound: false
            }
        );
        assert!(!outcome.mutated());
    }

    #[test]
    fn last_partial_minute_reports_zero_but_valid() {
        let mut c = card(1, 1);
        c.redeem(&device("a"), t0());
        let outcome = c.redeem(&device("a"), t0() + Duration::seconds(59));
        assert_eq!(
            outcome,
            RedeemOutcome::Valid {
                remaining_minutes: 0,
                newly_bound: false
            }
        );
    }

    #[test]
    fn expires_exactly_at_grant_boundary() {
        let mut c = card(5, 1);
        c.redeem(&device("a"), t0());
        let at_boundary = t0() + Duration::minutes(5);
        assert!(c.is_expired(at_boundary));
        assert_eq!(c.redeem(&device("a"), at_boundary), RedeemOutcome::Expired);
        assert_eq!(c.remaining_minutes(at_boundary), 0);
        assert_eq!(c.status(at_boundary), CardStatus::Expired);
    }

    #[test]
    fn expired_card_does_not_mutate() {
        let mut c = card(5, 2);
        c.redeem(&device("a"), t0());
        let before = c.clone();
        let outcome = c.redeem(&device("b"), t0() + Duration::minutes(6));
        assert_eq!(outcome, RedeemOutcome::Expired);
        assert!(!outcome.mutated());
        assert_eq!(c, before);
    }

    #[test]
    fn expiry_wins_over_device_limit() {
        let mut c = card(5, 1);
        c.redeem(&device("a"), t0());
        let outcome = c.redeem(&device("intruder"), t0() + Duration::minutes(10));
        assert_eq!(outcome, RedeemOutcome::Expired);
    }

    #[test]
    fn second_device_binds_while_capacity_remains() {
        let mut c = card(10, 2);
        c.redeem(&device("a"), t0());
        let outcome = c.redeem(&device("b"), t0() + Duration::minutes(2));
        assert_eq!(
            outcome,
            RedeemOutcome::Valid {
                remaining_minutes: 8,
                newly_bound: true
            }
        );
        assert!(outcome.mutated());
        assert_eq!(c.device_count(), 2);
    }

    #[test]
    fn device_over_capacity_is_refused_without_mutation() {
        let mut c = card(10, 2);
        c.redeem(&device("a"), t0());
        c.redeem(&device("b"), t0() + Duration::minutes(1));
        let before = c.clone();

        let outcome = c.redeem(&device("c"), t0() + Duration::minutes(3));
        assert_eq!(outcome, RedeemOutcome::DeviceLimitExceeded { max_devices: 2 });
        assert_eq!(c, before);
    }

    #[test]
    fn lowered_cap_grandfathers_existing_devices() {
        let mut c = card(10, 2);
        c.redeem(&device("a"), t0());
        c.redeem(&device("b"), t0());
        c.max_devices = 1;

        assert_matches!(
            c.redeem(&device("b"), t0() + Duration::minutes(1)),
            RedeemOutcome::Valid { newly_bound: false, .. }
        );
        assert_matches!(
            c.redeem(&device("c"), t0() + Duration::minutes(1)),
            RedeemOutcome::DeviceLimitExceeded { max_devices: 1 }
        );
    }

    #[test]
    fn remaining_minutes_never_increases() {
        let mut c = card(10, 1);
        c.redeem(&device("a"), t0());
        let mut last = i64::MAX;
        for secs in (0..=720).step_by(17) {
            let now = t0() + Duration::seconds(secs);
            let remaining = c.remaining_minutes(now);
            assert!(remaining <= last, "remaining went up at +{secs}s");
            last = remaining;
        }
        assert_eq!(last, 0);
    }

    // -- Storage round trip ------------------------------------------------

    #[test]
    fn state_from_parts_enforces_invariants() {
        let d = device("a");
        assert_eq!(
            CardState::from_parts(false, None, Vec::new(), 1).unwrap(),
            CardState::Unused
        );
        assert!(CardState::from_parts(false, Some(t0()), Vec::new(), 1).is_err());
        assert!(CardState::from_parts(false, None, vec![d.clone()], 1).is_err());
        assert!(CardState::from_parts(true, None, vec![d.clone()], 1).is_err());
        assert!(CardState::from_parts(true, Some(t0()), Vec::new(), 1).is_err());
        assert!(CardState::from_parts(true, Some(t0()), vec![d.clone(), device("b")], 1).is_err());
        assert_matches!(
            CardState::from_parts(true, Some(t0()), vec![d.clone(), d], 1),
            Ok(CardState::Active { devices, .. }) if devices.len() == 1
        );
    }

    #[test]
    fn summary_reflects_derived_fields() {
        let mut c = card(10, 2);
        c.redeem(&device("a"), t0());
        let s = c.summary(t0() + Duration::minutes(4));
        assert!(s.is_used);
        assert_eq!(s.used_at, Some(t0()));
        assert_eq!(s.devices, vec![device("a").into_inner()]);
        assert_eq!(s.status, CardStatus::Active);
        assert_eq!(s.remaining_minutes, 6);
    }

    #[test]
    fn status_parses_round_trip() {
        for status in [CardStatus::Unused, CardStatus::Active, CardStatus::Expired] {
            assert_eq!(CardStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(CardStatus::parse("gone").is_err());
    }
}
