//! Row model for the `cards` table and its mapping to the domain [`Card`].

use cardgate_core::card::{Card, CardState, NewCard};
use cardgate_core::device::DeviceId;
use cardgate_core::store::{CardStats, StoreError};
use cardgate_core::types::{DbId, Timestamp};
use sqlx::FromRow;

// ---------------------------------------------------------------------------
// Card row
// ---------------------------------------------------------------------------

/// A row from the `cards` table.
///
/// The device set is stored as `TEXT[]`; invariants are checked again when
/// the row is turned into a [`Card`].
#[derive(Debug, Clone, FromRow)]
pub struct CardRow {
    pub id: DbId,
    pub card_key: String,
    pub remark: Option<String>,
    pub granted_minutes: i32,
    pub max_devices: i32,
    pub is_used: bool,
    pub first_used_at: Option<Timestamp>,
    pub devices: Vec<String>,
    pub created_at: Timestamp,
}

impl TryFrom<CardRow> for Card {
    type Error = StoreError;

    fn try_from(row: CardRow) -> Result<Self, Self::Error> {
        let state = CardState::from_parts(
            row.is_used,
            row.first_used_at,
            row.devices.into_iter().map(DeviceId::from_stored),
            row.max_devices,
        )
        .map_err(|reason| StoreError::Corrupt { id: row.id, reason })?;

        Ok(Card {
            id: row.id,
            key: row.card_key,
            remark: row.remark,
            granted_minutes: row.granted_minutes,
            max_devices: row.max_devices,
            created_at: row.created_at,
            state,
        })
    }
}

// ---------------------------------------------------------------------------
// Write DTO
// ---------------------------------------------------------------------------

/// Flattened card state as bound into INSERT/UPDATE statements.
#[derive(Debug, Clone)]
pub struct CardWrite {
    pub card_key: String,
    pub remark: Option<String>,
    pub granted_minutes: i32,
    pub max_devices: i32,
    pub is_used: bool,
    pub first_used_at: Option<Timestamp>,
    pub devices: Vec<String>,
    pub created_at: Timestamp,
}

fn state_columns(state: &CardState) -> (bool, Option<Timestamp>, Vec<String>) {
    match state {
        CardState::Unused => (false, None, Vec::new()),
        CardState::Active {
            first_used_at,
            devices,
        } => (
            true,
            Some(*first_used_at),
            devices.iter().map(|d| d.as_str().to_string()).collect(),
        ),
    }
}

impl From<&NewCard> for CardWrite {
    fn from(card: &NewCard) -> Self {
        let (is_used, first_used_at, devices) = state_columns(&card.state);
        Self {
            card_key: card.key.clone(),
            remark: card.remark.clone(),
            granted_minutes: card.granted_minutes,
            max_devices: card.max_devices,
            is_used,
            first_used_at,
            devices,
            created_at: card.created_at,
        }
    }
}

impl From<&Card> for CardWrite {
    fn from(card: &Card) -> Self {
        let (is_used, first_used_at, devices) = state_columns(&card.state);
        Self {
            card_key: card.key.clone(),
            remark: card.remark.clone(),
            granted_minutes: card.granted_minutes,
            max_devices: card.max_devices,
            is_used,
            first_used_at,
            devices,
            created_at: card.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregates
// ---------------------------------------------------------------------------

/// Per-status counts computed in SQL.
#[derive(Debug, Clone, Copy, FromRow)]
pub struct CardStatsRow {
    pub total: i64,
    pub unused: i64,
    pub active: i64,
    pub expired: i64,
}

impl From<CardStatsRow> for CardStats {
    fn from(row: CardStatsRow) -> Self {
        CardStats {
            total: row.total,
            unused: row.unused,
            active: row.active,
            expired: row.expired,
        }
    }
}
