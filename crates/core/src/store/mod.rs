//! Card persistence contract.
//!
//! [`CardStore`] is the seam between the redemption logic and storage. The
//! PostgreSQL implementation lives in `cardgate-db`; [`MemoryCardStore`] backs
//! tests and single-process demos.
//!
//! The store owns the atomicity boundary: [`CardStore::redeem`] performs
//! find → [`Card::redeem`] → update as one unit per card key, so two
//! concurrent redemptions of the same card are serialized.

mod memory;

use async_trait::async_trait;
use serde::Serialize;

use crate::card::{Card, CardStatus, NewCard, RedeemOutcome};
use crate::device::DeviceId;
use crate::types::{DbId, Timestamp};

pub use memory::MemoryCardStore;

/// Largest page size accepted by [`CardQuery`].
pub const MAX_PER_PAGE: i64 = 500;

/// Storage-level failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A card with this key already exists. Carries the loggable key prefix.
    #[error("duplicate card key {0}…")]
    DuplicateKey(String),

    /// A stored row violates the card invariants.
    #[error("corrupt card record {id}: {reason}")]
    Corrupt { id: DbId, reason: String },

    /// The backend failed (I/O, connection, transaction).
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Filter and pagination for admin listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardQuery {
    pub status: Option<CardStatus>,
    /// Case-insensitive substring match against key and remark.
    pub search: Option<String>,
    /// 1-based page number.
    pub page: i64,
    pub per_page: i64,
}

impl CardQuery {
    pub fn new(page: i64, per_page: i64) -> Self {
        Self {
            status: None,
            search: None,
            page: page.max(1),
            per_page: per_page.clamp(1, MAX_PER_PAGE),
        }
    }

    pub fn with_status(mut self, status: Option<CardStatus>) -> Self {
        self.status = status;
        self
    }

    pub fn with_search(mut self, search: Option<&str>) -> Self {
        self.search = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        self
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.per_page)
    }
}

/// One page of cards, newest first.
#[derive(Debug, Clone)]
pub struct CardPage {
    pub items: Vec<Card>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

/// Card counts per derived status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CardStats {
    pub total: i64,
    pub unused: i64,
    pub active: i64,
    pub expired: i64,
}

/// Result of [`CardStore::bulk_insert`].
#[derive(Debug, Clone, Default)]
pub struct BulkInsertReport {
    pub inserted: Vec<Card>,
    /// Keys skipped because they already existed.
    pub skipped: Vec<String>,
}

/// A committed redemption: the card as it stands afterwards and what happened.
#[derive(Debug, Clone)]
pub struct Redemption {
    pub card: Card,
    pub outcome: RedeemOutcome,
}

#[async_trait]
pub trait CardStore: Send + Sync {
    async fn find_by_key(&self, key: &str) -> Result<Option<Card>, StoreError>;

    async fn find_by_id(&self, id: DbId) -> Result<Option<Card>, StoreError>;

    /// Insert one card. Fails with [`StoreError::DuplicateKey`] if the key exists.
    async fn insert(&self, card: NewCard) -> Result<Card, StoreError>;

    /// Insert many cards, skipping (not failing on) keys that already exist,
    /// including duplicates within the batch.
    async fn bulk_insert(&self, cards: Vec<NewCard>) -> Result<BulkInsertReport, StoreError>;

    /// Persist a mutated card. Returns `false` if the card no longer exists.
    async fn update(&self, card: &Card) -> Result<bool, StoreError>;

    /// Returns `false` if no card had this id.
    async fn delete(&self, id: DbId) -> Result<bool, StoreError>;

    /// Every card, newest first.
    async fn all(&self) -> Result<Vec<Card>, StoreError>;

    async fn page(&self, query: &CardQuery, now: Timestamp) -> Result<CardPage, StoreError>;

    async fn stats(&self, now: Timestamp) -> Result<CardStats, StoreError>;

    /// Atomically load the card for `key`, apply the redemption transition and
    /// persist it if it changed. `None` when no card has this key.
    async fn redeem(
        &self,
        key: &str,
        device: &DeviceId,
        now: Timestamp,
    ) -> Result<Option<Redemption>, StoreError>;

    /// Cheap liveness check for the health endpoint.
    async fn ping(&self) -> Result<(), StoreError>;
}
