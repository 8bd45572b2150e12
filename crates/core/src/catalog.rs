//! Administrative card operations.
//!
//! Every committed mutation is followed by a snapshot publish so live
//! dashboards refresh.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::card::{key_prefix, CardSummary, NewCard, DEFAULT_MAX_DEVICES};
use crate::clock::Clock;
use crate::error::CoreError;
use crate::notify::SnapshotPublisher;
use crate::store::{CardQuery, CardStats, CardStore};
use crate::transfer::{self, ImportReport};
use crate::types::DbId;

/// Largest number of cards created by one bulk request.
pub const MAX_BULK_COUNT: u32 = 1_000;

/// Input for a single card.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCard {
    pub minutes: i32,
    pub max_devices: Option<i32>,
    pub remark: Option<String>,
}

/// Input for a batch of identical cards.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkCreateCards {
    pub minutes: i32,
    pub count: u32,
    pub max_devices: Option<i32>,
    pub remark: Option<String>,
}

/// Result of a bulk create.
#[derive(Debug, Clone, Serialize)]
pub struct BulkCreated {
    pub cards: Vec<CardSummary>,
    /// Generated keys that collided with existing ones and were dropped.
    pub skipped: usize,
}

/// One page of a listing, ready for serialization.
#[derive(Debug, Clone, Serialize)]
pub struct CardListing {
    pub items: Vec<CardSummary>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

pub struct CardCatalog {
    store: Arc<dyn CardStore>,
    clock: Arc<dyn Clock>,
    publisher: SnapshotPublisher,
}

impl CardCatalog {
    pub fn new(
        store: Arc<dyn CardStore>,
        clock: Arc<dyn Clock>,
        publisher: SnapshotPublisher,
    ) -> Self {
        Self {
            store,
            clock,
            publisher,
        }
    }

    pub async fn create(&self, input: CreateCard) -> Result<CardSummary, CoreError> {
        let now = self.clock.now();
        let new_card = NewCard::unused(
            input.minutes,
            input.max_devices.unwrap_or(DEFAULT_MAX_DEVICES),
            input.remark.as_deref(),
            now,
        )?;
        let card = self.store.insert(new_card).await?;
        tracing::info!(
            card_id = card.id,
            key_prefix = key_prefix(&card.key),
            minutes = card.granted_minutes,
            max_devices = card.max_devices,
            "Card created"
        );
        self.publisher.publish().await;
        Ok(card.summary(now))
    }

    pub async fn bulk_create(&self, input: BulkCreateCards) -> Result<BulkCreated, CoreError> {
        if !(1..=MAX_BULK_COUNT).contains(&input.count) {
            return Err(CoreError::Validation(format!(
                "count must be between 1 and {MAX_BULK_COUNT}"
            )));
        }
        let now = self.clock.now();
        let max_devices = input.max_devices.unwrap_or(DEFAULT_MAX_DEVICES);
        let cards = (0..input.count)
            .map(|_| NewCard::unused(input.minutes, max_devices, input.remark.as_deref(), now))
            .collect::<Result<Vec<_>, _>>()?;

        let report = self.store.bulk_insert(cards).await?;
        tracing::info!(
            created = report.inserted.len(),
            skipped = report.skipped.len(),
            minutes = input.minutes,
            "Cards bulk-created"
        );
        if !report.inserted.is_empty() {
            self.publisher.publish().await;
        }
        Ok(BulkCreated {
            cards: report.inserted.iter().map(|c| c.summary(now)).collect(),
            skipped: report.skipped.len(),
        })
    }

    pub async fn get(&self, id: DbId) -> Result<CardSummary, CoreError> {
        let card = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(CoreError::NotFound { entity: "Card", id })?;
        Ok(card.summary(self.clock.now()))
    }

    pub async fn delete(&self, id: DbId) -> Result<(), CoreError> {
        if !self.store.delete(id).await? {
            return Err(CoreError::NotFound { entity: "Card", id });
        }
        tracing::info!(card_id = id, "Card deleted");
        self.publisher.publish().await;
        Ok(())
    }

    pub async fn list(&self, query: &CardQuery) -> Result<CardListing, CoreError> {
        let now = self.clock.now();
        let page = self.store.page(query, now).await?;
        let total_pages = if page.total == 0 {
            0
        } else {
            (page.total + page.per_page - 1) / page.per_page
        };
        Ok(CardListing {
            items: page.items.iter().map(|c| c.summary(now)).collect(),
            total: page.total,
            page: page.page,
            per_page: page.per_page,
            total_pages,
        })
    }

    pub async fn stats(&self) -> Result<CardStats, CoreError> {
        Ok(self.store.stats(self.clock.now()).await?)
    }

    /// Every card as CSV, newest first.
    pub async fn export_csv(&self) -> Result<String, CoreError> {
        let cards = self.store.all().await?;
        tracing::info!(count = cards.len(), "Cards exported");
        transfer::export_csv(&cards)
    }

    /// Import cards from CSV. Keys already present are skipped, never
    /// overwritten; invalid rows are reported and the rest still imported.
    pub async fn import_csv(&self, data: &[u8]) -> Result<ImportReport, CoreError> {
        let parsed = transfer::parse_csv(data, self.clock.now())?;
        let report = self.store.bulk_insert(parsed.cards).await?;
        let result = ImportReport {
            imported: report.inserted.len(),
            skipped: report.skipped.len(),
            rejected: parsed.rejected,
        };
        tracing::info!(
            imported = result.imported,
            skipped = result.skipped,
            rejected = result.rejected.len(),
            "Cards imported"
        );
        if result.imported > 0 {
            self.publisher.publish().await;
        }
        Ok(result)
    }
}
