//! PostgreSQL-backed [`CardStore`].
//!
//! Redemption runs in a transaction that locks the card row with
//! `SELECT ... FOR UPDATE`, so concurrent redemptions of the same key are
//! serialized by the database. Any error drops the transaction, which rolls
//! it back.

use async_trait::async_trait;
use cardgate_core::card::{key_prefix, Card, NewCard};
use cardgate_core::device::DeviceId;
use cardgate_core::store::{
    BulkInsertReport, CardPage, CardQuery, CardStats, CardStore, Redemption, StoreError,
};
use cardgate_core::types::{DbId, Timestamp};

use crate::models::card::{CardRow, CardWrite};
use crate::repositories::CardRepo;
use crate::DbPool;

const UNIQUE_KEY_CONSTRAINT: &str = "uq_cards_card_key";

/// [`CardStore`] over a Postgres pool.
#[derive(Clone)]
pub struct PgCardStore {
    pool: DbPool,
}

impl PgCardStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn is_duplicate_key(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some("23505")
                && db_err.constraint() == Some(UNIQUE_KEY_CONSTRAINT)
        }
        _ => false,
    }
}

fn into_cards(rows: Vec<CardRow>) -> Result<Vec<Card>, StoreError> {
    rows.into_iter().map(Card::try_from).collect()
}

#[async_trait]
impl CardStore for PgCardStore {
    async fn find_by_key(&self, key: &str) -> Result<Option<Card>, StoreError> {
        CardRepo::find_by_key(&self.pool, key)
            .await
            .map_err(backend)?
            .map(Card::try_from)
            .transpose()
    }

    async fn find_by_id(&self, id: DbId) -> Result<Option<Card>, StoreError> {
        CardRepo::find_by_id(&self.pool, id)
            .await
            .map_err(backend)?
            .map(Card::try_from)
            .transpose()
    }

    async fn insert(&self, card: NewCard) -> Result<Card, StoreError> {
        match CardRepo::create(&self.pool, &CardWrite::from(&card)).await {
            Ok(row) => Card::try_from(row),
            Err(e) if is_duplicate_key(&e) => {
                Err(StoreError::DuplicateKey(key_prefix(&card.key).to_string()))
            }
            Err(e) => Err(backend(e)),
        }
    }

    async fn bulk_insert(&self, cards: Vec<NewCard>) -> Result<BulkInsertReport, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let mut report = BulkInsertReport::default();
        for card in cards {
            let write = CardWrite::from(&card);
            match CardRepo::create_if_absent(&mut *tx, &write)
                .await
                .map_err(backend)?
            {
                Some(row) => report.inserted.push(Card::try_from(row)?),
                None => {
                    tracing::debug!(key_prefix = key_prefix(&card.key), "Card key exists, skipping");
                    report.skipped.push(card.key);
                }
            }
        }
        tx.commit().await.map_err(backend)?;
        Ok(report)
    }

    async fn update(&self, card: &Card) -> Result<bool, StoreError> {
        CardRepo::update(&self.pool, card.id, &CardWrite::from(card))
            .await
            .map_err(backend)
    }

    async fn delete(&self, id: DbId) -> Result<bool, StoreError> {
        CardRepo::delete(&self.pool, id).await.map_err(backend)
    }

    async fn all(&self) -> Result<Vec<Card>, StoreError> {
        into_cards(CardRepo::list_all(&self.pool).await.map_err(backend)?)
    }

    async fn page(&self, query: &CardQuery, now: Timestamp) -> Result<CardPage, StoreError> {
        let status = query.status.map(|s| s.as_str());
        let search = query.search.as_deref();
        let rows = CardRepo::list_page(
            &self.pool,
            status,
            search,
            now,
            query.per_page,
            query.offset(),
        )
        .await
        .map_err(backend)?;
        let total = CardRepo::count_matching(&self.pool, status, search, now)
            .await
            .map_err(backend)?;
        Ok(CardPage {
            items: into_cards(rows)?,
            total,
            page: query.page,
            per_page: query.per_page,
        })
    }

    async fn stats(&self, now: Timestamp) -> Result<CardStats, StoreError> {
        Ok(CardRepo::stats(&self.pool, now)
            .await
            .map_err(backend)?
            .into())
    }

    async fn redeem(
        &self,
        key: &str,
        device: &DeviceId,
        now: Timestamp,
    ) -> Result<Option<Redemption>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let Some(row) = CardRepo::find_by_key_for_update(&mut *tx, key)
            .await
            .map_err(backend)?
        else {
            return Ok(None);
        };
        let mut card = Card::try_from(row)?;
        let outcome = card.redeem(device, now);

        if outcome.mutated() {
            let updated = CardRepo::update(&mut *tx, card.id, &CardWrite::from(&card))
                .await
                .map_err(backend)?;
            if !updated {
                return Err(StoreError::Backend(format!(
                    "locked card {} vanished during redemption",
                    card.id
                )));
            }
        }
        tx.commit().await.map_err(backend)?;

        Ok(Some(Redemption { card, outcome }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        crate::health_check(&self.pool).await.map_err(backend)
    }
}
