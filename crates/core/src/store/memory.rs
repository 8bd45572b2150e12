use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{
    BulkInsertReport, CardPage, CardQuery, CardStats, CardStore, Redemption, StoreError,
};
use crate::card::{key_prefix, Card, CardStatus, NewCard};
use crate::device::DeviceId;
use crate::types::{DbId, Timestamp};

#[derive(Default)]
struct Inner {
    next_id: DbId,
    cards: BTreeMap<DbId, Card>,
    ids_by_key: HashMap<String, DbId>,
}

impl Inner {
    fn insert(&mut self, card: NewCard) -> Result<Card, StoreError> {
        if self.ids_by_key.contains_key(&card.key) {
            return Err(StoreError::DuplicateKey(key_prefix(&card.key).to_string()));
        }
        self.next_id += 1;
        let card = card.with_id(self.next_id);
        self.ids_by_key.insert(card.key.clone(), card.id);
        self.cards.insert(card.id, card.clone());
        Ok(card)
    }

    fn newest_first(&self) -> Vec<&Card> {
        let mut cards: Vec<&Card> = self.cards.values().collect();
        cards.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        cards
    }
}

/// In-process [`CardStore`].
///
/// A single async mutex guards all cards, so every operation, including the
/// find-redeem-update sequence, runs as one critical section.
#[derive(Default)]
pub struct MemoryCardStore {
    inner: Mutex<Inner>,
}

impl MemoryCardStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches_query(card: &Card, query: &CardQuery, now: Timestamp) -> bool {
    if query.status.is_some_and(|status| card.status(now) != status) {
        return false;
    }
    match &query.search {
        None => true,
        Some(needle) => {
            let needle = needle.to_lowercase();
            card.key.to_lowercase().contains(&needle)
                || card
                    .remark
                    .as_deref()
                    .is_some_and(|r| r.to_lowercase().contains(&needle))
        }
    }
}

#[async_trait]
impl CardStore for MemoryCardStore {
    async fn find_by_key(&self, key: &str) -> Result<Option<Card>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .ids_by_key
            .get(key)
            .and_then(|id| inner.cards.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: DbId) -> Result<Option<Card>, StoreError> {
        Ok(self.inner.lock().await.cards.get(&id).cloned())
    }

    async fn insert(&self, card: NewCard) -> Result<Card, StoreError> {
        self.inner.lock().await.insert(card)
    }

    async fn bulk_insert(&self, cards: Vec<NewCard>) -> Result<BulkInsertReport, StoreError> {
        let mut inner = self.inner.lock().await;
        let mut report = BulkInsertReport::default();
        for card in cards {
            let key = card.key.clone();
            match inner.insert(card) {
                Ok(card) => report.inserted.push(card),
                Err(StoreError::DuplicateKey(_)) => report.skipped.push(key),
                Err(other) => return Err(other),
            }
        }
        Ok(report)
    }

    async fn update(&self, card: &Card) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.cards.get_mut(&card.id) {
            Some(existing) if existing.key == card.key => {
                *existing = card.clone();
                Ok(true)
            }
            Some(_) => Err(StoreError::Backend("card key is immutable".into())),
            None => Ok(false),
        }
    }

    async fn delete(&self, id: DbId) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.cards.remove(&id) {
            Some(card) => {
                inner.ids_by_key.remove(&card.key);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn all(&self) -> Result<Vec<Card>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.newest_first().into_iter().cloned().collect())
    }

    async fn page(&self, query: &CardQuery, now: Timestamp) -> Result<CardPage, StoreError> {
        let inner = self.inner.lock().await;
        let matching: Vec<&Card> = inner
            .newest_first()
            .into_iter()
            .filter(|card| matches_query(card, query, now))
            .collect();
        let total = i64::try_from(matching.len()).unwrap_or(i64::MAX);
        let offset = usize::try_from(query.offset()).unwrap_or(usize::MAX);
        let limit = usize::try_from(query.per_page).unwrap_or(0);
        let items = matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        Ok(CardPage {
            items,
            total,
            page: query.page,
            per_page: query.per_page,
        })
    }

    async fn stats(&self, now: Timestamp) -> Result<CardStats, StoreError> {
        let inner = self.inner.lock().await;
        let mut stats = CardStats::default();
        for card in inner.cards.values() {
            stats.total += 1;
            match card.status(now) {
                CardStatus::Unused => stats.unused += 1,
                CardStatus::Active => stats.active += 1,
                CardStatus::Expired => stats.expired += 1,
            }
        }
        Ok(stats)
    }

    async fn redeem(
        &self,
        key: &str,
        device: &DeviceId,
        now: Timestamp,
    ) -> Result<Option<Redemption>, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(id) = inner.ids_by_key.get(key).copied() else {
            return Ok(None);
        };
        let Some(stored) = inner.cards.get_mut(&id) else {
            return Err(StoreError::Backend(format!(
                "key index points at missing card {id}"
            )));
        };
        // Work on a copy so the stored card only changes as a whole.
        let mut card = stored.clone();
        let outcome = card.redeem(device, now);
        if outcome.mutated() {
            *stored = card.clone();
        }
        Ok(Some(Redemption { card, outcome }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
