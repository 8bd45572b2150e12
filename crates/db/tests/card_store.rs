//! Integration tests for `PgCardStore` against a real database:
//! - Insert, lookup and the unique key constraint
//! - Bulk insert skip-on-conflict
//! - Row-locked redemption under concurrency
//! - Status filtering, search and stats computed in SQL
//! - CHECK constraints guarding the card invariants

use std::sync::Arc;

use assert_matches::assert_matches;
use cardgate_core::card::{CardState, CardStatus, NewCard, RedeemOutcome};
use cardgate_core::device::fingerprint;
use cardgate_core::store::{CardQuery, CardStore, StoreError};
use cardgate_core::types::Timestamp;
use cardgate_db::PgCardStore;
use chrono::{Duration, TimeZone, Utc};
use sqlx::PgPool;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn t0() -> Timestamp {
    Utc.with_ymd_and_hms(2024, 9, 1, 10, 0, 0).unwrap()
}

fn new_card(minutes: i32, max_devices: i32) -> NewCard {
    NewCard::unused(minutes, max_devices, None, t0()).unwrap()
}

// ---------------------------------------------------------------------------
// Insert / lookup
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn insert_and_find(pool: PgPool) {
    let store = PgCardStore::new(pool);
    let card = store.insert(new_card(10, 2)).await.unwrap();

    assert_eq!(store.find_by_key(&card.key).await.unwrap(), Some(card.clone()));
    assert_eq!(store.find_by_id(card.id).await.unwrap(), Some(card.clone()));
    assert_eq!(store.find_by_key("missing").await.unwrap(), None);
    assert_eq!(card.state, CardState::Unused);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn duplicate_key_is_rejected(pool: PgPool) {
    let store = PgCardStore::new(pool);
    let card = new_card(10, 1);
    store.insert(card.clone()).await.unwrap();
    assert_matches!(
        store.insert(card).await,
        Err(StoreError::DuplicateKey(prefix)) if prefix.len() == 8
    );
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn bulk_insert_skips_existing_and_repeated_keys(pool: PgPool) {
    let store = PgCardStore::new(pool);
    let existing = store.insert(new_card(5, 1)).await.unwrap();

    let mut clash = new_card(50, 1);
    clash.key = existing.key.clone();
    let fresh = new_card(7, 1);
    let report = store
        .bulk_insert(vec![fresh.clone(), clash, fresh.clone()])
        .await
        .unwrap();

    assert_eq!(report.inserted.len(), 1);
    assert_eq!(report.skipped.len(), 2);
    let kept = store.find_by_key(&existing.key).await.unwrap().unwrap();
    assert_eq!(kept.granted_minutes, 5);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn delete_reports_whether_a_row_went(pool: PgPool) {
    let store = PgCardStore::new(pool);
    let card = store.insert(new_card(10, 1)).await.unwrap();
    assert!(store.delete(card.id).await.unwrap());
    assert!(!store.delete(card.id).await.unwrap());
}

// ---------------------------------------------------------------------------
// Redemption
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn redeem_persists_device_set(pool: PgPool) {
    let store = PgCardStore::new(pool);
    let card = store.insert(new_card(10, 2)).await.unwrap();
    let a = fingerprint("a", "10.0.0.1");
    let b = fingerprint("b", "10.0.0.2");

    let first = store.redeem(&card.key, &a, t0()).await.unwrap().unwrap();
    assert_eq!(first.outcome, RedeemOutcome::Activated { remaining_minutes: 10 });

    let second = store
        .redeem(&card.key, &b, t0() + Duration::minutes(2))
        .await
        .unwrap()
        .unwrap();
    assert_matches!(second.outcome, RedeemOutcome::Valid { remaining_minutes: 8, newly_bound: true });

    let stored = store.find_by_key(&card.key).await.unwrap().unwrap();
    assert_eq!(stored.first_used_at(), Some(t0()));
    assert!(stored.is_bound_to(&a) && stored.is_bound_to(&b));

    assert!(store.redeem("missing", &a, t0()).await.unwrap().is_none());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn concurrent_first_use_binds_one_device(pool: PgPool) {
    let store = Arc::new(PgCardStore::new(pool));
    let card = store.insert(new_card(30, 1)).await.unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            let key = card.key.clone();
            tokio::spawn(async move {
                let device = fingerprint(&format!("device-{i}"), "10.0.0.1");
                store.redeem(&key, &device, t0()).await.unwrap().unwrap().outcome
            })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        if matches!(handle.await.unwrap(), RedeemOutcome::Activated { .. }) {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    let stored = store.find_by_key(&card.key).await.unwrap().unwrap();
    assert_eq!(stored.device_count(), 1);
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn page_and_stats_use_derived_status(pool: PgPool) {
    let store = PgCardStore::new(pool);
    let mut tagged = new_card(10, 1);
    tagged.remark = Some("50% promo".into());
    let active = store.insert(tagged).await.unwrap();
    let expired = store.insert(new_card(1, 1)).await.unwrap();
    store.insert(new_card(30, 1)).await.unwrap();

    let device = fingerprint("ua", "ip");
    store.redeem(&active.key, &device, t0()).await.unwrap();
    store.redeem(&expired.key, &device, t0()).await.unwrap();
    let now = t0() + Duration::minutes(5);

    let page = store
        .page(&CardQuery::new(1, 10).with_status(Some(CardStatus::Expired)), now)
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].id, expired.id);

    let page = store
        .page(&CardQuery::new(1, 10).with_search(Some("50%")), now)
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].id, active.id);

    let stats = store.stats(now).await.unwrap();
    assert_eq!((stats.total, stats.unused, stats.active, stats.expired), (3, 1, 1, 1));

    let paged = store.page(&CardQuery::new(2, 2), now).await.unwrap();
    assert_eq!(paged.total, 3);
    assert_eq!(paged.items.len(), 1);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn check_constraints_reject_inconsistent_rows(pool: PgPool) {
    let result = sqlx::query(
        "INSERT INTO cards (card_key, granted_minutes, max_devices, is_used, devices) \
         VALUES ('bad', 10, 1, TRUE, '{}')",
    )
    .execute(&pool)
    .await;
    assert!(result.is_err());

    let result = sqlx::query(
        "INSERT INTO cards (card_key, granted_minutes, max_devices, is_used, first_used_at, devices) \
         VALUES ('crowded', 10, 1, TRUE, NOW(), ARRAY['a', 'b'])",
    )
    .execute(&pool)
    .await;
    assert!(result.is_err());
}
