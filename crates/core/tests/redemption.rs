//! End-to-end tests for the redemption flow against the in-memory store.
//!
//! Covers the multi-device scenario, the concurrent first-use race, rate
//! limiting, the feature flag, change notifications and CSV round trips.

use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use cardgate_core::card::NewCard;
use cardgate_core::catalog::CardCatalog;
use cardgate_core::clock::{Clock, ManualClock};
use cardgate_core::error::CoreError;
use cardgate_core::notify::{CardSnapshot, ChangeNotifier, SnapshotPublisher};
use cardgate_core::rate_limiter::RateLimiter;
use cardgate_core::redemption::{RedemptionRequest, RedemptionService, Verdict};
use cardgate_core::settings::{Settings, SettingsPatch, SettingsStore};
use cardgate_core::store::{CardStore, MemoryCardStore};
use chrono::{Duration, TimeZone, Utc};

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordingNotifier {
    snapshots: Mutex<Vec<CardSnapshot>>,
}

impl RecordingNotifier {
    fn count(&self) -> usize {
        self.snapshots.lock().unwrap().len()
    }
}

impl ChangeNotifier for RecordingNotifier {
    fn notify(&self, snapshot: CardSnapshot) {
        self.snapshots.lock().unwrap().push(snapshot);
    }
}

struct Harness {
    store: Arc<MemoryCardStore>,
    clock: ManualClock,
    settings: Arc<SettingsStore>,
    notifier: Arc<RecordingNotifier>,
    service: RedemptionService,
    catalog: CardCatalog,
    _dir: tempfile::TempDir,
}

fn harness(settings: Settings) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let settings =
        Arc::new(SettingsStore::with_settings(dir.path().join("settings.json"), settings).unwrap());
    let store = Arc::new(MemoryCardStore::new());
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap());
    let notifier = Arc::new(RecordingNotifier::default());
    let limiter = Arc::new(RateLimiter::new(settings.current().rate_limit_config()).unwrap());

    let dyn_store: Arc<dyn CardStore> = store.clone();
    let dyn_clock: Arc<dyn Clock> = Arc::new(clock.clone());
    let publisher = SnapshotPublisher::new(dyn_store.clone(), dyn_clock.clone(), notifier.clone());
    let service = RedemptionService::new(
        dyn_store.clone(),
        limiter,
        dyn_clock.clone(),
        settings.clone(),
        publisher.clone(),
    );
    let catalog = CardCatalog::new(dyn_store, dyn_clock, publisher);

    Harness {
        store,
        clock,
        settings,
        notifier,
        service,
        catalog,
        _dir: dir,
    }
}

fn request(key: &str, agent: &str, address: &str) -> RedemptionRequest {
    RedemptionRequest {
        card_key: key.to_string(),
        client_signature: agent.to_string(),
        network_address: Some(address.to_string()),
    }
}

async fn issue(h: &Harness, minutes: i32, max_devices: i32) -> String {
    let card = NewCard::unused(minutes, max_devices, None, h.clock.now()).unwrap();
    h.store.insert(card).await.unwrap().key
}

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

#[tokio::test]
async fn two_device_card_lifecycle() {
    let h = harness(Settings::default());
    let key = issue(&h, 10, 2).await;

    let a = request(&key, "device-a", "10.0.0.1");
    let b = request(&key, "device-b", "10.0.0.2");
    let c = request(&key, "device-c", "10.0.0.3");

    assert_eq!(
        h.service.redeem(&a).await.unwrap(),
        Verdict::Activated {
            remaining_minutes: 10
        }
    );

    h.clock.advance(Duration::minutes(2));
    assert_eq!(
        h.service.redeem(&b).await.unwrap(),
        Verdict::Valid {
            remaining_minutes: 8
        }
    );

    h.clock.advance(Duration::minutes(1));
    assert_eq!(
        h.service.redeem(&c).await.unwrap(),
        Verdict::DeviceLimitExceeded { max_devices: 2 }
    );

    h.clock.set(Utc.with_ymd_and_hms(2024, 7, 1, 9, 11, 0).unwrap());
    let expired = h.service.redeem(&a).await.unwrap();
    assert_eq!(expired, Verdict::Expired);
    assert!(!expired.is_valid());
    assert_eq!(expired.remaining_minutes(), 0);

    let stored = h.store.find_by_key(&key).await.unwrap().unwrap();
    assert_eq!(stored.device_count(), 2);
}

#[tokio::test]
async fn unknown_key_is_not_found_and_blank_key_is_invalid() {
    let h = harness(Settings::default());
    assert_eq!(
        h.service
            .redeem(&request("does-not-exist", "ua", "1.1.1.1"))
            .await
            .unwrap(),
        Verdict::NotFound
    );
    assert_matches!(
        h.service.redeem(&request("   ", "ua", "1.1.1.1")).await,
        Err(CoreError::Validation(_))
    );
}

#[tokio::test]
async fn key_is_trimmed_before_lookup() {
    let h = harness(Settings::default());
    let key = issue(&h, 5, 1).await;
    let verdict = h
        .service
        .redeem(&request(&format!("  {key}\n"), "ua", "1.1.1.1"))
        .await
        .unwrap();
    assert!(verdict.is_valid());
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_use_binds_exactly_one_device() {
    let h = Arc::new(harness(Settings::default()));
    let key = issue(&h, 30, 1).await;

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let h = Arc::clone(&h);
            let req = request(&key, &format!("device-{i}"), &format!("10.1.0.{i}"));
            tokio::spawn(async move { h.service.redeem(&req).await.unwrap() })
        })
        .collect();

    let mut valid = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Verdict::Activated { .. } | Verdict::Valid { .. } => valid += 1,
            Verdict::DeviceLimitExceeded { max_devices: 1 } => {}
            other => panic!("unexpected verdict {other:?}"),
        }
    }
    assert_eq!(valid, 1);

    let stored = h.store.find_by_key(&key).await.unwrap().unwrap();
    assert_eq!(stored.device_count(), 1);
}

// ---------------------------------------------------------------------------
// Admission control and feature flag
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rate_limit_rejects_before_store_access() {
    let h = harness(Settings {
        rate_limit_requests: 3,
        rate_limit_window: 60,
        ..Settings::default()
    });
    let key = issue(&h, 10, 1).await;

    for _ in 0..3 {
        let verdict = h.service.redeem(&request("nope", "ua", "9.9.9.9")).await.unwrap();
        assert_eq!(verdict, Verdict::NotFound);
    }
    // The fourth request is rejected even though the key is now a real one.
    let limited = h.service.redeem(&request(&key, "ua", "9.9.9.9")).await.unwrap();
    assert_matches!(limited, Verdict::RateLimited { retry_after_secs } if retry_after_secs > 0);
    assert!(!h.store.find_by_key(&key).await.unwrap().unwrap().is_used());

    // Another address is unaffected.
    assert!(h
        .service
        .redeem(&request(&key, "ua", "9.9.9.8"))
        .await
        .unwrap()
        .is_valid());

    h.clock.advance(Duration::seconds(61));
    assert_eq!(
        h.service.redeem(&request("nope", "ua", "9.9.9.9")).await.unwrap(),
        Verdict::NotFound
    );
}

#[tokio::test]
async fn disabled_feature_rejects_everything() {
    let h = harness(Settings::default());
    let key = issue(&h, 10, 1).await;
    h.settings
        .update(SettingsPatch {
            api_enabled: Some(false),
            ..SettingsPatch::default()
        })
        .unwrap();

    assert_eq!(
        h.service.redeem(&request(&key, "ua", "1.2.3.4")).await.unwrap(),
        Verdict::FeatureDisabled
    );
    assert!(!h.store.find_by_key(&key).await.unwrap().unwrap().is_used());
}

#[tokio::test]
async fn missing_address_falls_back_to_fingerprint() {
    let h = harness(Settings::default());
    let key = issue(&h, 10, 1).await;
    let anonymous = RedemptionRequest {
        card_key: key.clone(),
        client_signature: "kiosk".into(),
        network_address: None,
    };
    assert!(h.service.redeem(&anonymous).await.unwrap().is_valid());
    assert!(h.service.redeem(&anonymous).await.unwrap().is_valid());
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[tokio::test]
async fn only_mutations_notify() {
    let h = harness(Settings::default());
    let key = issue(&h, 10, 2).await;

    h.service.redeem(&request(&key, "a", "1")).await.unwrap();
    assert_eq!(h.notifier.count(), 1);

    // Re-validation by a bound device changes nothing.
    h.service.redeem(&request(&key, "a", "1")).await.unwrap();
    assert_eq!(h.notifier.count(), 1);

    h.service.redeem(&request(&key, "b", "2")).await.unwrap();
    assert_eq!(h.notifier.count(), 2);

    // Refused device: no mutation, no notification.
    h.service.redeem(&request(&key, "c", "3")).await.unwrap();
    assert_eq!(h.notifier.count(), 2);

    let snapshots = h.notifier.snapshots.lock().unwrap();
    let last = snapshots.last().unwrap();
    assert_eq!(last.cards.len(), 1);
    assert_eq!(last.cards[0].devices.len(), 2);
}

// ---------------------------------------------------------------------------
// Export / import
// ---------------------------------------------------------------------------

#[tokio::test]
async fn export_then_import_into_empty_store_round_trips() {
    let source = harness(Settings::default());
    let key = issue(&source, 15, 2).await;
    issue(&source, 45, 1).await;
    source.service.redeem(&request(&key, "a", "1")).await.unwrap();
    let csv = source.catalog.export_csv().await.unwrap();

    let target = harness(Settings::default());
    let report = target.catalog.import_csv(csv.as_bytes()).await.unwrap();
    assert_eq!(report.imported, 2);
    assert_eq!(report.skipped, 0);
    assert!(report.rejected.is_empty());

    let mut expected: Vec<(String, i32)> = source
        .store
        .all()
        .await
        .unwrap()
        .into_iter()
        .map(|c| (c.key, c.granted_minutes))
        .collect();
    let mut actual: Vec<(String, i32)> = target
        .store
        .all()
        .await
        .unwrap()
        .into_iter()
        .map(|c| (c.key, c.granted_minutes))
        .collect();
    expected.sort();
    actual.sort();
    assert_eq!(actual, expected);

    let imported = target.store.find_by_key(&key).await.unwrap().unwrap();
    assert!(imported.is_used());
    assert_eq!(imported.device_count(), 1);
}

#[tokio::test]
async fn reimport_skips_existing_keys_without_overwriting() {
    let h = harness(Settings::default());
    let key = issue(&h, 15, 1).await;
    let csv = h.catalog.export_csv().await.unwrap();

    h.service.redeem(&request(&key, "a", "1")).await.unwrap();
    let report = h.catalog.import_csv(csv.as_bytes()).await.unwrap();
    assert_eq!(report.imported, 0);
    assert_eq!(report.skipped, 1);

    // The stored card keeps its activation rather than the exported unused state.
    assert!(h.store.find_by_key(&key).await.unwrap().unwrap().is_used());
}
