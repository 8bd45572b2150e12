//! Change-notification hook.
//!
//! After every committed mutation the core builds a [`CardSnapshot`] and hands
//! it to a [`ChangeNotifier`]. Delivery is best-effort: a notifier must not
//! block, and a failure to build the snapshot is logged and swallowed.
//!
//! Publishes are serialized, so snapshots reach the notifier in the order
//! they were taken and the last one delivered reflects the latest commit.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::card::CardSummary;
use crate::clock::Clock;
use crate::store::{CardStore, StoreError};
use crate::types::Timestamp;

/// The full card list as of `taken_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardSnapshot {
    pub taken_at: Timestamp,
    pub cards: Vec<CardSummary>,
}

/// Receives snapshots after committed mutations.
pub trait ChangeNotifier: Send + Sync {
    fn notify(&self, snapshot: CardSnapshot);
}

/// Discards every snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl ChangeNotifier for NoopNotifier {
    fn notify(&self, _snapshot: CardSnapshot) {}
}

/// Builds snapshots from the store and passes them to the notifier.
#[derive(Clone)]
pub struct SnapshotPublisher {
    store: Arc<dyn CardStore>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn ChangeNotifier>,
    /// Held across snapshot and notify.
    gate: Arc<Mutex<()>>,
}

impl SnapshotPublisher {
    pub fn new(
        store: Arc<dyn CardStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn ChangeNotifier>,
    ) -> Self {
        Self {
            store,
            clock,
            notifier,
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// The current card list, newest first.
    pub async fn snapshot(&self) -> Result<CardSnapshot, StoreError> {
        let cards = self.store.all().await?;
        let taken_at = self.clock.now();
        let cards = cards.iter().map(|card| card.summary(taken_at)).collect();
        Ok(CardSnapshot { taken_at, cards })
    }

    /// Take a snapshot and notify. Store errors are logged, never returned.
    pub async fn publish(&self) {
        let _gate = self.gate.lock().await;
        match self.snapshot().await {
            Ok(snapshot) => self.notifier.notify(snapshot),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to build card snapshot, skipping notification");
            }
        }
    }
}
