//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is shared via `Arc<EventBus>`: the core publishes through
//! its [`ChangeNotifier`] impl and the API's dashboard relay subscribes.

use cardgate_core::notify::{CardSnapshot, ChangeNotifier};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// CardEvent
// ---------------------------------------------------------------------------

/// An event about the card collection.
///
/// Serializes as `{"type": "<event type>", "data": ...}`, which is also the
/// WebSocket frame format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CardEvent {
    /// A card was created, redeemed, imported or deleted.
    #[serde(rename = "cards.changed")]
    CardsChanged(CardSnapshot),
}

impl CardEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            CardEvent::CardsChanged(_) => "cards.changed",
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`CardEvent`].
///
/// ```rust
/// use cardgate_events::bus::{CardEvent, EventBus};
/// use cardgate_core::notify::CardSnapshot;
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(CardEvent::CardsChanged(CardSnapshot {
///     taken_at: chrono::Utc::now(),
///     cards: Vec::new(),
/// }));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<CardEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// With no active subscribers the event is silently dropped.
    pub fn publish(&self, event: CardEvent) {
        // A SendError only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CardEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ChangeNotifier for EventBus {
    fn notify(&self, snapshot: CardSnapshot) {
        tracing::debug!(
            cards = snapshot.cards.len(),
            subscribers = self.subscriber_count(),
            "Publishing card snapshot"
        );
        self.publish(CardEvent::CardsChanged(snapshot));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn snapshot() -> CardSnapshot {
        CardSnapshot {
            taken_at: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            cards: Vec::new(),
        }
    }

    #[tokio::test]
    async fn notify_reaches_every_subscriber() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.notify(snapshot());

        let e1 = rx1.recv().await.expect("subscriber 1 should receive");
        let e2 = rx2.recv().await.expect("subscriber 2 should receive");
        assert_eq!(e1, CardEvent::CardsChanged(snapshot()));
        assert_eq!(e1, e2);
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.notify(snapshot());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn serializes_as_typed_envelope() {
        let json = serde_json::to_value(CardEvent::CardsChanged(snapshot())).unwrap();
        assert_eq!(json["type"], "cards.changed");
        assert_eq!(json["data"]["cards"], serde_json::json!([]));
        assert_eq!(json["data"]["taken_at"], "2024-01-02T03:04:05Z");
        assert_eq!(CardEvent::CardsChanged(snapshot()).event_type(), "cards.changed");
    }

    #[tokio::test]
    async fn lagging_receiver_reports_lag() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for _ in 0..4 {
            bus.notify(snapshot());
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(2))
        ));
    }
}
