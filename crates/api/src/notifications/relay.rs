use std::sync::Arc;

use axum::extract::ws::Message;
use cardgate_events::CardEvent;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::ws::WsManager;

/// Forwards card events to every dashboard connection as JSON text frames.
pub struct DashboardRelay {
    ws_manager: Arc<WsManager>,
}

impl DashboardRelay {
    pub fn new(ws_manager: Arc<WsManager>) -> Self {
        Self { ws_manager }
    }

    /// Run the relay loop until `cancel` fires or the
    /// [`EventBus`](cardgate_events::EventBus) is dropped.
    pub async fn run(
        self,
        mut receiver: broadcast::Receiver<CardEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Dashboard relay stopping");
                    break;
                }
                received = receiver.recv() => received,
            };
            match received {
                Ok(event) => self.relay(&event).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Dashboard relay lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, dashboard relay shutting down");
                    break;
                }
            }
        }
    }

    async fn relay(&self, event: &CardEvent) {
        let text = match serde_json::to_string(event) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    event_type = event.event_type(),
                    "Failed to encode event"
                );
                return;
            }
        };
        let count = self.ws_manager.connection_count().await;
        tracing::debug!(event_type = event.event_type(), count, "Relaying event to dashboards");
        self.ws_manager.broadcast(Message::Text(text.into())).await;
    }
}
