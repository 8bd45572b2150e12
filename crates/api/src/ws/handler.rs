use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use cardgate_core::notify::SnapshotPublisher;
use cardgate_events::CardEvent;
use futures::{SinkExt, StreamExt};

use crate::state::AppState;
use crate::ws::WsManager;

/// HTTP handler that upgrades the connection to WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Manage a single dashboard connection after upgrade.
///
/// Registers the connection, sends the current card snapshot so the
/// dashboard can render before the next change, then forwards relayed
/// events until the client goes away. Inbound frames other than Close are
/// ignored.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let ws_manager = state.ws_manager;
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, "WebSocket connected");

    let mut rx = ws_manager.add(conn_id.clone()).await;

    send_initial_snapshot(&ws_manager, &conn_id, &state.publisher).await;

    let (mut sink, mut stream) = socket.split();

    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                break;
            }
        }
    });

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(conn_id = %conn_id, "Pong received");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    ws_manager.remove(&conn_id).await;
    send_task.abort();
    tracing::info!(conn_id = %conn_id, "WebSocket disconnected");
}

/// Queue one `cards.changed` frame with the current card list for `conn_id`.
///
/// Returns `false` if no frame was queued.
pub async fn send_initial_snapshot(
    ws_manager: &WsManager,
    conn_id: &str,
    publisher: &SnapshotPublisher,
) -> bool {
    let snapshot = match publisher.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::warn!(conn_id = %conn_id, error = %e, "Failed to load initial snapshot");
            return false;
        }
    };
    match serde_json::to_string(&CardEvent::CardsChanged(snapshot)) {
        Ok(text) => ws_manager.send_to(conn_id, Message::Text(text.into())).await,
        Err(e) => {
            tracing::warn!(conn_id = %conn_id, error = %e, "Failed to encode snapshot");
            false
        }
    }
}
