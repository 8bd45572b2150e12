pub mod cards;
pub mod health;
pub mod redeem;
pub mod settings;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /ws                                   dashboard WebSocket
///
/// /redeem                               redeem a card (POST)
/// /verify/{card_key}                    redeem a card, key in path (GET)
///
/// /admin/cards                          list, create
/// /admin/cards/bulk                     bulk create (POST)
/// /admin/cards/stats                    counts per status
/// /admin/cards/export                   CSV download
/// /admin/cards/import                   CSV upload (POST)
/// /admin/cards/{id}                     get, delete
///
/// /admin/settings                       get, update (PUT)
/// /admin/settings/reload                re-read settings file (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .merge(redeem::router())
        .nest("/admin/cards", cards::router())
        .nest("/admin/settings", settings::router())
}
