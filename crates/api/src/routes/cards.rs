//! Route definitions for the `/admin/cards` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{cards, transfer};
use crate::state::AppState;

/// Routes mounted at `/admin/cards`.
///
/// ```text
/// GET    /              -> list_cards
/// POST   /              -> create_card
/// POST   /bulk          -> bulk_create_cards
/// GET    /stats         -> card_stats
/// GET    /export        -> export_cards
/// POST   /import        -> import_cards
/// GET    /{id}          -> get_card
/// DELETE /{id}          -> delete_card
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(cards::list_cards).post(cards::create_card))
        .route("/bulk", post(cards::bulk_create_cards))
        .route("/stats", get(cards::card_stats))
        .route("/export", get(transfer::export_cards))
        .route("/import", post(transfer::import_cards))
        .route("/{id}", get(cards::get_card).delete(cards::delete_card))
}
