//! Route definitions for client redemption.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::redeem;
use crate::state::AppState;

/// Routes merged at the `/api/v1` root.
///
/// ```text
/// POST   /redeem               -> redeem
/// GET    /verify/{card_key}    -> verify
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/redeem", post(redeem::redeem))
        .route("/verify/{card_key}", get(redeem::verify))
}

/// Unversioned alias kept for clients built against the old path. Merged at
/// the server root.
///
/// ```text
/// GET    /api/verify_card/{card_key}    -> verify
/// ```
pub fn legacy_router() -> Router<AppState> {
    Router::new().route("/api/verify_card/{card_key}", get(redeem::verify))
}
