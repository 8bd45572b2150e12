use axum::routing::{get, post};
use axum::Router;

use crate::handlers::settings;
use crate::state::AppState;

/// Routes mounted at `/admin/settings`.
///
/// ```text
/// GET    /          -> get_settings
/// PUT    /          -> update_settings
/// POST   /reload    -> reload_settings
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(settings::get_settings).put(settings::update_settings))
        .route("/reload", post(settings::reload_settings))
}
