//! Handlers for `/admin/settings`.
//!
//! The settings file is touched on a blocking thread. Every successful update
//! or reload hands the new limits to the rate limiter while the settings are
//! still locked, so the two never disagree.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use cardgate_core::error::CoreError;
use cardgate_core::rate_limiter::RateLimiter;
use cardgate_core::settings::{Settings, SettingsError, SettingsPatch, SettingsStore};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/admin/settings
pub async fn get_settings(State(state): State<AppState>) -> Json<DataResponse<Settings>> {
    Json(DataResponse {
        data: state.settings.current(),
    })
}

/// PUT /api/v1/admin/settings
pub async fn update_settings(
    State(state): State<AppState>,
    Json(patch): Json<SettingsPatch>,
) -> AppResult<Json<DataResponse<Settings>>> {
    let limiter = Arc::clone(&state.limiter);
    let settings = on_settings_file(&state, move |store| {
        store.update_then(patch, |settings| apply_limits(&limiter, settings))
    })
    .await?;
    Ok(Json(DataResponse { data: settings }))
}

/// POST /api/v1/admin/settings/reload
pub async fn reload_settings(
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<Settings>>> {
    let limiter = Arc::clone(&state.limiter);
    let settings = on_settings_file(&state, move |store| {
        store.reload_then(|settings| apply_limits(&limiter, settings))
    })
    .await?;
    Ok(Json(DataResponse { data: settings }))
}

async fn on_settings_file<F>(state: &AppState, op: F) -> AppResult<Settings>
where
    F: FnOnce(&SettingsStore) -> Result<Settings, SettingsError> + Send + 'static,
{
    let store = Arc::clone(&state.settings);
    let result = tokio::task::spawn_blocking(move || op(&store))
        .await
        .map_err(|e| AppError::InternalError(format!("Settings task failed: {e}")))?;
    result.map_err(|e| AppError::Core(CoreError::from(e)))
}

/// Settings are validated before this runs, so a rejected config means the
/// two validators drifted apart.
fn apply_limits(limiter: &RateLimiter, settings: &Settings) {
    if let Err(e) = limiter.reconfigure(settings.rate_limit_config()) {
        tracing::error!(error = %e, "Validated settings rejected by rate limiter");
    }
}
