//! CSV export and import of the card collection.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::IntoResponse;
use axum::Json;
use cardgate_core::transfer::ImportReport;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/admin/cards/export
///
/// Every card as a `text/csv` attachment named after the export date.
pub async fn export_cards(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let csv = state.catalog.export_csv().await?;
    let filename = format!("cards-{}.csv", state.clock.now().format("%Y%m%d"));
    Ok((
        [
            (CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        csv,
    ))
}

/// POST /api/v1/admin/cards/import
///
/// The request body is the CSV document. Existing keys are skipped and
/// invalid rows reported with their line numbers.
pub async fn import_cards(
    State(state): State<AppState>,
    body: Bytes,
) -> AppResult<Json<DataResponse<ImportReport>>> {
    if body.is_empty() {
        return Err(AppError::BadRequest("Import body is empty".into()));
    }
    let report = state.catalog.import_csv(&body).await?;
    Ok(Json(DataResponse { data: report }))
}
