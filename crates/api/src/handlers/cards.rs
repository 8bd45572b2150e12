//! Handlers for the `/admin/cards` resource.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use cardgate_core::card::{CardStatus, CardSummary};
use cardgate_core::catalog::{BulkCreateCards, BulkCreated, CardListing, CreateCard};
use cardgate_core::store::{CardQuery, CardStats};
use cardgate_core::types::DbId;

use crate::error::AppResult;
use crate::query::CardListParams;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/admin/cards
///
/// Newest first. `per_page` defaults to the runtime setting.
pub async fn list_cards(
    State(state): State<AppState>,
    Query(params): Query<CardListParams>,
) -> AppResult<Json<DataResponse<CardListing>>> {
    let status = params
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(CardStatus::parse)
        .transpose()?;
    let per_page = params
        .per_page
        .unwrap_or_else(|| i64::from(state.settings.current().per_page));
    let query = CardQuery::new(params.page.unwrap_or(1), per_page)
        .with_status(status)
        .with_search(params.q.as_deref());

    let listing = state.catalog.list(&query).await?;
    Ok(Json(DataResponse { data: listing }))
}

/// POST /api/v1/admin/cards
pub async fn create_card(
    State(state): State<AppState>,
    Json(input): Json<CreateCard>,
) -> AppResult<(StatusCode, Json<DataResponse<CardSummary>>)> {
    let card = state.catalog.create(input).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: card })))
}

/// POST /api/v1/admin/cards/bulk
pub async fn bulk_create_cards(
    State(state): State<AppState>,
    Json(input): Json<BulkCreateCards>,
) -> AppResult<(StatusCode, Json<DataResponse<BulkCreated>>)> {
    let created = state.catalog.bulk_create(input).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: created })))
}

/// GET /api/v1/admin/cards/{id}
pub async fn get_card(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<CardSummary>>> {
    let card = state.catalog.get(id).await?;
    Ok(Json(DataResponse { data: card }))
}

/// DELETE /api/v1/admin/cards/{id}
pub async fn delete_card(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<StatusCode> {
    state.catalog.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/admin/cards/stats
pub async fn card_stats(State(state): State<AppState>) -> AppResult<Json<DataResponse<CardStats>>> {
    let stats = state.catalog.stats().await?;
    Ok(Json(DataResponse { data: stats }))
}
