//! Query parameter types for API handlers.

use serde::Deserialize;

/// `GET /admin/cards?status=&q=&page=&per_page=`.
///
/// Missing `per_page` falls back to the `per_page` runtime setting. Values
/// are clamped by `CardQuery::new`.
#[derive(Debug, Default, Deserialize)]
pub struct CardListParams {
    pub status: Option<String>,
    pub q: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}
