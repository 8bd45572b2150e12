//! Shared response envelope for admin handlers.
//!
//! Admin responses use a `{ "data": ... }` envelope. The redemption
//! endpoints answer with their own flat body (see `handlers::redeem`).

use serde::Serialize;

/// Standard `{ "data": T }` response envelope.
///
/// ```ignore
/// Ok(Json(DataResponse { data: listing }))
/// ```
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}
