//! Handlers for the client-facing redemption endpoints.
//!
//! Unlike the admin API these answer with a flat
//! `{ valid, remaining_minutes, message }` body on every outcome, including
//! errors, because client applications parse nothing else.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use cardgate_core::error::CoreError;
use cardgate_core::redemption::{RedemptionRequest, Verdict};
use serde::{Deserialize, Serialize};

use crate::middleware::client::ClientMeta;
use crate::state::AppState;

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Request body for `POST /redeem`.
#[derive(Debug, Deserialize)]
pub struct RedeemBody {
    pub card_key: String,
}

/// Response body for every redemption outcome.
#[derive(Debug, Serialize)]
pub struct RedeemResponse {
    pub valid: bool,
    pub remaining_minutes: i64,
    pub message: String,
}

impl RedeemResponse {
    fn rejected(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            remaining_minutes: 0,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/redeem
pub async fn redeem(
    State(state): State<AppState>,
    client: ClientMeta,
    body: Result<Json<RedeemBody>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(body)) => evaluate(&state, client, body.card_key).await,
        Err(rejection) => (
            StatusCode::BAD_REQUEST,
            Json(RedeemResponse::rejected(rejection.body_text())),
        )
            .into_response(),
    }
}

/// GET /api/v1/verify/{card_key} and GET /api/verify_card/{card_key}
pub async fn verify(
    State(state): State<AppState>,
    client: ClientMeta,
    Path(card_key): Path<String>,
) -> Response {
    evaluate(&state, client, card_key).await
}

async fn evaluate(state: &AppState, client: ClientMeta, card_key: String) -> Response {
    let request = RedemptionRequest {
        card_key,
        client_signature: client.signature,
        network_address: client.address,
    };
    match state.redemption.redeem(&request).await {
        Ok(verdict) => verdict_response(&verdict),
        Err(CoreError::Validation(msg)) => {
            (StatusCode::BAD_REQUEST, Json(RedeemResponse::rejected(msg))).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Redemption failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RedeemResponse::rejected(INTERNAL_ERROR_MESSAGE)),
            )
                .into_response()
        }
    }
}

/// Map a verdict to its status code and body. Expired cards are an ordinary
/// evaluation and answer 200 with `valid: false`.
fn verdict_response(verdict: &Verdict) -> Response {
    let status = match verdict {
        Verdict::Activated { .. } | Verdict::Valid { .. } | Verdict::Expired => StatusCode::OK,
        Verdict::DeviceLimitExceeded { .. } | Verdict::FeatureDisabled => StatusCode::FORBIDDEN,
        Verdict::NotFound => StatusCode::NOT_FOUND,
        Verdict::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
    };
    let body = Json(RedeemResponse {
        valid: verdict.is_valid(),
        remaining_minutes: verdict.remaining_minutes(),
        message: verdict.message().to_string(),
    });

    let mut response = (status, body).into_response();
    if let Verdict::RateLimited { retry_after_secs } = verdict {
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(*retry_after_secs));
    }
    response
}
