//! Client identity extractor for redemption handlers.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::header::USER_AGENT;
use axum::http::request::Parts;

use crate::state::AppState;

const FORWARDED_FOR: &str = "x-forwarded-for";

/// The ambient identity a client presents with each request.
///
/// `signature` is the `User-Agent` header (empty when absent). `address` is
/// the peer address from [`ConnectInfo`], overridden by the first
/// `X-Forwarded-For` entry when `TRUST_FORWARDED_FOR` is enabled. Requests
/// served without connect info and without a trusted header have no address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMeta {
    pub signature: String,
    pub address: Option<String>,
}

impl FromRequestParts<AppState> for ClientMeta {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let signature = parts
            .headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let forwarded = if state.config.trust_forwarded_for {
            forwarded_for(parts)
        } else {
            None
        };
        let address = forwarded.or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        });

        Ok(ClientMeta { signature, address })
    }
}

fn forwarded_for(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
