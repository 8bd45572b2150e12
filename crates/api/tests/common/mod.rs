#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use cardgate_api::config::ServerConfig;
use cardgate_api::router::build_app_router;
use cardgate_api::state::AppState;
use cardgate_api::ws::WsManager;
use cardgate_core::clock::ManualClock;
use cardgate_core::settings::{Settings, SettingsStore};
use cardgate_core::store::{CardStore, MemoryCardStore};
use cardgate_core::types::Timestamp;
use cardgate_events::EventBus;
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

/// Build a test `ServerConfig` with safe defaults.
///
/// `X-Forwarded-For` is trusted so tests can choose the client address per
/// request; `oneshot` requests carry no connect info.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        database_url: String::new(),
        settings_path: PathBuf::from("settings.json"),
        limiter_sweep_interval_secs: 60,
        trust_forwarded_for: true,
    }
}

/// 2024-07-01 09:00 UTC, where every test clock starts.
pub fn start_time() -> Timestamp {
    Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap()
}

/// A fully wired application over the in-memory store.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub clock: Arc<ManualClock>,
    pub event_bus: Arc<EventBus>,
    _settings_dir: TempDir,
}

impl TestApp {
    /// A fresh handle to the router for one `oneshot` call.
    pub fn app(&self) -> Router {
        self.router.clone()
    }
}

pub fn build_test_app() -> TestApp {
    build_test_app_with(Settings::default(), test_config())
}

/// Build the full application router with all middleware layers.
///
/// Uses the same [`build_app_router`] as `main.rs`, with the settings file
/// in a temporary directory.
pub fn build_test_app_with(settings: Settings, config: ServerConfig) -> TestApp {
    build_test_app_over(Arc::new(MemoryCardStore::new()), settings, config)
}

/// Like [`build_test_app_with`], over a caller-supplied store.
pub fn build_test_app_over(
    store: Arc<dyn CardStore>,
    settings: Settings,
    mut config: ServerConfig,
) -> TestApp {
    let settings_dir = tempfile::tempdir().unwrap();
    config.settings_path = settings_dir.path().join("settings.json");

    let clock = Arc::new(ManualClock::new(start_time()));
    let settings = Arc::new(SettingsStore::with_settings(&config.settings_path, settings).unwrap());
    let event_bus = Arc::new(EventBus::default());

    let state = AppState::new(
        config.clone(),
        store,
        clock.clone(),
        settings,
        Arc::clone(&event_bus),
        Arc::new(WsManager::new()),
    )
    .unwrap();

    let router = build_app_router(state.clone(), &config).unwrap();

    TestApp {
        router,
        state,
        clock,
        event_bus,
        _settings_dir: settings_dir,
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn send(app: Router, request: Request<Body>) -> Response<Body> {
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(app, request).await
}

pub async fn delete(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    send_json(app, Method::POST, uri, body).await
}

pub async fn put_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    send_json(app, Method::PUT, uri, body).await
}

async fn send_json(
    app: Router,
    method: Method,
    uri: &str,
    body: serde_json::Value,
) -> Response<Body> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}
