use std::sync::Arc;

use cardgate_core::catalog::CardCatalog;
use cardgate_core::clock::Clock;
use cardgate_core::notify::SnapshotPublisher;
use cardgate_core::rate_limiter::{RateLimiter, RateLimiterError};
use cardgate_core::redemption::RedemptionService;
use cardgate_core::settings::SettingsStore;
use cardgate_core::store::CardStore;
use cardgate_events::EventBus;

use crate::config::ServerConfig;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (everything is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Card persistence, also used by the health check.
    pub store: Arc<dyn CardStore>,
    pub redemption: Arc<RedemptionService>,
    pub catalog: Arc<CardCatalog>,
    /// Runtime settings; admin updates also reconfigure `limiter`.
    pub settings: Arc<SettingsStore>,
    pub limiter: Arc<RateLimiter>,
    pub clock: Arc<dyn Clock>,
    /// Snapshot source for newly connected dashboards.
    pub publisher: SnapshotPublisher,
    /// WebSocket connection manager (dashboard clients).
    pub ws_manager: Arc<WsManager>,
    /// Card change events; the dashboard relay subscribes to it.
    pub event_bus: Arc<EventBus>,
}

impl AppState {
    /// Wire the core services together.
    ///
    /// The rate limiter starts from the current settings and snapshots are
    /// published on `event_bus`.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn CardStore>,
        clock: Arc<dyn Clock>,
        settings: Arc<SettingsStore>,
        event_bus: Arc<EventBus>,
        ws_manager: Arc<WsManager>,
    ) -> Result<Self, RateLimiterError> {
        let limiter = Arc::new(RateLimiter::new(settings.current().rate_limit_config())?);
        let publisher = SnapshotPublisher::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            event_bus.clone(),
        );
        let redemption = Arc::new(RedemptionService::new(
            Arc::clone(&store),
            Arc::clone(&limiter),
            Arc::clone(&clock),
            Arc::clone(&settings),
            publisher.clone(),
        ));
        let catalog = Arc::new(CardCatalog::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            publisher.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            store,
            redemption,
            catalog,
            settings,
            limiter,
            clock,
            publisher,
            ws_manager,
            event_bus,
        })
    }
}
