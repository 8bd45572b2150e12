use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use cardgate_core::clock::{Clock, SystemClock};
use cardgate_core::settings::SettingsStore;
use cardgate_core::store::CardStore;
use cardgate_db::PgCardStore;
use cardgate_events::EventBus;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cardgate_api::background::limiter_sweep;
use cardgate_api::config::ServerConfig;
use cardgate_api::notifications::DashboardRelay;
use cardgate_api::router::build_app_router;
use cardgate_api::state::AppState;
use cardgate_api::ws;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cardgate_api=debug,cardgate_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env().context("Invalid server configuration")?;
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    let pool = cardgate_db::create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    cardgate_db::health_check(&pool)
        .await
        .context("Database health check failed")?;

    cardgate_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    let settings = Arc::new(
        SettingsStore::load(&config.settings_path).context("Failed to load settings")?,
    );
    tracing::info!(path = %config.settings_path.display(), "Settings loaded");

    let store: Arc<dyn CardStore> = Arc::new(PgCardStore::new(pool));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let event_bus = Arc::new(EventBus::default());
    let ws_manager = Arc::new(ws::WsManager::new());

    let state = AppState::new(
        config.clone(),
        store,
        Arc::clone(&clock),
        settings,
        Arc::clone(&event_bus),
        Arc::clone(&ws_manager),
    )
    .context("Invalid rate limit settings")?;

    let cancel = CancellationToken::new();

    let heartbeat_handle = ws::start_heartbeat(Arc::clone(&ws_manager), cancel.clone());

    let relay_handle = tokio::spawn(
        DashboardRelay::new(Arc::clone(&ws_manager)).run(event_bus.subscribe(), cancel.clone()),
    );

    let sweep_handle = tokio::spawn(limiter_sweep::run(
        Arc::clone(&state.limiter),
        clock,
        Duration::from_secs(config.limiter_sweep_interval_secs),
        cancel.clone(),
    ));
    tracing::info!("Background services started (dashboard relay, limiter sweep, heartbeat)");

    let app = build_app_router(state, &config).context("Failed to build router")?;

    let host: IpAddr = config.host.parse().context("Invalid HOST address")?;
    let addr = SocketAddr::new(host, config.port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    tracing::info!("Server stopped accepting connections, cleaning up");

    cancel.cancel();
    let stop_timeout = Duration::from_secs(config.shutdown_timeout_secs);
    let stopped = tokio::time::timeout(stop_timeout, async {
        let _ = tokio::join!(sweep_handle, heartbeat_handle, relay_handle);
    })
    .await;
    match stopped {
        Ok(()) => tracing::info!("Background services stopped"),
        Err(_) => tracing::warn!(
            timeout_secs = config.shutdown_timeout_secs,
            "Background services did not stop in time"
        ),
    }

    let ws_count = ws_manager.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    ws_manager.shutdown_all().await;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Resolve on SIGINT (Ctrl-C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
