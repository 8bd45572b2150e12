//! WebSocket infrastructure for the live card dashboard.
//!
//! Provides connection management, heartbeat pings, and the HTTP upgrade
//! handler mounted at `/api/v1/ws`.

mod handler;
mod heartbeat;
pub mod manager;

pub use handler::{send_initial_snapshot, ws_handler};
pub use heartbeat::start_heartbeat;
pub use manager::WsManager;
