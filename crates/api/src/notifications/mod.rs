//! Live dashboard notifications.
//!
//! The [`DashboardRelay`] subscribes to the event bus and pushes every card
//! event to connected WebSocket clients.

pub mod relay;

pub use relay::DashboardRelay;
