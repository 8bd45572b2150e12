//! Cardgate event bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`. It is the [`ChangeNotifier`] handed to the
//!   core, so every committed card mutation becomes a [`CardEvent`].
//! - [`CardEvent`]: the wire-ready event envelope.
//!
//! [`ChangeNotifier`]: cardgate_core::notify::ChangeNotifier

pub mod bus;

pub use bus::{CardEvent, EventBus};
