pub mod card;
pub mod catalog;
pub mod clock;
pub mod device;
pub mod error;
pub mod notify;
pub mod rate_limiter;
pub mod redemption;
pub mod settings;
pub mod store;
pub mod transfer;
pub mod types;
