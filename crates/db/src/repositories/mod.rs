//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async query methods
//! that take a Postgres executor (pool or open transaction) as the first
//! argument.

pub mod card_repo;

pub use card_repo::CardRepo;
