//! Row models and write DTOs.
//!
//! Rows derive `FromRow` and convert into domain types with `TryFrom`, so
//! a row that violates a domain invariant surfaces as an error instead of a
//! silently inconsistent value.

pub mod card;
