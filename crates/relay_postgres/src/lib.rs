//! Postgres implementations of the relay_core port traits.
//!
//! Each adapter is a newtype wrapping PgPool. All SQL is runtime-checked
//! (sqlx::query, not sqlx::query!) to avoid a compile-time DB requirement.
//! Schema lives in `migrations/0001_init.sql`.

mod rows;
mod store;

pub use store::{PgDeliveryStore, PgLedgerStore, PgStores, PgTimerStore, PgVectorIndexStore};
