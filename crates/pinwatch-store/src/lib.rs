//! # pinwatch-store
//!
//! SQLite persistence for per-server check status.
//!
//! One row per `(entity_id, base_uri)`. A row with a NULL `last_checked`
//! has never been checked. The scheduler writes through the
//! [`SelectionStore`](pinwatch_core::SelectionStore) contract; reporting
//! reads through [`SqliteStore::all_statuses`] and [`SqliteStore::summary`].

mod schema;
mod store;

pub use store::SqliteStore;
