//! `PostgreSQL` persistence for the territory history engine.
//!
//! This crate implements [`territory_history::HistoryStore`] on top of
//! `PostgreSQL`. Every engine operation becomes one database transaction;
//! writers on the same area are serialized by the area row's `FOR UPDATE`
//! lock, and writers on different areas proceed independently.
//!
//! # Architecture
//!
//! ```text
//! HistoryService
//!     |
//!     +-- PgStore::begin ---> PgTx (one PostgreSQL transaction)
//!         |-- area_store     (areas, layers, layer_postal_codes)
//!         |-- change_store   (append-only change_records)
//!         |-- version_store  (versions with JSONB snapshots)
//!         +-- stack_store    (undo_redo_stacks)
//! ```
//!
//! # Modules
//!
//! - [`postgres`] -- Connection pool, configuration, and migrations
//! - [`store`] -- The [`territory_history::HistoryStore`] implementation
//! - [`area_store`] -- Area and layer rows, entity mutations
//! - [`change_store`] -- Change record rows
//! - [`version_store`] -- Version rows
//! - [`stack_store`] -- Undo/redo stack rows
//! - [`error`] -- Shared error types

pub mod area_store;
pub mod change_store;
pub mod error;
pub mod postgres;
pub mod stack_store;
pub mod store;
pub mod version_store;

// Re-export primary types for convenience.
pub use error::DbError;
pub use postgres::{PostgresConfig, PostgresPool};
pub use store::{PgStore, PgTx};
