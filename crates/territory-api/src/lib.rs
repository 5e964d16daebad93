//! HTTP API for the territory history engine.
//!
//! This crate provides an Axum HTTP server exposing change recording,
//! history queries, undo/redo, and version management for areas. Every
//! response uses one envelope:
//!
//! - success: `{"success": true, "data": ...}`
//! - failure: `{"success": false, "error": {"kind": ..., "message": ...}}`
//!
//! # Architecture
//!
//! Handlers are generic over the [`HistoryStore`](territory_history::HistoryStore)
//! so the same router runs against `PostgreSQL` in production and the
//! in-memory store in tests. Each request is one call into the
//! [`HistoryService`](territory_history::HistoryService), which is one
//! store transaction.

pub mod error;
pub mod extract;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;

// Re-export primary types for convenience.
pub use error::ApiError;
pub use router::build_router;
pub use server::{ServerConfig, ServerError, start_server};
pub use state::AppState;
