//! Axum router construction for the history API.
//!
//! Assembles all routes into a single [`Router`] with CORS and request
//! tracing middleware.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use territory_history::HistoryStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Build the complete Axum router.
///
/// See the [`handlers`] module for the endpoint table. CORS allows any
/// origin so the map editor can be served from a different host during
/// development.
pub fn build_router<S: HistoryStore + 'static>(state: Arc<AppState<S>>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        // Areas
        .route("/api/areas", post(handlers::create_area::<S>))
        .route(
            "/api/areas/{area_id}",
            get(handlers::get_area::<S>).delete(handlers::delete_area::<S>),
        )
        // Change log
        .route(
            "/api/areas/{area_id}/changes",
            post(handlers::record_change::<S>),
        )
        .route(
            "/api/areas/{area_id}/changes/apply",
            post(handlers::apply_change::<S>),
        )
        .route("/api/areas/{area_id}/history", get(handlers::history::<S>))
        // Undo / redo
        .route("/api/areas/{area_id}/undo", post(handlers::undo::<S>))
        .route("/api/areas/{area_id}/redo", post(handlers::redo::<S>))
        .route(
            "/api/areas/{area_id}/undo-redo",
            get(handlers::undo_redo_status::<S>),
        )
        .route(
            "/api/areas/{area_id}/undo-redo/verify",
            get(handlers::verify_stack::<S>),
        )
        // Versions
        .route(
            "/api/areas/{area_id}/versions",
            get(handlers::list_versions::<S>).post(handlers::create_version::<S>),
        )
        .route(
            "/api/areas/{area_id}/versions/compare",
            get(handlers::compare_versions::<S>),
        )
        .route(
            "/api/areas/{area_id}/versions/{version_number}",
            get(handlers::get_version::<S>).delete(handlers::delete_version::<S>),
        )
        .route(
            "/api/areas/{area_id}/versions/{version_number}/restore",
            post(handlers::restore_version::<S>),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
