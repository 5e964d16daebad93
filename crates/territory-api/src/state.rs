//! Shared application state for the history API.

use territory_history::{HistoryService, HistoryStore};

/// State shared by all handlers.
///
/// Generic over the store so the same router serves the `PostgreSQL`
/// backend in production and the in-memory backend in tests.
#[derive(Debug)]
pub struct AppState<S> {
    /// The history engine.
    pub service: HistoryService<S>,
}

impl<S: HistoryStore> AppState<S> {
    /// Wrap a store in a service.
    pub const fn new(store: S) -> Self {
        Self {
            service: HistoryService::new(store),
        }
    }
}
