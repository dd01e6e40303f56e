//! Shared application state.

use std::sync::Arc;

use trailsync_room::RoomRegistry;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The server-wide room registry.
    pub registry: Arc<RoomRegistry>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self { registry }
    }
}
