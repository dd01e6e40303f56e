//! WebSocket entry point for group sessions.

use axum::Router;
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::any;

use crate::state::AppState;
use crate::ws;

/// GET /groupsession — upgrades to the group-session WebSocket.
async fn group_session(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| ws::handle_socket(socket, state.registry))
}

/// Returns the group-session router.
pub fn router() -> Router<AppState> {
    Router::new().route("/groupsession", any(group_session))
}
