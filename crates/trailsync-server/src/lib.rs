//! TrailSync — WebSocket server surface.
//!
//! Exposes the router, shared state, and the WebSocket bridge between
//! transport frames and the room registry.

pub mod error;
pub mod routes;
pub mod state;
pub mod ws;
