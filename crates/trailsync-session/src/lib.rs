//! TrailSync — Session & Progress aggregate.
//!
//! The shared distance/level/strike/token state for one room, plus the
//! static trail event catalog.

pub mod events;
pub mod session;

pub use session::Session;
