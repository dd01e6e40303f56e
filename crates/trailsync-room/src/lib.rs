//! TrailSync — room coordination core.
//!
//! A room owns one progress aggregate, one phase timer, and a set of
//! participant actors. All participant-originated operations flow through a
//! single serialized inbox; timer ticks mutate the same state under the same
//! locks from their own task.

pub mod hiker;
pub mod registry;
pub mod room;

pub use registry::{Connection, RoomRegistry};
pub use room::{Room, RoomMessage};
