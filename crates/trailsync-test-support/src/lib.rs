//! Shared test mocks and utilities for the TrailSync server.

mod clock;
mod sink;

pub use clock::FixedClock;
pub use sink::{CollectingSink, StalledSink};
