//! TrailSync Core — shared domain abstractions.
//!
//! This crate defines the wire envelopes, protocol names, configuration
//! types, and error types that all other crates depend on. It contains no
//! networking or runtime code.

pub mod clock;
pub mod config;
pub mod envelope;
pub mod error;
pub mod sink;
