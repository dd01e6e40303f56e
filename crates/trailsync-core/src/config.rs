//! Externally-settable configuration for the timer and the session.
//!
//! `updateConfig` carries partial updates: every field is optional, and
//! unrecognized fields in the wire payload are ignored rather than rejected.

use serde::{Deserialize, Serialize};

/// Partial update of the phase timer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerConfigUpdate {
    /// Focus phase duration in seconds.
    pub focus_time: Option<u16>,
    /// Short break duration in seconds.
    pub short_break_time: Option<u16>,
    /// Long break duration in seconds.
    pub long_break_time: Option<u16>,
    /// Number of focus sets before the session completes.
    pub sets: Option<u8>,
    /// Pace in distance units per hour; controls the tick cadence.
    pub pace: Option<f64>,
    /// Whether to continue into a new set automatically after the last one.
    pub auto_continue: Option<bool>,
}

/// Partial update of the session configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfigUpdate {
    /// Display name for the session.
    pub name: Option<String>,
}
