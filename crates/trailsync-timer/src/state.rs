//! Phase timer state and configuration.

use std::time::Duration;

use chrono::{DateTime, Utc};
use trailsync_core::config::TimerConfigUpdate;
use trailsync_core::envelope::{Phase, TimerSnapshot};

/// Default focus phase duration in seconds.
pub const DEFAULT_FOCUS_SECS: u16 = 1500;
/// Default short break duration in seconds.
pub const DEFAULT_SHORT_BREAK_SECS: u16 = 300;
/// Default long break duration in seconds.
pub const DEFAULT_LONG_BREAK_SECS: u16 = 900;
/// Default number of sets per session.
pub const DEFAULT_SETS: u8 = 3;
/// Default pace in distance units per hour.
pub const DEFAULT_PACE: f64 = 2.0;

/// Distance granted per tick; together with pace this fixes the cadence.
const DISTANCE_PER_TICK: f64 = 0.01;

/// Mutable state of one room's phase timer.
///
/// Shared between the room (snapshots, config merges) and the scheduler
/// task (phase transitions) under a single mutex.
#[derive(Debug, Clone)]
pub struct TimerState {
    /// Current phase of the cycle.
    pub phase: Phase,
    /// Whether the cycle has been started and not ended.
    pub is_running: bool,
    /// When the current phase began.
    pub started_at: Option<DateTime<Utc>>,
    /// Duration of the current phase in seconds.
    pub duration_secs: u64,
    /// Configured focus duration in seconds.
    pub focus_time: u16,
    /// Configured short break duration in seconds.
    pub short_break_time: u16,
    /// Configured long break duration in seconds.
    pub long_break_time: u16,
    /// Configured set count.
    pub sets: u8,
    /// Sets completed so far; never exceeds `sets`.
    pub completed_sets: u8,
    /// Pace in distance units per hour.
    pub pace: f64,
    /// Whether to continue automatically after the final set.
    pub auto_continue: bool,
}

impl Default for TimerState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            is_running: false,
            started_at: None,
            duration_secs: u64::from(DEFAULT_FOCUS_SECS),
            focus_time: DEFAULT_FOCUS_SECS,
            short_break_time: DEFAULT_SHORT_BREAK_SECS,
            long_break_time: DEFAULT_LONG_BREAK_SECS,
            sets: DEFAULT_SETS,
            completed_sets: 0,
            pace: DEFAULT_PACE,
            auto_continue: false,
        }
    }
}

impl TimerState {
    /// Interval between distance ticks: `(0.01 / pace) * 3600` seconds.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        let pace = if self.pace > 0.0 { self.pace } else { DEFAULT_PACE };
        Duration::from_secs_f64((DISTANCE_PER_TICK / pace) * 3600.0)
    }

    /// Seconds left in the current phase, floored at zero.
    #[must_use]
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.duration_secs as f64;
        match self.started_at {
            Some(started_at) => {
                #[allow(clippy::cast_precision_loss)]
                let elapsed = (now - started_at).num_milliseconds() as f64 / 1000.0;
                (duration - elapsed).max(0.0)
            }
            None => duration,
        }
    }

    /// Merges externally-settable fields from an `updateConfig` payload.
    ///
    /// Non-positive pace values are ignored; everything else is taken as-is.
    pub fn apply_config(&mut self, update: &TimerConfigUpdate) {
        if let Some(focus_time) = update.focus_time {
            self.focus_time = focus_time;
        }
        if let Some(short_break_time) = update.short_break_time {
            self.short_break_time = short_break_time;
        }
        if let Some(long_break_time) = update.long_break_time {
            self.long_break_time = long_break_time;
        }
        if let Some(sets) = update.sets {
            self.sets = sets;
        }
        if let Some(pace) = update.pace
            && pace > 0.0
        {
            self.pace = pace;
        }
        if let Some(auto_continue) = update.auto_continue {
            self.auto_continue = auto_continue;
        }
        if self.phase == Phase::Idle {
            self.duration_secs = u64::from(self.focus_time);
        }
    }

    /// Returns the timer to its idle state after a session ends.
    ///
    /// Configured durations survive; phase, progress, and pace do not.
    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.is_running = false;
        self.started_at = None;
        self.completed_sets = 0;
        self.pace = DEFAULT_PACE;
        self.duration_secs = u64::from(self.focus_time);
    }

    /// Point-in-time copy for response payloads.
    #[must_use]
    pub fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            phase: self.phase,
            is_running: self.is_running,
            start_time: self.started_at,
            duration: self.duration_secs,
            focus_time: self.focus_time,
            short_break_time: self.short_break_time,
            long_break_time: self.long_break_time,
            sets: self.sets,
            completed_sets: self.completed_sets,
            pace: self.pace,
            auto_continue: self.auto_continue,
        }
    }
}
