//! The shared progress aggregate for one room.

use trailsync_core::config::SessionConfigUpdate;
use trailsync_core::envelope::SessionSnapshot;

/// Distance required per level increment.
pub const LEVEL_DISTANCE_FACTOR: f64 = 0.5;

/// Distance accrued by one unpaused hiker per timer tick.
pub const TICK_DISTANCE: f64 = 0.01;

/// Collective distance, level, strike, and token state for a room.
///
/// Mutated from two concurrency sources (the room dispatcher and the phase
/// timer's tick); the owning room guards it with a single mutex.
#[derive(Debug, Clone)]
pub struct Session {
    /// Session display name.
    pub name: String,
    /// Collective distance; never negative.
    pub distance: f64,
    /// Current level, `floor(distance / 0.5) + 1`.
    pub level: u32,
    /// High-water mark of `level`; never decreases.
    pub highest_completed_level: u32,
    /// Collective strikes taken.
    pub strikes: u8,
    /// Tokens earned, derived from distance/bonus/strikes.
    pub tokens_earned: u32,
    /// Bonus tokens granted outside the base formula.
    pub bonus_tokens: u32,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            name: String::new(),
            distance: 0.0,
            level: 1,
            highest_completed_level: 0,
            strikes: 0,
            tokens_earned: 0,
            bonus_tokens: 0,
        }
    }
}

impl Session {
    /// Accrues one tick of distance and recomputes derived fields.
    pub fn advance(&mut self) {
        self.distance += TICK_DISTANCE;
        self.recompute();
    }

    /// The strike penalty fraction for the current strike count.
    #[must_use]
    pub fn strike_penalty(&self) -> f64 {
        match self.strikes {
            0..=2 => 0.10,
            3..=4 => 0.30,
            5..=6 => 0.50,
            7..=8 => 0.70,
            _ => 1.00,
        }
    }

    /// Records a pause strike: increments the strike count, subtracts the
    /// tiered percentage penalty from the collective distance (floored at
    /// zero), and recomputes derived fields.
    ///
    /// Returns the penalty fraction that was applied.
    pub fn record_pause_strike(&mut self) -> f64 {
        self.strikes = self.strikes.saturating_add(1);
        let penalty = self.strike_penalty();
        self.distance = (self.distance - self.distance * penalty).max(0.0);
        self.recompute();
        penalty
    }

    /// Recomputes level, the high-water mark, and tokens from distance.
    pub fn recompute(&mut self) {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            self.level = (self.distance / LEVEL_DISTANCE_FACTOR).floor() as u32 + 1;
        }
        if self.level > self.highest_completed_level {
            self.highest_completed_level = self.level;
        }
        self.tokens_earned = self.compute_tokens();
    }

    /// Token payout: base tokens from distance plus bonus tokens, minus the
    /// strike penalty fraction of the total, floored at zero.
    #[must_use]
    fn compute_tokens(&self) -> u32 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let base = (self.distance / LEVEL_DISTANCE_FACTOR).floor() as u32;
        let total = base + self.bonus_tokens;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let forfeited = (f64::from(total) * self.strike_penalty()).floor() as u32;
        total.saturating_sub(forfeited)
    }

    /// Clears all per-session state back to initial values.
    pub fn reset(&mut self) {
        self.distance = 0.0;
        self.level = 1;
        self.highest_completed_level = 0;
        self.strikes = 0;
        self.tokens_earned = 0;
        self.bonus_tokens = 0;
    }

    /// Merges externally-settable fields from an `updateConfig` payload.
    pub fn apply_config(&mut self, update: &SessionConfigUpdate) {
        if let Some(name) = &update.name {
            self.name.clone_from(name);
        }
    }

    /// Point-in-time copy for response payloads.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            name: self.name.clone(),
            distance: self.distance,
            level: self.level,
            highest_completed_level: self.highest_completed_level,
            strikes: self.strikes,
            tokens_earned: self.tokens_earned,
            bonus_tokens: self.bonus_tokens,
        }
    }
}
