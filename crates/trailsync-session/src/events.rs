//! Static trail event catalog.
//!
//! Flavor events rolled during a hike. The coordination core does not
//! consume these; clients request them when a session crosses an event
//! threshold.

use rand::Rng;

/// Difficulty tier of a trail event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

/// One entry in the trail event catalog.
#[derive(Debug, Clone, Copy)]
pub struct TrailEvent {
    /// Display name.
    pub name: &'static str,
    /// Difficulty tier.
    pub difficulty: Difficulty,
    /// Time in seconds required to pass the event.
    pub duration_secs: u32,
    /// Whether hikers may pause during this event.
    pub can_pause: bool,
    /// Tokens lost on failure.
    pub token_penalty: u32,
    /// Distance lost on failure.
    pub distance_penalty: f64,
    /// Pace reduction percentage on failure.
    pub pace_penalty: u32,
    /// Tokens awarded on success.
    pub reward: u32,
}

/// Easy events: short, low stakes.
pub const EASY_EVENTS: &[TrailEvent] = &[
    TrailEvent {
        name: "Deer Sighting",
        difficulty: Difficulty::Easy,
        duration_secs: 60,
        can_pause: true,
        token_penalty: 0,
        distance_penalty: 0.0,
        pace_penalty: 0,
        reward: 5,
    },
    TrailEvent {
        name: "Scenic Rest Stop",
        difficulty: Difficulty::Easy,
        duration_secs: 60,
        can_pause: true,
        token_penalty: 0,
        distance_penalty: 0.0,
        pace_penalty: 0,
        reward: 2,
    },
    TrailEvent {
        name: "Light Rain",
        difficulty: Difficulty::Easy,
        duration_secs: 120,
        can_pause: false,
        token_penalty: 1,
        distance_penalty: 0.1,
        pace_penalty: 1,
        reward: 3,
    },
    TrailEvent {
        name: "Rockslide",
        difficulty: Difficulty::Easy,
        duration_secs: 120,
        can_pause: false,
        token_penalty: 1,
        distance_penalty: 0.1,
        pace_penalty: 1,
        reward: 3,
    },
    TrailEvent {
        name: "River Crossing",
        difficulty: Difficulty::Easy,
        duration_secs: 120,
        can_pause: false,
        token_penalty: 1,
        distance_penalty: 0.1,
        pace_penalty: 1,
        reward: 2,
    },
];

/// Medium events: longer, with real penalties.
pub const MEDIUM_EVENTS: &[TrailEvent] = &[
    TrailEvent {
        name: "Bear Encounter",
        difficulty: Difficulty::Medium,
        duration_secs: 300,
        can_pause: false,
        token_penalty: 3,
        distance_penalty: 0.3,
        pace_penalty: 2,
        reward: 5,
    },
    TrailEvent {
        name: "Moderate Rain",
        difficulty: Difficulty::Medium,
        duration_secs: 240,
        can_pause: false,
        token_penalty: 2,
        distance_penalty: 0.2,
        pace_penalty: 2,
        reward: 4,
    },
    TrailEvent {
        name: "Rockslide",
        difficulty: Difficulty::Medium,
        duration_secs: 240,
        can_pause: false,
        token_penalty: 2,
        distance_penalty: 0.2,
        pace_penalty: 2,
        reward: 4,
    },
    TrailEvent {
        name: "River Crossing",
        difficulty: Difficulty::Medium,
        duration_secs: 180,
        can_pause: false,
        token_penalty: 2,
        distance_penalty: 0.2,
        pace_penalty: 2,
        reward: 4,
    },
];

/// Hard events: the long hauls.
pub const HARD_EVENTS: &[TrailEvent] = &[
    TrailEvent {
        name: "Mountain Lion Standoff",
        difficulty: Difficulty::Hard,
        duration_secs: 600,
        can_pause: false,
        token_penalty: 5,
        distance_penalty: 0.5,
        pace_penalty: 5,
        reward: 10,
    },
    TrailEvent {
        name: "Thunderstorm",
        difficulty: Difficulty::Hard,
        duration_secs: 420,
        can_pause: false,
        token_penalty: 4,
        distance_penalty: 0.3,
        pace_penalty: 5,
        reward: 6,
    },
    TrailEvent {
        name: "Bear Encounter",
        difficulty: Difficulty::Hard,
        duration_secs: 480,
        can_pause: false,
        token_penalty: 5,
        distance_penalty: 0.5,
        pace_penalty: 4,
        reward: 8,
    },
    TrailEvent {
        name: "River Crossing",
        difficulty: Difficulty::Hard,
        duration_secs: 300,
        can_pause: false,
        token_penalty: 3,
        distance_penalty: 0.3,
        pace_penalty: 3,
        reward: 6,
    },
];

/// The catalog slice for one difficulty tier.
#[must_use]
pub fn catalog(difficulty: Difficulty) -> &'static [TrailEvent] {
    match difficulty {
        Difficulty::Easy => EASY_EVENTS,
        Difficulty::Medium => MEDIUM_EVENTS,
        Difficulty::Hard => HARD_EVENTS,
    }
}

/// Picks one event at random from the given tier.
pub fn random_event<R: Rng + ?Sized>(difficulty: Difficulty, rng: &mut R) -> &'static TrailEvent {
    let pool = catalog(difficulty);
    &pool[rng.random_range(0..pool.len())]
}
