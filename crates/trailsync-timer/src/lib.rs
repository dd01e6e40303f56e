//! TrailSync — Phase Scheduler.
//!
//! The Focus/Break cycling state machine. A background task drives a
//! periodic distance tick and one-shot phase deadlines; the owning room
//! receives both through the [`scheduler::TimerCallbacks`] seam.

pub mod scheduler;
pub mod state;

pub use scheduler::{PhaseTimer, TimerCallbacks};
pub use state::TimerState;
