//! The scheduler task driving the focus/break cycle.
//!
//! One background task per room owns the periodic tick and the one-shot
//! phase deadline. The room receives tick and transition notifications
//! through [`TimerCallbacks`], held as a non-owning back-reference so the
//! scheduler never participates in the room's lifetime.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};
use tracing::debug;

use trailsync_core::clock::Clock;
use trailsync_core::config::TimerConfigUpdate;
use trailsync_core::envelope::{Phase, TimerSnapshot};

use crate::state::TimerState;

/// Notifications the scheduler task delivers back to its room.
#[async_trait]
pub trait TimerCallbacks: Send + Sync {
    /// A distance tick fired; the room applies the `update` operation.
    async fn on_tick(&self);

    /// A focus phase ended and a short break began.
    async fn on_break_started(&self);

    /// The final set completed and auto-continue is off; the room is
    /// expected to wait for an explicit decision.
    async fn on_all_sets_completed(&self);
}

/// Control messages accepted by the scheduler task.
#[derive(Debug)]
enum TimerCommand {
    Start,
    SkipBreak,
    ExtraSet,
    ExtraSession,
    Reset,
    Stop,
}

/// Handle to one room's phase scheduler.
///
/// Owned exclusively by the room; dropping the control channel or calling
/// [`PhaseTimer::stop`] terminates the background task.
pub struct PhaseTimer {
    state: Arc<Mutex<TimerState>>,
    control: mpsc::Sender<TimerCommand>,
    task: Mutex<Option<JoinHandle<()>>>,
    clock: Arc<dyn Clock>,
}

fn locked(state: &Mutex<TimerState>) -> std::sync::MutexGuard<'_, TimerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PhaseTimer {
    /// Spawns the scheduler task with default configuration.
    #[must_use]
    pub fn spawn(callbacks: Weak<dyn TimerCallbacks>, clock: Arc<dyn Clock>) -> Self {
        let state = Arc::new(Mutex::new(TimerState::default()));
        let (control, inbox) = mpsc::channel(16);
        let task = tokio::spawn(run(Arc::clone(&state), inbox, callbacks, Arc::clone(&clock)));
        Self {
            state,
            control,
            task: Mutex::new(Some(task)),
            clock,
        }
    }

    /// Point-in-time copy of the timer state.
    #[must_use]
    pub fn snapshot(&self) -> TimerSnapshot {
        locked(&self.state).snapshot()
    }

    /// Whether the cycle has been started and not ended.
    #[must_use]
    pub fn is_running(&self) -> bool {
        locked(&self.state).is_running
    }

    /// Seconds left in the current phase.
    #[must_use]
    pub fn remaining_secs(&self) -> f64 {
        locked(&self.state).remaining_secs(self.clock.now())
    }

    /// Merges externally-settable configuration fields.
    pub fn apply_config(&self, update: &TimerConfigUpdate) {
        locked(&self.state).apply_config(update);
    }

    /// Begins the focus cycle. Repeated calls while running are ignored.
    pub async fn start(&self) {
        {
            let mut state = locked(&self.state);
            if state.is_running {
                return;
            }
            state.is_running = true;
        }
        self.send(TimerCommand::Start).await;
    }

    /// Returns to the focus phase immediately if a break is in progress.
    pub async fn skip_break(&self) {
        self.send(TimerCommand::SkipBreak).await;
    }

    /// Adds one set, resuming the cycle if it was awaiting a decision.
    pub async fn extra_set(&self) {
        self.send(TimerCommand::ExtraSet).await;
    }

    /// Adds three sets, resuming the cycle if it was awaiting a decision.
    pub async fn extra_session(&self) {
        self.send(TimerCommand::ExtraSession).await;
    }

    /// Stops ticking, cancels any pending deadline, and returns the timer
    /// to idle. The background task stays alive for a later `start`.
    pub async fn reset_session(&self) {
        locked(&self.state).reset();
        self.send(TimerCommand::Reset).await;
    }

    /// Tears the scheduler down: disarms everything and blocks until the
    /// background task has actually exited.
    pub async fn stop(&self) {
        let _ = self.control.send(TimerCommand::Stop).await;
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    async fn send(&self, command: TimerCommand) {
        // A closed channel means the task already stopped; nothing to drive.
        let _ = self.control.send(command).await;
    }
}

/// What a break transition decided to do next.
enum BreakOutcome {
    ShortBreak,
    AutoContinueLongBreak,
    AwaitingDecision,
}

async fn run(
    state: Arc<Mutex<TimerState>>,
    mut control: mpsc::Receiver<TimerCommand>,
    callbacks: Weak<dyn TimerCallbacks>,
    clock: Arc<dyn Clock>,
) {
    let mut ticker: Option<Interval> = None;
    let mut deadline_at: Option<Instant> = None;

    loop {
        tokio::select! {
            command = control.recv() => match command {
                None | Some(TimerCommand::Stop) => break,
                Some(TimerCommand::Start) => {
                    enter_focus(&state, clock.as_ref(), &mut ticker, &mut deadline_at);
                }
                Some(TimerCommand::SkipBreak) => {
                    let phase = locked(&state).phase;
                    if matches!(phase, Phase::Break | Phase::AwaitingDecision) {
                        enter_focus(&state, clock.as_ref(), &mut ticker, &mut deadline_at);
                    }
                }
                Some(TimerCommand::ExtraSet) => {
                    add_sets(&state, clock.as_ref(), &mut deadline_at, 1);
                }
                Some(TimerCommand::ExtraSession) => {
                    add_sets(&state, clock.as_ref(), &mut deadline_at, 3);
                }
                Some(TimerCommand::Reset) => {
                    ticker = None;
                    deadline_at = None;
                    locked(&state).reset();
                }
            },
            () = next_tick(&mut ticker), if ticker.is_some() => {
                let Some(callbacks) = callbacks.upgrade() else { break };
                callbacks.on_tick().await;
            }
            () = deadline_sleep(deadline_at), if deadline_at.is_some() => {
                deadline_at = None;
                let phase = locked(&state).phase;
                match phase {
                    Phase::Focus => {
                        let outcome =
                            begin_break(&state, clock.as_ref(), &mut ticker, &mut deadline_at);
                        let Some(callbacks) = callbacks.upgrade() else { break };
                        match outcome {
                            BreakOutcome::ShortBreak => callbacks.on_break_started().await,
                            BreakOutcome::AwaitingDecision => {
                                callbacks.on_all_sets_completed().await;
                            }
                            BreakOutcome::AutoContinueLongBreak => {}
                        }
                    }
                    Phase::Break => {
                        enter_focus(&state, clock.as_ref(), &mut ticker, &mut deadline_at);
                    }
                    Phase::Idle | Phase::AwaitingDecision => {}
                }
            }
        }
    }
    debug!("phase scheduler task exiting");
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker.as_mut() {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn deadline_sleep(deadline_at: Option<Instant>) -> Sleep {
    // Only polled when armed; the fallback instant is never awaited.
    tokio::time::sleep_until(deadline_at.unwrap_or_else(Instant::now))
}

fn enter_focus(
    state: &Mutex<TimerState>,
    clock: &dyn Clock,
    ticker: &mut Option<Interval>,
    deadline_at: &mut Option<Instant>,
) {
    let (tick_interval, focus_secs) = {
        let mut state = locked(state);
        state.phase = Phase::Focus;
        state.started_at = Some(clock.now());
        state.duration_secs = u64::from(state.focus_time);
        (state.tick_interval(), u64::from(state.focus_time))
    };

    let start = Instant::now();
    let mut interval = tokio::time::interval_at(start + tick_interval, tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    *ticker = Some(interval);
    *deadline_at = Some(start + std::time::Duration::from_secs(focus_secs));
}

fn begin_break(
    state: &Mutex<TimerState>,
    clock: &dyn Clock,
    ticker: &mut Option<Interval>,
    deadline_at: &mut Option<Instant>,
) -> BreakOutcome {
    *ticker = None;

    let mut state = locked(state);
    state.phase = Phase::Break;
    state.completed_sets = state.completed_sets.saturating_add(1);
    state.started_at = Some(clock.now());
    state.duration_secs = u64::from(state.short_break_time);

    if state.completed_sets >= state.sets {
        if state.auto_continue {
            state.duration_secs = u64::from(state.long_break_time);
            *deadline_at =
                Some(Instant::now() + std::time::Duration::from_secs(state.duration_secs));
            BreakOutcome::AutoContinueLongBreak
        } else {
            state.phase = Phase::AwaitingDecision;
            BreakOutcome::AwaitingDecision
        }
    } else {
        *deadline_at = Some(Instant::now() + std::time::Duration::from_secs(state.duration_secs));
        BreakOutcome::ShortBreak
    }
}

fn add_sets(
    state: &Mutex<TimerState>,
    clock: &dyn Clock,
    deadline_at: &mut Option<Instant>,
    count: u8,
) {
    let mut state = locked(state);
    state.sets = state.sets.saturating_add(count);
    if state.phase == Phase::AwaitingDecision {
        // The decision arrived: take the long break, then resume focus.
        state.phase = Phase::Break;
        state.started_at = Some(clock.now());
        state.duration_secs = u64::from(state.long_break_time);
        *deadline_at = Some(Instant::now() + std::time::Duration::from_secs(state.duration_secs));
    }
}
