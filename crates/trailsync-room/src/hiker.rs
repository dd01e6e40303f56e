//! Participant actor: per-connection state, bounded outbound queue, and the
//! drain task that decouples room processing from slow network writes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use trailsync_core::envelope::{HikerSnapshot, ServerEnvelope};
use trailsync_core::sink::MessageSink;

/// Default capacity of a hiker's outbound queue.
pub const OUTBOX_CAPACITY: usize = 64;

/// How long a send attempt may wait for queue space before it counts as a
/// dropped message.
pub const SEND_TIMEOUT: Duration = Duration::from_millis(100);

/// Dropped messages tolerated before a hiker is evicted.
pub const DROP_LIMIT: u8 = 3;

/// One hiker's membership state inside a room.
///
/// The `outbox` sender and `kick` signal tie the hiker to its connection's
/// drain task; everything else is session-transient state.
#[derive(Debug)]
pub struct Hiker {
    /// Identifier, unique within the room.
    pub id: String,
    /// Display name.
    pub username: String,
    /// Host flag; exactly one hiker per non-empty room holds it.
    pub is_host: bool,
    /// Distance accrued this session.
    pub distance: f64,
    /// Ready flag.
    pub is_ready: bool,
    /// Paused flag; paused hikers accrue no distance.
    pub is_paused: bool,
    /// Strikes taken this session.
    pub strikes: u8,
    /// Tokens earned this session.
    pub tokens_earned: u32,
    /// Bonus tokens held.
    pub bonus_tokens: u32,
    /// Sends that timed out; at [`DROP_LIMIT`] the hiker is evicted.
    pub dropped_messages: u8,
    /// Join order within the room; host failover picks the lowest survivor.
    pub joined_seq: u64,
    /// Bounded outbound queue feeding the drain task.
    pub outbox: mpsc::Sender<ServerEnvelope>,
    /// Eviction signal shared with the connection's drain task.
    pub kick: Arc<watch::Sender<bool>>,
}

impl Hiker {
    /// Creates a hiker bound to a connection's queue and kick signal.
    #[must_use]
    pub fn new(
        id: String,
        username: String,
        outbox: mpsc::Sender<ServerEnvelope>,
        kick: Arc<watch::Sender<bool>>,
        joined_seq: u64,
    ) -> Self {
        Self {
            id,
            username,
            is_host: false,
            distance: 0.0,
            is_ready: false,
            is_paused: false,
            strikes: 0,
            tokens_earned: 0,
            bonus_tokens: 0,
            dropped_messages: 0,
            joined_seq,
            outbox,
            kick,
        }
    }

    /// Clears per-session transient state on `end`.
    pub fn reset_transient(&mut self) {
        self.distance = 0.0;
        self.is_ready = false;
        self.is_paused = false;
        self.strikes = 0;
        self.tokens_earned = 0;
        self.dropped_messages = 0;
    }

    /// Point-in-time copy for response payloads.
    #[must_use]
    pub fn snapshot(&self) -> HikerSnapshot {
        HikerSnapshot {
            id: self.id.clone(),
            username: self.username.clone(),
            is_host: self.is_host,
            distance: self.distance,
            is_ready: self.is_ready,
            is_paused: self.is_paused,
            strikes: self.strikes,
            tokens_earned: self.tokens_earned,
            bonus_tokens: self.bonus_tokens,
        }
    }
}

/// Spawns the drain task for one connection.
///
/// The task pulls from the bounded queue and writes into the transport
/// sink. It exits when the queue closes (every sender dropped), when the
/// kick signal fires, or when the sink reports the connection gone.
pub fn spawn_drain(
    mut outbox: mpsc::Receiver<ServerEnvelope>,
    mut kicked: watch::Receiver<bool>,
    mut sink: Box<dyn MessageSink>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                envelope = outbox.recv() => match envelope {
                    Some(envelope) => {
                        if let Err(error) = sink.deliver(envelope).await {
                            debug!(%error, "drain task stopping: sink failed");
                            break;
                        }
                    }
                    None => break,
                },
                changed = kicked.changed() => {
                    if changed.is_err() || *kicked.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
