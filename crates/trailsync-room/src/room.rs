//! One room: serialized protocol dispatch, broadcast, and eviction.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use trailsync_core::clock::Clock;
use trailsync_core::config::{SessionConfigUpdate, TimerConfigUpdate};
use trailsync_core::envelope::{
    ClientCommand, Delivery, Phase, Protocol, ResponseBody, RosterSnapshot, ServerEnvelope,
    SessionSnapshot, Status, TimerSnapshot,
};
use trailsync_core::error::RoomError;
use trailsync_session::Session;
use trailsync_session::session::TICK_DISTANCE;
use trailsync_timer::{PhaseTimer, TimerCallbacks};

use crate::hiker::{DROP_LIMIT, Hiker, SEND_TIMEOUT};
use crate::registry::{Joiner, RoomRegistry};

/// Capacity of the room inbox; generous so the read loops are never stalled
/// by slow downstream processing.
const INBOX_CAPACITY: usize = 2048;

/// One participant-originated operation queued on the room inbox.
#[derive(Debug)]
pub struct RoomMessage {
    /// The originating hiker.
    pub user_id: String,
    /// The validated operation.
    pub command: ClientCommand,
    /// Connection handles for `create`/`join`; `None` for everything else.
    pub joiner: Option<Joiner>,
}

#[derive(Debug, Default)]
struct Members {
    hikers: HashMap<String, Hiker>,
    host_id: String,
    next_seq: u64,
}

/// Deterministic host failover: the earliest surviving joiner takes over.
fn promote_next_host(members: &mut Members) -> Option<String> {
    let next_id = members
        .hikers
        .values()
        .min_by_key(|hiker| hiker.joined_seq)
        .map(|hiker| hiker.id.clone())?;
    members.host_id.clone_from(&next_id);
    let hiker = members.hikers.get_mut(&next_id)?;
    hiker.is_host = true;
    Some(hiker.username.clone())
}

/// An isolated group session: membership, progress aggregate, phase timer.
///
/// Participant operations are serialized through the inbox; timer callbacks
/// arrive on the scheduler task and touch the same state under the same
/// mutexes.
pub struct Room {
    id: String,
    members: Mutex<Members>,
    session: Mutex<Session>,
    timer: PhaseTimer,
    inbox: mpsc::Sender<RoomMessage>,
    shutdown: watch::Sender<bool>,
    registry: Weak<RoomRegistry>,
}

impl Room {
    /// Creates the room and starts its dispatcher task.
    #[must_use]
    pub fn spawn(id: String, clock: Arc<dyn Clock>, registry: Weak<RoomRegistry>) -> Arc<Self> {
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let room = Arc::new_cyclic(|weak: &Weak<Self>| {
            // The timer gets a non-owning back-reference; it never keeps the
            // room alive.
            let callbacks: Weak<dyn TimerCallbacks> = weak.clone();
            Self {
                id,
                members: Mutex::new(Members::default()),
                session: Mutex::new(Session::default()),
                timer: PhaseTimer::spawn(callbacks, clock),
                inbox: inbox_tx,
                shutdown: shutdown_tx,
                registry,
            }
        });

        tokio::spawn(Arc::clone(&room).dispatch_loop(inbox_rx, shutdown_rx));
        room
    }

    /// The room identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queues one operation on the room inbox.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::RoomClosed`] if the room has been torn down.
    pub async fn submit(&self, message: RoomMessage) -> Result<(), RoomError> {
        self.inbox
            .send(message)
            .await
            .map_err(|_| RoomError::RoomClosed(self.id.clone()))
    }

    /// Number of hikers currently in the room.
    #[must_use]
    pub fn hiker_count(&self) -> usize {
        self.locked_members().hikers.len()
    }

    /// The current host's id, if the room is non-empty.
    #[must_use]
    pub fn host_id(&self) -> Option<String> {
        let members = self.locked_members();
        if members.hikers.is_empty() {
            None
        } else {
            Some(members.host_id.clone())
        }
    }

    /// Point-in-time copy of the membership map.
    #[must_use]
    pub fn roster_snapshot(&self) -> RosterSnapshot {
        self.locked_members()
            .hikers
            .values()
            .map(|hiker| (hiker.id.clone(), hiker.snapshot()))
            .collect()
    }

    /// Point-in-time copy of the progress aggregate.
    #[must_use]
    pub fn session_snapshot(&self) -> SessionSnapshot {
        self.locked_session().snapshot()
    }

    /// Point-in-time copy of the phase timer.
    #[must_use]
    pub fn timer_snapshot(&self) -> TimerSnapshot {
        self.timer.snapshot()
    }

    fn locked_members(&self) -> MutexGuard<'_, Members> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn locked_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn dispatch_loop(
        self: Arc<Self>,
        mut inbox: mpsc::Receiver<RoomMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                message = inbox.recv() => match message {
                    Some(message) => self.dispatch(message).await,
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        self.finalize().await;
    }

    /// Teardown: join the scheduler, then close every remaining queue.
    async fn finalize(&self) {
        self.timer.stop().await;
        let mut members = self.locked_members();
        for hiker in members.hikers.values() {
            let _ = hiker.kick.send(true);
        }
        members.hikers.clear();
        info!(room = %self.id, "room closed");
    }

    async fn dispatch(&self, message: RoomMessage) {
        let user_id = message.user_id;
        debug!(room = %self.id, user = %user_id, command = ?message.command, "dispatching");
        let result = match message.command {
            ClientCommand::Create { username } => {
                self.handle_create(&user_id, username, message.joiner).await
            }
            ClientCommand::Join { username } => {
                self.handle_join(&user_id, username, message.joiner).await
            }
            ClientCommand::Ready => self.handle_ready(&user_id).await,
            ClientCommand::UpdateConfig { timer, session } => {
                self.handle_update_config(&user_id, timer, session).await
            }
            ClientCommand::Start => {
                self.handle_start().await;
                Ok(())
            }
            ClientCommand::Pause => self.handle_pause(&user_id).await,
            ClientCommand::Resume => self.handle_resume(&user_id).await,
            ClientCommand::Leave => self.handle_leave(&user_id).await,
            ClientCommand::End => {
                self.handle_end().await;
                Ok(())
            }
            ClientCommand::ExtraSet => {
                self.timer.extra_set().await;
                self.broadcast_notice(Protocol::ExtraSet, "Added full set, More Rewards!")
                    .await;
                Ok(())
            }
            ClientCommand::ExtraSession => {
                self.timer.extra_session().await;
                self.broadcast_notice(Protocol::ExtraSession, "Added extra session, More Rewards!")
                    .await;
                Ok(())
            }
            ClientCommand::SkipBreak => {
                self.timer.skip_break().await;
                self.broadcast_notice(Protocol::SkipBreak, "Skipping Break").await;
                Ok(())
            }
        };
        if let Err(error) = result {
            warn!(room = %self.id, user = %user_id, %error, "protocol rejected");
        }
    }

    fn add_hiker(
        &self,
        user_id: &str,
        username: String,
        joiner: Joiner,
        host: bool,
    ) -> Result<(), RoomError> {
        let auto_ready = self.timer.is_running();
        let mut members = self.locked_members();
        if members.hikers.contains_key(user_id) {
            return Err(RoomError::HikerAlreadyInRoom(user_id.to_owned()));
        }
        let seq = members.next_seq;
        members.next_seq += 1;

        let mut hiker = Hiker::new(
            user_id.to_owned(),
            username,
            joiner.outbox,
            joiner.kick,
            seq,
        );
        // Hikers joining a running session are ready by definition.
        hiker.is_ready = auto_ready;
        if host {
            hiker.is_host = true;
            members.host_id = user_id.to_owned();
        }
        members.hikers.insert(user_id.to_owned(), hiker);
        Ok(())
    }

    async fn handle_create(
        &self,
        user_id: &str,
        username: String,
        joiner: Option<Joiner>,
    ) -> Result<(), RoomError> {
        let Some(joiner) = joiner else {
            return Err(RoomError::HikerNotFound(user_id.to_owned()));
        };
        self.add_hiker(user_id, username, joiner, true)?;
        info!(room = %self.id, host = %user_id, "room created");

        self.send_direct(
            user_id,
            Protocol::Create,
            ResponseBody::RoomCreated {
                status: Status::Success,
                message: "room created".to_owned(),
                hikers: self.roster_snapshot(),
            },
        )
        .await;
        Ok(())
    }

    async fn handle_join(
        &self,
        user_id: &str,
        username: String,
        joiner: Option<Joiner>,
    ) -> Result<(), RoomError> {
        let Some(joiner) = joiner else {
            return Err(RoomError::HikerNotFound(user_id.to_owned()));
        };
        self.add_hiker(user_id, username.clone(), joiner, false)?;
        info!(room = %self.id, hiker = %user_id, "hiker joined");

        let hikers = self.roster_snapshot();
        self.send_direct(
            user_id,
            Protocol::Join,
            ResponseBody::JoinWelcome {
                kind: Delivery::Direct,
                status: Status::Success,
                message: "joined room".to_owned(),
                hikers: hikers.clone(),
                session: self.session_snapshot(),
                timer: self.timer.snapshot(),
            },
        )
        .await;

        self.broadcast_except(
            Protocol::Join,
            ResponseBody::Roster {
                kind: Delivery::Broadcast,
                status: None,
                message: format!("{username} has joined the room"),
                hikers,
            },
            user_id,
        )
        .await;
        Ok(())
    }

    async fn handle_ready(&self, user_id: &str) -> Result<(), RoomError> {
        {
            let mut members = self.locked_members();
            let hiker = members
                .hikers
                .get_mut(user_id)
                .ok_or_else(|| RoomError::HikerNotFound(user_id.to_owned()))?;
            hiker.is_ready = !hiker.is_ready;
        }

        let hikers = self.roster_snapshot();
        self.send_direct(
            user_id,
            Protocol::Ready,
            ResponseBody::Roster {
                kind: Delivery::Direct,
                status: Some(Status::Success),
                message: String::new(),
                hikers: hikers.clone(),
            },
        )
        .await;
        self.broadcast_except(
            Protocol::Ready,
            ResponseBody::Roster {
                kind: Delivery::Broadcast,
                status: None,
                message: String::new(),
                hikers,
            },
            user_id,
        )
        .await;
        Ok(())
    }

    async fn handle_update_config(
        &self,
        user_id: &str,
        timer_update: Option<TimerConfigUpdate>,
        session_update: Option<SessionConfigUpdate>,
    ) -> Result<(), RoomError> {
        let is_host = {
            let members = self.locked_members();
            members
                .hikers
                .get(user_id)
                .ok_or_else(|| RoomError::HikerNotFound(user_id.to_owned()))?
                .is_host
        };
        if !is_host {
            self.send_direct(
                user_id,
                Protocol::UpdateConfig,
                ResponseBody::Failure {
                    kind: Delivery::Direct,
                    status: Status::Error,
                    message: "only the host can update settings".to_owned(),
                },
            )
            .await;
            return Err(RoomError::NotHost(user_id.to_owned()));
        }

        if let Some(update) = &session_update {
            self.locked_session().apply_config(update);
        }
        if let Some(update) = &timer_update {
            self.timer.apply_config(update);
        }

        let hikers = self.roster_snapshot();
        let session_config = self.session_snapshot();
        let timer_config = self.timer.snapshot();
        self.send_direct(
            user_id,
            Protocol::UpdateConfig,
            ResponseBody::ConfigUpdated {
                kind: Delivery::Direct,
                status: Some(Status::Success),
                message: "Session Updated".to_owned(),
                hikers: hikers.clone(),
                session_config: session_config.clone(),
                timer_config: timer_config.clone(),
            },
        )
        .await;
        self.broadcast_except(
            Protocol::UpdateConfig,
            ResponseBody::ConfigUpdated {
                kind: Delivery::Broadcast,
                status: None,
                message: "Settings Updated".to_owned(),
                hikers,
                session_config,
                timer_config,
            },
            user_id,
        )
        .await;
        Ok(())
    }

    async fn handle_start(&self) {
        self.timer.start().await;
        info!(room = %self.id, "session starting");
        self.broadcast(
            Protocol::Start,
            ResponseBody::SessionStarting {
                message: "Starting Session".to_owned(),
                session: self.session_snapshot(),
                timer: self.timer.snapshot(),
            },
        )
        .await;
    }

    async fn handle_pause(&self, user_id: &str) -> Result<(), RoomError> {
        let username = {
            let mut members = self.locked_members();
            let hiker = members
                .hikers
                .get_mut(user_id)
                .ok_or_else(|| RoomError::HikerNotFound(user_id.to_owned()))?;
            if hiker.is_paused {
                return Err(RoomError::AlreadyPaused(user_id.to_owned()));
            }
            hiker.is_paused = true;
            hiker.strikes = hiker.strikes.saturating_add(1);
            hiker.username.clone()
        };

        // One strike on the aggregate; the tiered fraction comes off both
        // the aggregate's and the pauser's distance.
        let (penalty, session) = {
            let mut session = self.locked_session();
            let penalty = session.record_pause_strike();
            (penalty, session.snapshot())
        };
        {
            let mut members = self.locked_members();
            if let Some(hiker) = members.hikers.get_mut(user_id) {
                hiker.distance = (hiker.distance - hiker.distance * penalty).max(0.0);
            }
        }

        self.send_direct(
            user_id,
            Protocol::Pause,
            ResponseBody::PauseAccepted {
                kind: Delivery::Direct,
                status: Status::Success,
                message: String::new(),
                session: session.clone(),
            },
        )
        .await;
        self.broadcast_except(
            Protocol::Pause,
            ResponseBody::PauseNotice {
                kind: Delivery::Broadcast,
                paused_hiker_id: user_id.to_owned(),
                message: format!("Hiker {username} has paused"),
                session,
            },
            user_id,
        )
        .await;
        Ok(())
    }

    async fn handle_resume(&self, user_id: &str) -> Result<(), RoomError> {
        let username = {
            let mut members = self.locked_members();
            let hiker = members
                .hikers
                .get_mut(user_id)
                .ok_or_else(|| RoomError::HikerNotFound(user_id.to_owned()))?;
            if !hiker.is_paused {
                return Err(RoomError::NotPaused(user_id.to_owned()));
            }
            hiker.is_paused = false;
            hiker.username.clone()
        };

        let remaining_time = self.timer.remaining_secs();
        self.send_direct(
            user_id,
            Protocol::Resume,
            ResponseBody::ResumeAccepted {
                kind: Delivery::Direct,
                status: Status::Success,
                message: String::new(),
                remaining_time,
            },
        )
        .await;
        self.broadcast_except(
            Protocol::Resume,
            ResponseBody::ResumeNotice {
                resume_hiker_id: user_id.to_owned(),
                remaining_time,
                message: format!("Hiker {username} has resumed"),
            },
            user_id,
        )
        .await;
        Ok(())
    }

    async fn handle_leave(&self, user_id: &str) -> Result<(), RoomError> {
        let (removed, promoted, empty) = {
            let mut members = self.locked_members();
            let hiker = members
                .hikers
                .remove(user_id)
                .ok_or_else(|| RoomError::HikerNotFound(user_id.to_owned()))?;
            let empty = members.hikers.is_empty();
            let promoted = if !empty && hiker.is_host {
                promote_next_host(&mut members)
            } else {
                None
            };
            (hiker, promoted, empty)
        };
        info!(room = %self.id, hiker = %removed.id, "hiker left");

        if empty {
            self.request_close();
            return Ok(());
        }

        if let Some(new_host) = promoted {
            self.broadcast(
                Protocol::NewHost,
                ResponseBody::Roster {
                    kind: Delivery::Broadcast,
                    status: None,
                    message: format!("{new_host} is the new host"),
                    hikers: self.roster_snapshot(),
                },
            )
            .await;
        }
        self.broadcast(
            Protocol::Leave,
            ResponseBody::Roster {
                kind: Delivery::Broadcast,
                status: None,
                message: format!("Hiker {} has left", removed.username),
                hikers: self.roster_snapshot(),
            },
        )
        .await;
        Ok(())
    }

    async fn handle_end(&self) {
        self.timer.reset_session().await;
        self.locked_session().reset();
        {
            let mut members = self.locked_members();
            for hiker in members.hikers.values_mut() {
                hiker.reset_transient();
            }
        }
        info!(room = %self.id, "session ended");
        self.broadcast_notice(Protocol::End, "Session Ended").await;
    }

    /// The periodic `update` operation: accrue distance for every unpaused
    /// hiker during focus, then broadcast a consistent snapshot.
    async fn handle_update(&self) {
        let phase = self.timer.snapshot().phase;
        if phase == Phase::Focus {
            let accrued = {
                let mut members = self.locked_members();
                let mut count = 0_usize;
                for hiker in members.hikers.values_mut() {
                    if !hiker.is_paused {
                        hiker.distance += TICK_DISTANCE;
                        count += 1;
                    }
                }
                count
            };
            let mut session = self.locked_session();
            for _ in 0..accrued {
                session.advance();
            }
        }

        self.broadcast(
            Protocol::Update,
            ResponseBody::Progress {
                kind: Delivery::Broadcast,
                hikers: self.roster_snapshot(),
                session: self.session_snapshot(),
                timer: self.timer.snapshot(),
                remaining_time: self.timer.remaining_secs(),
            },
        )
        .await;
    }

    async fn broadcast_notice(&self, protocol: Protocol, message: &str) {
        self.broadcast(
            protocol,
            ResponseBody::Notice {
                kind: Delivery::Broadcast,
                message: message.to_owned(),
            },
        )
        .await;
    }

    async fn broadcast(&self, protocol: Protocol, body: ResponseBody) {
        let evicted = self.send_to_members(protocol, &body, None).await;
        self.process_evictions(evicted).await;
    }

    async fn broadcast_except(&self, protocol: Protocol, body: ResponseBody, excluded: &str) {
        let evicted = self.send_to_members(protocol, &body, Some(excluded)).await;
        self.process_evictions(evicted).await;
    }

    async fn send_direct(&self, user_id: &str, protocol: Protocol, body: ResponseBody) {
        let outbox = self
            .locked_members()
            .hikers
            .get(user_id)
            .map(|hiker| hiker.outbox.clone());
        let Some(outbox) = outbox else { return };

        let envelope = ServerEnvelope::new(protocol, &self.id, user_id, body);
        let mut evicted = Vec::new();
        if outbox.send_timeout(envelope, SEND_TIMEOUT).await.is_err() {
            debug!(room = %self.id, hiker = %user_id, "direct message dropped");
            if self.record_drop(user_id) {
                evicted.push(user_id.to_owned());
            }
        }
        self.process_evictions(evicted).await;
    }

    /// Sends one body to every (non-excluded) member, returning the ids that
    /// crossed the drop limit. Senders are snapshotted under the membership
    /// lock; the sends themselves happen outside it.
    async fn send_to_members(
        &self,
        protocol: Protocol,
        body: &ResponseBody,
        excluded: Option<&str>,
    ) -> Vec<String> {
        let targets: Vec<(String, mpsc::Sender<ServerEnvelope>)> = {
            let members = self.locked_members();
            members
                .hikers
                .values()
                .filter(|hiker| excluded != Some(hiker.id.as_str()))
                .map(|hiker| (hiker.id.clone(), hiker.outbox.clone()))
                .collect()
        };

        let mut evicted = Vec::new();
        for (id, outbox) in targets {
            let envelope = ServerEnvelope::new(protocol, &self.id, &id, body.clone());
            if outbox.send_timeout(envelope, SEND_TIMEOUT).await.is_err() {
                debug!(room = %self.id, hiker = %id, "broadcast message dropped");
                if self.record_drop(&id) {
                    evicted.push(id);
                }
            }
        }
        evicted
    }

    /// Counts one dropped message; true when the hiker must be evicted.
    fn record_drop(&self, user_id: &str) -> bool {
        let mut members = self.locked_members();
        match members.hikers.get_mut(user_id) {
            Some(hiker) => {
                hiker.dropped_messages = hiker.dropped_messages.saturating_add(1);
                hiker.dropped_messages >= DROP_LIMIT
            }
            None => false,
        }
    }

    async fn process_evictions(&self, mut pending: Vec<String>) {
        while let Some(id) = pending.pop() {
            let more = self.kick(&id).await;
            pending.extend(more);
        }
    }

    /// Forcibly removes one hiker: close their queue, reassign the host if
    /// needed, notify the rest of the room. Returns any further evictions
    /// triggered by the notifications.
    async fn kick(&self, user_id: &str) -> Vec<String> {
        let (removed, promoted, empty) = {
            let mut members = self.locked_members();
            let Some(hiker) = members.hikers.remove(user_id) else {
                return Vec::new();
            };
            let _ = hiker.kick.send(true);
            let empty = members.hikers.is_empty();
            let promoted = if !empty && hiker.is_host {
                promote_next_host(&mut members)
            } else {
                None
            };
            (hiker, promoted, empty)
        };
        warn!(room = %self.id, hiker = %removed.id, "kicked hiker after repeated dropped messages");

        if empty {
            self.request_close();
            return Vec::new();
        }

        let mut evicted = Vec::new();
        if let Some(new_host) = promoted {
            let body = ResponseBody::Roster {
                kind: Delivery::Broadcast,
                status: None,
                message: format!("{new_host} is the new host"),
                hikers: self.roster_snapshot(),
            };
            evicted.extend(self.send_to_members(Protocol::NewHost, &body, None).await);
        }
        let body = ResponseBody::Roster {
            kind: Delivery::Broadcast,
            status: None,
            message: format!("{} has been kicked from the room", removed.username),
            hikers: self.roster_snapshot(),
        };
        evicted.extend(self.send_to_members(Protocol::Kicked, &body, None).await);
        evicted
    }

    /// Deregisters the room and signals the dispatcher to tear down.
    fn request_close(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_room(&self.id);
        }
        let _ = self.shutdown.send(true);
    }
}

#[async_trait]
impl TimerCallbacks for Room {
    async fn on_tick(&self) {
        self.handle_update().await;
    }

    async fn on_break_started(&self) {
        self.broadcast(
            Protocol::ShortBreak,
            ResponseBody::PhaseChange {
                kind: Delivery::Broadcast,
                message: None,
                session: self.session_snapshot(),
                timer: self.timer.snapshot(),
                hikers: self.roster_snapshot(),
            },
        )
        .await;
    }

    async fn on_all_sets_completed(&self) {
        self.broadcast(
            Protocol::EndModal,
            ResponseBody::PhaseChange {
                kind: Delivery::Broadcast,
                message: Some("Congrats, You Finished!".to_owned()),
                session: self.session_snapshot(),
                timer: self.timer.snapshot(),
                hikers: self.roster_snapshot(),
            },
        )
        .await;
    }
}
