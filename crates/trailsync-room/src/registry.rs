//! Server-wide room registry and per-connection routing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use trailsync_core::clock::Clock;
use trailsync_core::envelope::{
    ClientCommand, ClientEnvelope, Delivery, Protocol, ResponseBody, ServerEnvelope, Status,
};
use trailsync_core::error::RoomError;
use trailsync_core::sink::MessageSink;

use crate::hiker::{self, OUTBOX_CAPACITY};
use crate::room::{Room, RoomMessage};

/// Connection handles handed to a room on `create`/`join`: the bounded
/// queue the room writes into and the signal it fires on eviction.
#[derive(Debug)]
pub struct Joiner {
    /// Sender side of the connection's outbound queue.
    pub outbox: mpsc::Sender<ServerEnvelope>,
    /// Eviction signal shared with the connection's drain task.
    pub kick: Arc<watch::Sender<bool>>,
}

/// One live transport connection, as the registry tracks it.
///
/// Identity (`user_id`, `room_id`) is assigned on the first successful
/// `create` or `join` and cleared on `leave`.
pub struct Connection {
    outbox: mpsc::Sender<ServerEnvelope>,
    kick: Arc<watch::Sender<bool>>,
    user_id: Mutex<Option<String>>,
    room_id: Mutex<Option<String>>,
    drain: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// The hiker id bound to this connection, once assigned.
    #[must_use]
    pub fn user_id(&self) -> Option<String> {
        self.user_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The room this connection is in, once assigned.
    #[must_use]
    pub fn room_id(&self) -> Option<String> {
        self.room_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_identity(&self, user_id: &str, room_id: &str) {
        *self.user_id.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(user_id.to_owned());
        *self.room_id.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(room_id.to_owned());
    }

    fn clear_identity(&self) {
        self.user_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.room_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn joiner(&self) -> Joiner {
        Joiner {
            outbox: self.outbox.clone(),
            kick: Arc::clone(&self.kick),
        }
    }
}

/// Owns every live room and routes decoded frames to the right one.
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, Arc<Room>>>,
    clock: Arc<dyn Clock>,
    outbox_capacity: usize,
}

impl RoomRegistry {
    /// Creates a registry with the default per-connection queue capacity.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Arc<Self> {
        Self::with_outbox_capacity(clock, OUTBOX_CAPACITY)
    }

    /// Creates a registry with an explicit per-connection queue capacity.
    #[must_use]
    pub fn with_outbox_capacity(clock: Arc<dyn Clock>, outbox_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            rooms: Mutex::new(HashMap::new()),
            clock,
            outbox_capacity,
        })
    }

    /// Binds a transport sink to a new connection and starts its drain task.
    #[must_use]
    pub fn open_connection(&self, sink: Box<dyn MessageSink>) -> Arc<Connection> {
        let (outbox_tx, outbox_rx) = mpsc::channel(self.outbox_capacity);
        let (kick_tx, kick_rx) = watch::channel(false);
        let drain = hiker::spawn_drain(outbox_rx, kick_rx, sink);
        Arc::new(Connection {
            outbox: outbox_tx,
            kick: Arc::new(kick_tx),
            user_id: Mutex::new(None),
            room_id: Mutex::new(None),
            drain: Mutex::new(Some(drain)),
        })
    }

    /// Creates and registers a new room under a fresh id.
    #[must_use]
    pub fn create_room(self: &Arc<Self>) -> Arc<Room> {
        let id = Uuid::new_v4().to_string();
        let room = Room::spawn(id.clone(), Arc::clone(&self.clock), Arc::downgrade(self));
        self.locked_rooms().insert(id.clone(), Arc::clone(&room));
        info!(room = %id, "room registered");
        room
    }

    /// Looks up a room by id.
    #[must_use]
    pub fn room(&self, room_id: &str) -> Option<Arc<Room>> {
        self.locked_rooms().get(room_id).cloned()
    }

    /// Number of registered rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.locked_rooms().len()
    }

    /// Deregisters a room; the room calls this when it empties out.
    pub fn remove_room(&self, room_id: &str) {
        if self.locked_rooms().remove(room_id).is_some() {
            info!(room = %room_id, "room deregistered");
        }
    }

    /// Routes one decoded frame from a connection to its room.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::DeliveryFailed`] when an error response could
    /// not be queued for the connection (the caller should drop it), and
    /// [`RoomError::RoomClosed`] when the addressed room tore down mid-send.
    /// An unknown room id is answered on the wire and is not an error here.
    pub async fn route(
        self: &Arc<Self>,
        conn: &Connection,
        envelope: ClientEnvelope,
    ) -> Result<(), RoomError> {
        let user_id = if envelope.header.user_id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            envelope.header.user_id.clone()
        };

        match &envelope.command {
            ClientCommand::Create { .. } => {
                if self.is_in_live_room(conn) {
                    debug!("create from a connection already in a room");
                    return self.send_already_in_room(conn, user_id);
                }
                let room = self.create_room();
                conn.set_identity(&user_id, room.id());
                room.submit(RoomMessage {
                    user_id,
                    command: envelope.command,
                    joiner: Some(conn.joiner()),
                })
                .await
            }
            ClientCommand::Join { .. } => {
                if self.is_in_live_room(conn) {
                    debug!("join from a connection already in a room");
                    return self.send_already_in_room(conn, user_id);
                }
                let Some(room) = self.room(&envelope.header.room_id) else {
                    debug!(room = %envelope.header.room_id, "join for unknown room");
                    return self.send_unknown_room(conn, user_id);
                };
                conn.set_identity(&user_id, room.id());
                room.submit(RoomMessage {
                    user_id,
                    command: envelope.command,
                    joiner: Some(conn.joiner()),
                })
                .await
            }
            _ => {
                let room_id = conn
                    .room_id()
                    .unwrap_or_else(|| envelope.header.room_id.clone());
                let Some(room) = self.room(&room_id) else {
                    debug!(room = %room_id, "frame for unknown room");
                    return self.send_unknown_room(conn, user_id);
                };
                let leaving = matches!(envelope.command, ClientCommand::Leave);
                room.submit(RoomMessage {
                    user_id,
                    command: envelope.command,
                    joiner: None,
                })
                .await?;
                if leaving {
                    conn.clear_identity();
                }
                Ok(())
            }
        }
    }

    /// Handles a transport-level disconnect: the hiker leaves its room as
    /// if it had sent `leave`.
    pub async fn disconnect(&self, conn: &Connection) {
        let (Some(user_id), Some(room_id)) = (conn.user_id(), conn.room_id()) else {
            return;
        };
        conn.clear_identity();
        if let Some(room) = self.room(&room_id) {
            let _ = room
                .submit(RoomMessage {
                    user_id,
                    command: ClientCommand::Leave,
                    joiner: None,
                })
                .await;
        }
        if let Some(drain) = conn
            .drain
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            drain.abort();
        }
    }

    /// Whether the connection's bound room still exists. A stale binding
    /// (the room closed underneath the connection) does not count.
    fn is_in_live_room(&self, conn: &Connection) -> bool {
        conn.room_id()
            .is_some_and(|room_id| self.room(&room_id).is_some())
    }

    /// Rejects a create/join from a connection that is already a member of
    /// a live room; admitting it would orphan the existing membership.
    fn send_already_in_room(&self, conn: &Connection, user_id: String) -> Result<(), RoomError> {
        let reply = ServerEnvelope::new(
            Protocol::Error,
            "",
            &user_id,
            ResponseBody::Failure {
                kind: Delivery::Direct,
                status: Status::Error,
                message: "already in a room".to_owned(),
            },
        );
        conn.outbox
            .try_send(reply)
            .map_err(|_| RoomError::DeliveryFailed(user_id))
    }

    /// Answers an unknown-room frame directly on the connection's queue.
    fn send_unknown_room(&self, conn: &Connection, user_id: String) -> Result<(), RoomError> {
        let reply = ServerEnvelope::new(
            Protocol::Error,
            "",
            &user_id,
            ResponseBody::ErrorNotice {
                message: "Room ID Does Not Exist".to_owned(),
            },
        );
        conn.outbox
            .try_send(reply)
            .map_err(|_| RoomError::DeliveryFailed(user_id))
    }

    fn locked_rooms(&self) -> MutexGuard<'_, HashMap<String, Arc<Room>>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
