//! Wire envelopes for the group-session protocol.
//!
//! Every frame carries a `header` naming the protocol, room, and user. The
//! body is protocol-specific: inbound bodies decode into [`ClientCommand`]
//! variants with fixed, named fields (missing or mistyped fields become a
//! structured [`DecodeError`] at decode time), and outbound bodies are
//! [`ResponseBody`] variants with fixed field sets.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{SessionConfigUpdate, TimerConfigUpdate};
use crate::error::DecodeError;

/// Protocol discriminants carried in envelope headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Create,
    Join,
    Ready,
    UpdateConfig,
    Start,
    Pause,
    Resume,
    Leave,
    End,
    ExtraSet,
    ExtraSession,
    SkipBreak,
    // Server-originated.
    Update,
    Kicked,
    NewHost,
    ShortBreak,
    EndModal,
    Error,
}

impl Protocol {
    /// The wire name of this protocol.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Join => "join",
            Self::Ready => "ready",
            Self::UpdateConfig => "updateConfig",
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Leave => "leave",
            Self::End => "end",
            Self::ExtraSet => "extraSet",
            Self::ExtraSession => "extraSession",
            Self::SkipBreak => "skipBreak",
            Self::Update => "update",
            Self::Kicked => "kicked",
            Self::NewHost => "newHost",
            Self::ShortBreak => "shortBreak",
            Self::EndModal => "endModal",
            Self::Error => "Error",
        }
    }
}

/// Envelope header shared by inbound and outbound frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    /// Wire name of the protocol this frame carries.
    pub protocol: String,
    /// The room this frame addresses; empty before a room is assigned.
    #[serde(default)]
    pub room_id: String,
    /// The originating (inbound) or addressed (outbound) user.
    #[serde(default)]
    pub user_id: String,
}

/// A decoded, validated inbound frame.
#[derive(Debug, Clone)]
pub struct ClientEnvelope {
    /// The frame header as received.
    pub header: Header,
    /// The validated protocol operation.
    pub command: ClientCommand,
}

/// Participant-originated protocol operations.
#[derive(Debug, Clone)]
pub enum ClientCommand {
    /// Create a new room; the caller becomes host.
    Create {
        /// Display name of the creating hiker.
        username: String,
    },
    /// Join an existing room.
    Join {
        /// Display name of the joining hiker.
        username: String,
    },
    /// Toggle the caller's ready flag.
    Ready,
    /// Merge configuration fields into the timer and session (host only).
    UpdateConfig {
        /// Timer fields to merge, if any.
        timer: Option<TimerConfigUpdate>,
        /// Session fields to merge, if any.
        session: Option<SessionConfigUpdate>,
    },
    /// Begin the focus/break cycle.
    Start,
    /// Pause the caller, taking a strike.
    Pause,
    /// Resume the caller.
    Resume,
    /// Leave the room.
    Leave,
    /// End the running session and reset all transient state.
    End,
    /// Add one more set to the configured count.
    ExtraSet,
    /// Add three more sets to the configured count.
    ExtraSession,
    /// Return to the focus phase immediately.
    SkipBreak,
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    header: Header,
    #[serde(default)]
    message: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct NamePayload {
    username: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateConfigPayload {
    #[serde(default)]
    timer_config: Option<TimerConfigUpdate>,
    #[serde(default)]
    session_config: Option<SessionConfigUpdate>,
}

fn parse_payload<T: serde::de::DeserializeOwned>(
    protocol: &'static str,
    message: serde_json::Value,
) -> Result<T, DecodeError> {
    serde_json::from_value(message).map_err(|source| DecodeError::InvalidPayload { protocol, source })
}

/// Decodes one inbound text frame into a validated [`ClientEnvelope`].
///
/// # Errors
///
/// Returns [`DecodeError::Malformed`] for frames that are not valid envelope
/// JSON, [`DecodeError::UnknownProtocol`] for protocols this server does not
/// recognize, and [`DecodeError::InvalidPayload`] when the message body does
/// not carry the fields the protocol requires.
pub fn decode_client_envelope(text: &str) -> Result<ClientEnvelope, DecodeError> {
    let raw: RawEnvelope = serde_json::from_str(text)?;
    let command = match raw.header.protocol.as_str() {
        "create" => {
            let payload: NamePayload = parse_payload("create", raw.message)?;
            ClientCommand::Create {
                username: payload.username,
            }
        }
        "join" => {
            let payload: NamePayload = parse_payload("join", raw.message)?;
            ClientCommand::Join {
                username: payload.username,
            }
        }
        "ready" => ClientCommand::Ready,
        "updateConfig" => {
            let payload: UpdateConfigPayload = parse_payload("updateConfig", raw.message)?;
            ClientCommand::UpdateConfig {
                timer: payload.timer_config,
                session: payload.session_config,
            }
        }
        "start" => ClientCommand::Start,
        "pause" => ClientCommand::Pause,
        "resume" => ClientCommand::Resume,
        "leave" => ClientCommand::Leave,
        "end" => ClientCommand::End,
        "extraSet" => ClientCommand::ExtraSet,
        "extraSession" => ClientCommand::ExtraSession,
        "skipBreak" => ClientCommand::SkipBreak,
        other => return Err(DecodeError::UnknownProtocol(other.to_owned())),
    };
    Ok(ClientEnvelope {
        header: raw.header,
        command,
    })
}

/// Whether an outbound body was addressed to one hiker or the whole room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
    Direct,
    Broadcast,
}

/// Outcome marker on direct responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Point-in-time copy of one hiker, safe to serialize into responses.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HikerSnapshot {
    /// Hiker identifier, unique within the room.
    pub id: String,
    /// Display name.
    pub username: String,
    /// Whether this hiker currently holds the host flag.
    pub is_host: bool,
    /// Distance accrued by this hiker in the current session.
    pub distance: f64,
    /// Ready flag.
    pub is_ready: bool,
    /// Paused flag.
    pub is_paused: bool,
    /// Strikes taken by this hiker.
    pub strikes: u8,
    /// Tokens earned by this hiker.
    pub tokens_earned: u32,
    /// Bonus tokens held by this hiker.
    pub bonus_tokens: u32,
}

/// Point-in-time copy of the shared progress aggregate.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Session display name.
    pub name: String,
    /// Collective distance.
    pub distance: f64,
    /// Current level, always `floor(distance / 0.5) + 1`.
    pub level: u32,
    /// High-water mark of `level`; never decreases.
    pub highest_completed_level: u32,
    /// Collective strikes.
    pub strikes: u8,
    /// Tokens earned so far.
    pub tokens_earned: u32,
    /// Bonus tokens held.
    pub bonus_tokens: u32,
}

/// Phase of the focus/break cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    /// Not started.
    Idle,
    /// Focus phase; distance accrues each tick.
    Focus,
    /// Break phase; no distance accrues.
    Break,
    /// All sets completed; waiting for an explicit continue or end.
    AwaitingDecision,
}

/// Point-in-time copy of the phase timer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    /// Current phase.
    pub phase: Phase,
    /// Whether the cycle has been started and not ended.
    pub is_running: bool,
    /// When the current phase began.
    pub start_time: Option<DateTime<Utc>>,
    /// Duration of the current phase in seconds.
    pub duration: u64,
    /// Configured focus duration in seconds.
    pub focus_time: u16,
    /// Configured short break duration in seconds.
    pub short_break_time: u16,
    /// Configured long break duration in seconds.
    pub long_break_time: u16,
    /// Configured set count.
    pub sets: u8,
    /// Completed set count.
    pub completed_sets: u8,
    /// Pace in distance units per hour.
    pub pace: f64,
    /// Whether the cycle continues automatically after the last set.
    pub auto_continue: bool,
}

/// Map of hiker id to snapshot, as serialized into responses.
pub type RosterSnapshot = HashMap<String, HikerSnapshot>;

/// Outbound response bodies, one fixed field set per protocol.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    /// Direct reply to `create`.
    #[serde(rename_all = "camelCase")]
    RoomCreated {
        status: Status,
        message: String,
        hikers: RosterSnapshot,
    },
    /// Direct reply to `join`, carrying the full room state.
    #[serde(rename_all = "camelCase")]
    JoinWelcome {
        #[serde(rename = "type")]
        kind: Delivery,
        status: Status,
        message: String,
        hikers: RosterSnapshot,
        session: SessionSnapshot,
        timer: TimerSnapshot,
    },
    /// Membership change notice: join/ready/leave/newHost/kicked.
    #[serde(rename_all = "camelCase")]
    Roster {
        #[serde(rename = "type")]
        kind: Delivery,
        status: Option<Status>,
        message: String,
        hikers: RosterSnapshot,
    },
    /// Reply to `updateConfig` with the merged configuration.
    #[serde(rename_all = "camelCase")]
    ConfigUpdated {
        #[serde(rename = "type")]
        kind: Delivery,
        status: Option<Status>,
        message: String,
        hikers: RosterSnapshot,
        session_config: SessionSnapshot,
        timer_config: TimerSnapshot,
    },
    /// Broadcast reply to `start`.
    #[serde(rename_all = "camelCase")]
    SessionStarting {
        message: String,
        session: SessionSnapshot,
        timer: TimerSnapshot,
    },
    /// Periodic progress broadcast driven by the timer tick.
    #[serde(rename_all = "camelCase")]
    Progress {
        #[serde(rename = "type")]
        kind: Delivery,
        hikers: RosterSnapshot,
        session: SessionSnapshot,
        timer: TimerSnapshot,
        remaining_time: f64,
    },
    /// Direct reply to a successful `pause`.
    #[serde(rename_all = "camelCase")]
    PauseAccepted {
        #[serde(rename = "type")]
        kind: Delivery,
        status: Status,
        message: String,
        session: SessionSnapshot,
    },
    /// Broadcast to the rest of the room after a `pause`.
    #[serde(rename_all = "camelCase")]
    PauseNotice {
        #[serde(rename = "type")]
        kind: Delivery,
        paused_hiker_id: String,
        message: String,
        session: SessionSnapshot,
    },
    /// Direct reply to a successful `resume`.
    #[serde(rename_all = "camelCase")]
    ResumeAccepted {
        #[serde(rename = "type")]
        kind: Delivery,
        status: Status,
        message: String,
        remaining_time: f64,
    },
    /// Broadcast to the rest of the room after a `resume`.
    #[serde(rename_all = "camelCase")]
    ResumeNotice {
        resume_hiker_id: String,
        remaining_time: f64,
        message: String,
    },
    /// Phase transition broadcast: shortBreak/endModal.
    #[serde(rename_all = "camelCase")]
    PhaseChange {
        #[serde(rename = "type")]
        kind: Delivery,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        session: SessionSnapshot,
        timer: TimerSnapshot,
        hikers: RosterSnapshot,
    },
    /// Bare notification: end/skipBreak/extraSet/extraSession.
    #[serde(rename_all = "camelCase")]
    Notice {
        #[serde(rename = "type")]
        kind: Delivery,
        message: String,
    },
    /// Direct failure reply for a rejected operation.
    #[serde(rename_all = "camelCase")]
    Failure {
        #[serde(rename = "type")]
        kind: Delivery,
        status: Status,
        message: String,
    },
    /// Server-level error, e.g. unknown room id.
    #[serde(rename_all = "camelCase")]
    ErrorNotice { message: String },
}

/// An outbound frame ready for delivery.
#[derive(Debug, Clone, Serialize)]
pub struct ServerEnvelope {
    /// Outbound header; `user_id` is the recipient.
    pub header: Header,
    /// Protocol-specific response body.
    pub response: ResponseBody,
}

impl ServerEnvelope {
    /// Builds an outbound frame addressed to one recipient.
    #[must_use]
    pub fn new(protocol: Protocol, room_id: &str, user_id: &str, response: ResponseBody) -> Self {
        Self {
            header: Header {
                protocol: protocol.as_str().to_owned(),
                room_id: room_id.to_owned(),
                user_id: user_id.to_owned(),
            },
            response,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_create_envelope() {
        let frame = r#"{"header": {"protocol": "create", "roomId": "", "userId": "1"},
                        "message": {"username": "alice"}}"#;
        let envelope = decode_client_envelope(frame).unwrap();
        assert_eq!(envelope.header.user_id, "1");
        match envelope.command {
            ClientCommand::Create { username } => assert_eq!(username, "alice"),
            other => panic!("expected create, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_bodyless_protocols() {
        for protocol in ["ready", "start", "pause", "resume", "leave", "end"] {
            let frame = format!(
                r#"{{"header": {{"protocol": "{protocol}", "roomId": "r", "userId": "1"}}}}"#
            );
            decode_client_envelope(&frame).unwrap();
        }
    }

    #[test]
    fn test_decode_update_config_ignores_unknown_fields() {
        let frame = r#"{"header": {"protocol": "updateConfig", "roomId": "r", "userId": "1"},
                        "message": {"timerConfig": {"focusTime": 600, "flux": 9},
                                    "sessionConfig": {"name": "morning hike"}}}"#;
        let envelope = decode_client_envelope(frame).unwrap();
        match envelope.command {
            ClientCommand::UpdateConfig { timer, session } => {
                assert_eq!(timer.unwrap().focus_time, Some(600));
                assert_eq!(session.unwrap().name.as_deref(), Some("morning hike"));
            }
            other => panic!("expected updateConfig, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_unknown_protocol() {
        let frame = r#"{"header": {"protocol": "teleport", "roomId": "r", "userId": "1"}}"#;
        let err = decode_client_envelope(frame).unwrap_err();
        assert!(matches!(err, crate::error::DecodeError::UnknownProtocol(p) if p == "teleport"));
    }

    #[test]
    fn test_decode_missing_username_is_invalid_payload() {
        let frame = r#"{"header": {"protocol": "join", "roomId": "r", "userId": "1"},
                        "message": {}}"#;
        let err = decode_client_envelope(frame).unwrap_err();
        assert!(matches!(
            err,
            crate::error::DecodeError::InvalidPayload { protocol: "join", .. }
        ));
    }

    #[test]
    fn test_decode_malformed_frame() {
        let err = decode_client_envelope("not json").unwrap_err();
        assert!(matches!(err, crate::error::DecodeError::Malformed(_)));
    }

    #[test]
    fn test_server_envelope_serializes_with_wire_names() {
        let envelope = ServerEnvelope::new(
            Protocol::Error,
            "",
            "1",
            ResponseBody::ErrorNotice {
                message: "Room ID Does Not Exist".to_owned(),
            },
        );
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["header"]["protocol"], "Error");
        assert_eq!(json["response"]["message"], "Room ID Does Not Exist");
    }
}
