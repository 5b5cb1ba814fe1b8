//! Wire message protocol for jam rooms.
//!
//! Every broadcast event and every inbound client command is a single JSON
//! object ([`JamMessage`]) tagged by its `type` field. Inbound messages are
//! narrowed into the closed [`ClientCommand`] enum before the coordinator
//! acts on them, so unknown or server-only types are rejected up front.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{JamError, JamResult};

/// Discriminator carried in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Full room snapshot sent to a joining client.
    #[serde(rename = "init")]
    Init,
    #[serde(rename = "user:joined")]
    UserJoined,
    #[serde(rename = "user:left")]
    UserLeft,
    #[serde(rename = "pause")]
    Pause,
    #[serde(rename = "play")]
    Play,
    #[serde(rename = "seek")]
    Seek,
    #[serde(rename = "load")]
    Load,
    #[serde(rename = "ready")]
    Ready,
    /// The host left; the room no longer exists.
    #[serde(rename = "jam:closed")]
    JamClosed,
    /// Gateway reply to a client `heartbeat`.
    #[serde(rename = "heartbeat:ack")]
    HeartbeatAck,

    // Inbound commands
    #[serde(rename = "host:load")]
    HostLoad,
    #[serde(rename = "host:play")]
    HostPlay,
    #[serde(rename = "host:pause")]
    HostPause,
    #[serde(rename = "host:seek")]
    HostSeek,
    #[serde(rename = "client:ready")]
    ClientReady,
    /// Keep-alive; answered by the gateway, never reaches the coordinator.
    #[serde(rename = "heartbeat")]
    Heartbeat,
}

impl MessageType {
    /// Returns the wire name of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::UserJoined => "user:joined",
            Self::UserLeft => "user:left",
            Self::Pause => "pause",
            Self::Play => "play",
            Self::Seek => "seek",
            Self::Load => "load",
            Self::Ready => "ready",
            Self::JamClosed => "jam:closed",
            Self::HeartbeatAck => "heartbeat:ack",
            Self::HostLoad => "host:load",
            Self::HostPlay => "host:play",
            Self::HostPause => "host:pause",
            Self::HostSeek => "host:seek",
            Self::ClientReady => "client:ready",
            Self::Heartbeat => "heartbeat",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One protocol message, inbound or broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JamMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<String>,
    /// Playback offset in milliseconds. Always present on the wire.
    #[serde(default)]
    pub position: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loaded: Option<HashMap<String, bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_names: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_images: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JamMessage {
    /// Creates a message of the given type with every optional field unset.
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind,
            track_id: None,
            position: 0,
            paused: None,
            host_id: None,
            user_id: None,
            users: None,
            loaded: None,
            user_names: None,
            user_images: None,
            error: None,
        }
    }

    /// `user:joined` carrying the joiner's resolved display metadata.
    pub fn user_joined(user_id: &str, display_name: &str, avatar_url: &str) -> Self {
        let mut msg = Self::new(MessageType::UserJoined);
        msg.user_id = Some(user_id.to_string());
        msg.user_names = Some(HashMap::from([(user_id.to_string(), display_name.to_string())]));
        msg.user_images = Some(HashMap::from([(user_id.to_string(), avatar_url.to_string())]));
        msg
    }

    pub fn user_left(user_id: &str) -> Self {
        let mut msg = Self::new(MessageType::UserLeft);
        msg.user_id = Some(user_id.to_string());
        msg
    }

    pub fn load(track_id: &str) -> Self {
        let mut msg = Self::new(MessageType::Load);
        msg.track_id = Some(track_id.to_string());
        msg.paused = Some(true);
        msg
    }

    pub fn seek(position: i64) -> Self {
        let mut msg = Self::new(MessageType::Seek);
        msg.position = position;
        msg
    }

    pub fn ready(loaded: HashMap<String, bool>) -> Self {
        let mut msg = Self::new(MessageType::Ready);
        msg.loaded = Some(loaded);
        msg
    }

    /// Error reply sent back to a single client; never broadcast.
    pub fn error_reply(kind: MessageType, message: impl Into<String>) -> Self {
        let mut msg = Self::new(kind);
        msg.error = Some(message.into());
        msg
    }

    /// Serializes to the JSON wire form.
    pub fn encode(&self) -> JamResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| JamError::Internal(format!("encode {}: {e}", self.kind)))
    }

    /// Parses the JSON wire form.
    pub fn decode(payload: &[u8]) -> JamResult<Self> {
        serde_json::from_slice(payload).map_err(|e| JamError::InvalidMessage(e.to_string()))
    }
}

/// Commands a client may send. Anything else is a protocol violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Load { track_id: String },
    Play,
    Pause,
    Seek { position: i64 },
    Ready,
}

impl ClientCommand {
    /// Whether only the room host may issue this command.
    pub fn requires_host(&self) -> bool {
        !matches!(self, Self::Ready)
    }
}

impl TryFrom<JamMessage> for ClientCommand {
    type Error = JamError;

    fn try_from(msg: JamMessage) -> Result<Self, Self::Error> {
        match msg.kind {
            MessageType::HostLoad => match msg.track_id {
                Some(track_id) if !track_id.trim().is_empty() => Ok(Self::Load { track_id }),
                _ => Err(JamError::InvalidRequest("host:load requires track_id".into())),
            },
            MessageType::HostPlay => Ok(Self::Play),
            MessageType::HostPause => Ok(Self::Pause),
            MessageType::HostSeek => {
                if msg.position < 0 {
                    return Err(JamError::InvalidRequest(
                        "host:seek position must be >= 0".into(),
                    ));
                }
                Ok(Self::Seek {
                    position: msg.position,
                })
            }
            MessageType::ClientReady => Ok(Self::Ready),
            MessageType::JamClosed => Err(JamError::JamClosed),
            MessageType::Heartbeat => Err(JamError::InvalidMessage(
                "heartbeat is handled by the transport".into(),
            )),
            MessageType::Init
            | MessageType::UserJoined
            | MessageType::UserLeft
            | MessageType::Pause
            | MessageType::Play
            | MessageType::Seek
            | MessageType::Load
            | MessageType::Ready
            | MessageType::HeartbeatAck => Err(JamError::InvalidMessage(format!(
                "{} is a broadcast-only message type",
                msg.kind
            ))),
        }
    }
}
