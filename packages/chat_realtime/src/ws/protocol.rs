//! WebSocket Protocol Types
//!
//! JSON envelopes exchanged over the realtime connection. Every frame is a
//! text frame carrying `{ "type": ..., "payload": ... }`, except the first
//! client frame which is the bare credential `{ "token": ... }`.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// First frame a client sends after the socket opens.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthRequest {
    #[serde(default)]
    pub token: Option<String>,
}

/// Raw inbound envelope, decoded before the payload is interpreted so that
/// unknown event types and malformed payloads can be told apart.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Events sent FROM the client TO the server after authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    TypingStart { conversation_id: String },
    TypingStop { conversation_id: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypingPayload {
    conversation_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum InboundError {
    #[error("invalid envelope: {0}")]
    Envelope(serde_json::Error),

    #[error("unknown event type: {0}")]
    UnknownType(String),

    #[error("malformed payload for {kind}: {source}")]
    Payload {
        kind: String,
        source: serde_json::Error,
    },
}

impl ClientEvent {
    pub const TYPING_START: &'static str = "typing:start";
    pub const TYPING_STOP: &'static str = "typing:stop";

    /// Decode a text frame into a client event.
    pub fn parse(text: &str) -> Result<Self, InboundError> {
        let envelope: InboundEnvelope =
            serde_json::from_str(text).map_err(InboundError::Envelope)?;
        Self::from_envelope(envelope)
    }

    pub fn from_envelope(envelope: InboundEnvelope) -> Result<Self, InboundError> {
        let InboundEnvelope { kind, payload } = envelope;
        match kind.as_str() {
            Self::TYPING_START | Self::TYPING_STOP => {
                let typing: TypingPayload = match serde_json::from_value(payload) {
                    Ok(p) => p,
                    Err(source) => return Err(InboundError::Payload { kind, source }),
                };
                if kind == Self::TYPING_START {
                    Ok(Self::TypingStart {
                        conversation_id: typing.conversation_id,
                    })
                } else {
                    Ok(Self::TypingStop {
                        conversation_id: typing.conversation_id,
                    })
                }
            }
            _ => Err(InboundError::UnknownType(kind)),
        }
    }
}

/// Events sent FROM the server TO the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerEvent {
    #[serde(rename = "auth:success")]
    AuthSuccess,

    /// Snapshot of online counterparts, sent once right after authentication.
    #[serde(rename = "users:online", rename_all = "camelCase")]
    UsersOnline { online_user_ids: Vec<String> },

    #[serde(rename = "user:online", rename_all = "camelCase")]
    UserOnline { user_id: String },

    #[serde(rename = "user:offline", rename_all = "camelCase")]
    UserOffline { user_id: String },

    #[serde(rename = "typing:update", rename_all = "camelCase")]
    TypingUpdate {
        user_id: String,
        conversation_id: String,
        is_typing: bool,
    },

    #[serde(rename = "message:new", rename_all = "camelCase")]
    MessageNew {
        conversation_id: String,
        message: serde_json::Value,
    },

    #[serde(rename = "group:update")]
    GroupUpdate(GroupUpdate),
}

impl ServerEvent {
    /// Wire name of the event type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthSuccess => "auth:success",
            Self::UsersOnline { .. } => "users:online",
            Self::UserOnline { .. } => "user:online",
            Self::UserOffline { .. } => "user:offline",
            Self::TypingUpdate { .. } => "typing:update",
            Self::MessageNew { .. } => "message:new",
            Self::GroupUpdate(_) => "group:update",
        }
    }

    /// Serialize once so the same frame can be shared by every recipient.
    pub fn encode(&self) -> Result<Arc<str>, serde_json::Error> {
        serde_json::to_string(self).map(Arc::from)
    }
}

/// Payload of a `group:update` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupUpdate {
    pub group_id: String,
    #[serde(flatten)]
    pub change: GroupChange,
}

/// Membership or metadata change carried by `group:update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum GroupChange {
    #[serde(rename_all = "camelCase")]
    Created { group_info: serde_json::Value },
    #[serde(rename_all = "camelCase")]
    Updated {
        group_info: serde_json::Value,
        by_user_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Added { user_id: String, by_user_id: String },
    #[serde(rename_all = "camelCase")]
    Removed { user_id: String, by_user_id: String },
    #[serde(rename_all = "camelCase")]
    Left { user_id: String },
}

/// Application close codes sent in the WebSocket close frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    InvalidToken,
    UserNotFound,
    NoTokenProvided,
    InvalidTokenFormat,
    ReconnectedElsewhere,
    ServerShutdown,
    InternalError,
}

impl CloseCode {
    pub fn code(self) -> u16 {
        match self {
            Self::InvalidToken => 4000,
            Self::UserNotFound => 4001,
            Self::NoTokenProvided => 4002,
            Self::InvalidTokenFormat => 4003,
            Self::ReconnectedElsewhere => 4004,
            Self::ServerShutdown => 1001,
            Self::InternalError => 1011,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Self::InvalidToken => "Invalid token",
            Self::UserNotFound => "User not found",
            Self::NoTokenProvided => "No token provided",
            Self::InvalidTokenFormat => "Invalid token format",
            Self::ReconnectedElsewhere => "Reconnected elsewhere",
            Self::ServerShutdown => "Server shutting down",
            Self::InternalError => "Internal error",
        }
    }
}
