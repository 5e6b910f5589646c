//! Command surface protocol definitions
//!
//! JSON-based bidirectional protocol using Serde's tagged enum for
//! type-safe serialization/deserialization. Clients send commands, the
//! server answers each with a success or failure event and pushes every
//! message received in a joined room.

use serde::{Deserialize, Serialize};

use crate::chat::{Color, Message, Notification};
use crate::error::AppError;
use crate::types::RoomId;

/// Client → Server command
///
/// Missing fields decode as empty strings and are rejected by validation,
/// so the client gets a typed failure event rather than a decode error.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a room and start relaying its messages
    JoinRoom {
        #[serde(default)]
        room_id: String,
    },
    /// Leave a room
    LeaveRoom {
        #[serde(default)]
        room_id: String,
    },
    /// Post a message to a room
    SendMessage {
        #[serde(default)]
        room_id: String,
        #[serde(default)]
        message: String,
    },
    /// Post a notification to a room
    SendNotification(NotificationInput),
    /// Post a message to every joined room
    Broadcast {
        #[serde(default)]
        message: String,
    },
    /// List joined rooms
    JoinedRooms,
}

/// Notification fields as sent by clients
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationInput {
    pub room_id: String,
    pub message: String,
    pub message_format: String,
    pub notify: bool,
    pub color: String,
    pub from: String,
}

impl NotificationInput {
    /// Required: room id, message and sender
    pub fn validate(&self) -> Result<(), String> {
        require(&[
            ("room id", self.room_id.as_str()),
            ("message", self.message.as_str()),
            ("from", self.from.as_str()),
        ])
    }

    pub fn to_notification(&self) -> Notification {
        Notification {
            message: self.message.clone(),
            message_format: self.message_format.clone(),
            notify: self.notify,
            color: Color::parse(&self.color),
            from: self.from.clone(),
        }
    }
}

/// Fails with `missing fields: [a, b]` listing every empty field
pub fn require(fields: &[(&str, &str)]) -> Result<(), String> {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| *name)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(format!("missing fields: [{}]", missing.join(", ")))
    }
}

/// Server → Client event
///
/// All events from server to client. Uses tagged enum with snake_case naming.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection successful, client ID issued
    Connected { client_id: String },
    RoomJoined { room_id: String },
    JoinRoomFailed { room_id: String, error: String },
    RoomLeft { room_id: String },
    LeaveRoomFailed { room_id: String, error: String },
    MessageSent { room_id: String, message: String },
    SendMessageFailed {
        room_id: String,
        message: String,
        error: String,
    },
    NotificationSent {
        #[serde(flatten)]
        notification: NotificationInput,
    },
    SendNotificationFailed {
        #[serde(flatten)]
        notification: NotificationInput,
        error: String,
    },
    BroadcastSent { message: String },
    BroadcastFailed { message: String, error: String },
    JoinedRooms { room_ids: Vec<RoomId> },
    /// A message arrived in a joined room
    ReceivedMessage { message: Message },
    /// Request could not be processed
    Error { code: ErrorCode, message: String },
}

/// Error codes for ServerMessage::Error
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Invalid message format
    InvalidMessage,
    /// Anything else
    Internal,
}

/// Convert AppError to ServerMessage for client notification
impl From<AppError> for ServerMessage {
    fn from(err: AppError) -> Self {
        let (code, message) = match &err {
            AppError::Json(e) => (ErrorCode::InvalidMessage, format!("Invalid message format: {}", e)),
            // Fatal errors are not typically converted (connection closes)
            _ => (ErrorCode::Internal, "Internal error".to_string()),
        };
        ServerMessage::Error { code, message }
    }
}
