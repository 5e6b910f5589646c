//! Chat domain values
//!
//! `Message` is what polling workers emit, `Notification` is what the relay
//! posts to rooms. `HistoryItem` mirrors the remote history API payload and
//! is converted into `Message` once the owning room is known.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::types::{MessageId, RoomId};

/// Sender name used for the relay's own notifications
pub const NOTIFIER_NAME: &str = "chat-relay";

/// A chat participant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub name: String,
    pub mention_name: String,
}

impl User {
    /// Build a user from the loosely typed `from`/`mentions` API values
    ///
    /// Messages posted by people carry an object, notifications carry only
    /// the sender's display name. Fields of the wrong type are skipped.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => User::default(),
            Value::String(name) => User {
                name: name.clone(),
                ..User::default()
            },
            Value::Object(fields) => {
                let id = fields
                    .get("id")
                    .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
                    .unwrap_or_default();
                let text = |key: &str| {
                    fields
                        .get(key)
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                };
                User {
                    id,
                    name: text("name"),
                    mention_name: text("mention_name"),
                }
            }
            other => {
                warn!("cannot convert sender value {}", other);
                User::default()
            }
        }
    }
}

/// A message received in a joined room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub date: String,
    pub from: User,
    pub mentions: Vec<User>,
    pub message: String,
    pub message_format: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// One entry of the remote room history response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryItem {
    pub id: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub from: Value,
    #[serde(default)]
    pub mentions: Vec<Value>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub message_format: String,
    #[serde(default, rename = "type")]
    pub kind: String,
}

impl HistoryItem {
    /// Attach the room id and normalise the sender fields
    pub fn into_message(self, room_id: &RoomId) -> Message {
        Message {
            id: MessageId(self.id),
            room_id: room_id.clone(),
            date: self.date,
            from: User::from_value(&self.from),
            mentions: self.mentions.iter().map(User::from_value).collect(),
            message: self.message,
            message_format: self.message_format,
            kind: self.kind,
        }
    }
}

/// Notification background colour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    #[default]
    Yellow,
    Green,
    Red,
    Purple,
    Gray,
    Random,
}

impl Color {
    /// Case-insensitive lookup; unknown names fall back to yellow
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "green" => Color::Green,
            "red" => Color::Red,
            "purple" => Color::Purple,
            "gray" => Color::Gray,
            "random" => Color::Random,
            _ => Color::Yellow,
        }
    }
}

/// A room notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub message: String,
    pub message_format: String,
    pub notify: bool,
    pub color: Color,
    pub from: String,
}

impl Notification {
    fn from_relay(message: &str, color: Color) -> Self {
        Self {
            message: message.to_string(),
            message_format: "text".to_string(),
            notify: false,
            color,
            from: NOTIFIER_NAME.to_string(),
        }
    }

    pub fn startup() -> Self {
        Self::from_relay("Chat relay starting up...", Color::Green)
    }

    pub fn shutdown() -> Self {
        Self::from_relay("Chat relay shutting down...", Color::Red)
    }

    pub fn join() -> Self {
        Self::from_relay("Hello! I've joined this room...", Color::Green)
    }

    pub fn leave() -> Self {
        Self::from_relay("I'm leaving now, bye!", Color::Red)
    }
}
