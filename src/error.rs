//! Error types for the relay
//!
//! Defines transport, persistence, relay-operation, configuration and
//! command-surface errors. Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::RoomId;

/// Remote chat API call failures
#[derive(Debug, Error)]
pub enum TransportError {
    /// Request could not be sent or the body could not be read
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// Every retry attempt failed
    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<TransportError>,
    },

    /// The token pool has been closed
    #[error("client pool closed")]
    PoolClosed,

    /// A transport needs at least one auth token
    #[error("no auth tokens provided")]
    NoTokens,

    /// Failure reported by a non-HTTP transport
    #[error("{0}")]
    Remote(String),
}

/// Membership snapshot persistence errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid room list in {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors surfaced by relay operations
///
/// Polling failures never show up here; they are absorbed by the workers.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Join/leave/explicit notification could not be delivered
    #[error("cannot send notification to room={room_id}: {source}")]
    Notification {
        room_id: RoomId,
        #[source]
        source: TransportError,
    },

    /// Explicit message could not be delivered
    #[error("cannot send message to room={room_id}: {source}")]
    Send {
        room_id: RoomId,
        #[source]
        source: TransportError,
    },

    /// Some rooms did not receive a broadcast
    #[error("failed messages: [{}]", list_failures(.failures))]
    Broadcast { failures: Vec<(RoomId, TransportError)> },

    /// Persisted membership could not be loaded
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Operation attempted after shutdown
    #[error("relay has been shut down")]
    ShutDown,
}

impl RelayError {
    /// Room ids that failed during a broadcast (empty for other variants)
    pub fn failed_rooms(&self) -> Vec<&RoomId> {
        match self {
            RelayError::Broadcast { failures } => failures.iter().map(|(id, _)| id).collect(),
            _ => Vec::new(),
        }
    }
}

fn list_failures(failures: &[(RoomId, TransportError)]) -> String {
    failures
        .iter()
        .map(|(room_id, err)| format!("room={}: {}", room_id, err))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Configuration errors (fatal at startup)
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("env={0} not set")]
    Missing(&'static str),

    #[error("env={key} is not valid: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Command-surface connection errors
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send error (fatal - internal channel broken)
    #[error("Channel send error")]
    ChannelSend,
}

/// Message send errors
///
/// Occurs when attempting to send events through closed channels.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,
}
