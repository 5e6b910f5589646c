//! Chat Room Relay Library
//!
//! Keeps a persisted set of joined remote chat rooms, polls each of them for
//! new messages and funnels everything into one ordered channel. A WebSocket
//! command surface exposes join/leave/send/notify/broadcast and pushes the
//! relayed messages to connected clients.
//!
//! # Architecture
//! - `Rooms` is the registry: room id -> polling worker, guarded by one
//!   `RwLock`, with the membership snapshot rewritten on every change
//! - Each joined room runs a background task that walks the room history
//!   with a cursor and pushes messages into the shared `mpsc` channel
//! - `ChatRelay` is the facade combining the registry with the transport
//! - `ChatServer` is an actor owning the WebSocket clients; it drains the
//!   message channel and runs client commands against the relay
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//! use chat_relay::{ChatRelay, HttpTransport, MembershipStore, PollConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(HttpTransport::new(
//!         "https://api.hipchat.com".parse()?,
//!         vec!["token".to_string()],
//!     )?);
//!     let (tx, mut rx) = mpsc::channel(256);
//!     let relay = ChatRelay::start(
//!         MembershipStore::new("/tmp/chat-relay/rooms.json"),
//!         transport,
//!         tx,
//!         PollConfig::default(),
//!     )
//!     .await?;
//!
//!     relay.join_room(&"ops".into()).await?;
//!     while let Some(message) = rx.recv().await {
//!         println!("{}: {}", message.from.name, message.message);
//!     }
//!     Ok(())
//! }
//! ```

pub mod chat;
pub mod config;
pub mod error;
pub mod handler;
pub mod message;
pub mod registry;
pub mod relay;
pub mod room;
pub mod server;
pub mod store;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use chat::{Color, Message, Notification, User};
pub use config::Config;
pub use error::{AppError, ConfigError, RelayError, SendError, StoreError, TransportError};
pub use handler::handle_connection;
pub use message::{ClientMessage, ErrorCode, ServerMessage};
pub use registry::Rooms;
pub use relay::ChatRelay;
pub use room::{PollConfig, RoomHandle, WorkerState};
pub use server::{ChatServer, ServerCommand};
pub use store::MembershipStore;
pub use transport::{ChatTransport, HttpTransport};
pub use types::{ClientId, MessageId, RoomId};
