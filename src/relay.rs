//! Relay facade
//!
//! Composes the room registry with the remote transport and exposes the
//! operations the command surface needs, plus the startup and shutdown
//! lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::chat::{Message, Notification};
use crate::error::RelayError;
use crate::registry::Rooms;
use crate::room::PollConfig;
use crate::store::MembershipStore;
use crate::transport::ChatTransport;
use crate::types::RoomId;

/// Joined rooms plus the operations on them
pub struct ChatRelay {
    transport: Arc<dyn ChatTransport>,
    rooms: Rooms,
    shut_down: AtomicBool,
}

impl ChatRelay {
    /// Restore persisted rooms and announce the startup in each of them
    ///
    /// Only an unreadable membership snapshot fails; rooms that cannot be
    /// notified are logged and kept.
    pub async fn start(
        store: MembershipStore,
        transport: Arc<dyn ChatTransport>,
        messages: mpsc::Sender<Message>,
        config: PollConfig,
    ) -> Result<Self, RelayError> {
        let rooms = Rooms::load(store, transport.clone(), messages, config).await?;
        let relay = Self {
            transport,
            rooms,
            shut_down: AtomicBool::new(false),
        };

        let startup = Notification::startup();
        for room_id in relay.rooms.list_ids().await {
            if let Err(e) = relay.transport.send_notification(&room_id, &startup).await {
                error!(room_id = %room_id, "cannot send startup notification: {}", e);
            }
        }

        Ok(relay)
    }

    pub async fn joined_room_ids(&self) -> Vec<RoomId> {
        self.rooms.list_ids().await
    }

    /// Join a room and announce it; joining twice is a no-op
    ///
    /// A failed announcement is reported, but the room stays joined.
    pub async fn join_room(&self, room_id: &RoomId) -> Result<(), RelayError> {
        self.ensure_running()?;

        info!(room_id = %room_id, "joining room");
        if !self.rooms.add(room_id).await {
            if self.rooms.is_closed().await {
                return Err(RelayError::ShutDown);
            }
            info!(room_id = %room_id, "room already joined");
            return Ok(());
        }

        self.notify(room_id, &Notification::join()).await
    }

    /// Say goodbye and leave; the room is left even if the goodbye fails
    pub async fn leave_room(&self, room_id: &RoomId) -> Result<(), RelayError> {
        self.ensure_running()?;

        if !self.rooms.contains(room_id).await {
            return Ok(());
        }

        let result = self.notify(room_id, &Notification::leave()).await;
        info!(room_id = %room_id, "leaving room");
        self.rooms.remove(room_id).await;
        result
    }

    pub async fn send_message(&self, room_id: &RoomId, message: &str) -> Result<(), RelayError> {
        self.ensure_running()?;

        self.transport
            .send_message(room_id, message)
            .await
            .map_err(|source| RelayError::Send {
                room_id: room_id.clone(),
                source,
            })
    }

    pub async fn send_notification(
        &self,
        room_id: &RoomId,
        notification: &Notification,
    ) -> Result<(), RelayError> {
        self.ensure_running()?;
        self.notify(room_id, notification).await
    }

    /// Send `message` to every joined room, collecting all failures
    pub async fn broadcast_message(&self, message: &str) -> Result<(), RelayError> {
        self.ensure_running()?;

        info!("broadcasting message");
        let mut failures = Vec::new();
        for room_id in self.rooms.list_ids().await {
            if let Err(e) = self.transport.send_message(&room_id, message).await {
                failures.push((room_id, e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(RelayError::Broadcast { failures })
        }
    }

    /// Stop all workers, close the registry and say goodbye
    ///
    /// The message channel ends once the stopped workers have exited.
    /// Membership is kept on disk so the same rooms are rejoined on restart.
    /// Every operation fails with `RelayError::ShutDown` afterwards.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let shutdown = Notification::shutdown();
        for room_id in self.rooms.stop_all().await {
            if let Err(e) = self.transport.send_notification(&room_id, &shutdown).await {
                error!(room_id = %room_id, "cannot send shutdown notification: {}", e);
            }
        }
        info!("relay shut down");
    }

    fn ensure_running(&self) -> Result<(), RelayError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(RelayError::ShutDown);
        }
        Ok(())
    }

    async fn notify(&self, room_id: &RoomId, notification: &Notification) -> Result<(), RelayError> {
        self.transport
            .send_notification(room_id, notification)
            .await
            .map_err(|source| RelayError::Notification {
                room_id: room_id.clone(),
                source,
            })
    }
}
