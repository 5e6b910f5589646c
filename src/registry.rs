//! Registry of joined rooms
//!
//! Maps room ids to their polling workers and keeps the membership snapshot
//! on disk in step with the map. All mutations, including the snapshot
//! write, happen under the write half of a single `RwLock`; lookups take the
//! read half, so readers never see a half-applied add or remove.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::chat::Message;
use crate::error::StoreError;
use crate::room::{PollConfig, RoomHandle, WorkerState};
use crate::store::MembershipStore;
use crate::transport::ChatTransport;
use crate::types::RoomId;

/// Point-in-time view of one joined room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub room_id: RoomId,
    pub state: WorkerState,
}

struct RoomsState {
    rooms: HashMap<RoomId, RoomHandle>,
    /// Fan-in sender handed to new workers; None once closed
    messages: Option<mpsc::Sender<Message>>,
}

impl RoomsState {
    fn sorted_ids(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> = self.rooms.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Thread-safe set of joined rooms
pub struct Rooms {
    state: RwLock<RoomsState>,
    store: MembershipStore,
    transport: Arc<dyn ChatTransport>,
    config: PollConfig,
}

impl Rooms {
    /// Restore the persisted rooms and start polling each of them
    pub async fn load(
        store: MembershipStore,
        transport: Arc<dyn ChatTransport>,
        messages: mpsc::Sender<Message>,
        config: PollConfig,
    ) -> Result<Self, StoreError> {
        let room_ids = store.load().await?;

        let mut rooms = HashMap::with_capacity(room_ids.len());
        for room_id in room_ids {
            let handle =
                RoomHandle::spawn(room_id.clone(), transport.clone(), messages.clone(), config);
            rooms.insert(room_id, handle);
        }
        info!("restored {} rooms from {:?}", rooms.len(), store.path());

        Ok(Self {
            state: RwLock::new(RoomsState {
                rooms,
                messages: Some(messages),
            }),
            store,
            transport,
            config,
        })
    }

    /// Join `room_id`; false if it is already joined or the registry is closed
    pub async fn add(&self, room_id: &RoomId) -> bool {
        let mut state = self.state.write().await;

        if state.rooms.contains_key(room_id) {
            return false;
        }
        let Some(messages) = state.messages.clone() else {
            warn!(room_id = %room_id, "registry closed, not adding room");
            return false;
        };

        let handle = RoomHandle::spawn(room_id.clone(), self.transport.clone(), messages, self.config);
        state.rooms.insert(room_id.clone(), handle);
        self.store.save(&state.sorted_ids()).await;

        debug!(room_id = %room_id, "room added, {} rooms", state.rooms.len());
        true
    }

    /// Stop polling `room_id` and forget it; false if it was not joined
    pub async fn remove(&self, room_id: &RoomId) -> bool {
        let mut state = self.state.write().await;

        let Some(mut handle) = state.rooms.remove(room_id) else {
            return false;
        };
        handle.leave();
        self.store.save(&state.sorted_ids()).await;

        debug!(room_id = %room_id, "room removed, {} rooms", state.rooms.len());
        true
    }

    pub async fn get(&self, room_id: &RoomId) -> Option<RoomInfo> {
        let state = self.state.read().await;
        state.rooms.get(room_id).map(|handle| RoomInfo {
            room_id: handle.room_id().clone(),
            state: handle.state(),
        })
    }

    pub async fn contains(&self, room_id: &RoomId) -> bool {
        self.state.read().await.rooms.contains_key(room_id)
    }

    /// All joined room ids, sorted
    pub async fn list_ids(&self) -> Vec<RoomId> {
        self.state.read().await.sorted_ids()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.rooms.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// True once `stop_all` has run; closed registries reject every add
    pub async fn is_closed(&self) -> bool {
        self.state.read().await.messages.is_none()
    }

    /// Signal every worker to stop and drop the registry's fan-in sender
    ///
    /// The persisted membership is left untouched. The channel ends once
    /// every worker has exited.
    pub async fn stop_all(&self) -> Vec<RoomId> {
        let mut state = self.state.write().await;
        state.messages = None;
        for handle in state.rooms.values_mut() {
            handle.leave();
        }
        state.sorted_ids()
    }
}
