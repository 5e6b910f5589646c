//! Joined room and its polling worker
//!
//! Every joined room owns one background task that pulls new messages from
//! the remote history API and pushes them into the shared fan-in channel.
//! The registry only keeps a `RoomHandle` used to stop that task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chat::Message;
use crate::error::TransportError;
use crate::transport::ChatTransport;
use crate::types::{MessageId, RoomId};

/// Maximum messages requested per history call
pub const HISTORY_LIMIT: usize = 100;

/// Pause after a poll that produced nothing
pub const POLL_BACKOFF: Duration = Duration::from_secs(2);

/// Polling parameters shared by all workers
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub backoff: Duration,
    pub history_limit: usize,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            backoff: POLL_BACKOFF,
            history_limit: HISTORY_LIMIT,
        }
    }
}

/// Lifecycle of a room's worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Polling loop running
    Active,
    /// Leave signalled, loop exits at its next check
    Stopping,
    /// Task finished
    Terminated,
}

/// Registry-side handle of a joined room
#[derive(Debug)]
pub struct RoomHandle {
    room_id: RoomId,
    leave_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl RoomHandle {
    /// Start polling `room_id`, forwarding messages into `messages`
    pub fn spawn(
        room_id: RoomId,
        transport: Arc<dyn ChatTransport>,
        messages: mpsc::Sender<Message>,
        config: PollConfig,
    ) -> Self {
        let (leave_tx, leave_rx) = oneshot::channel();
        let worker = RoomWorker {
            room_id: room_id.clone(),
            transport,
            messages,
            leave_rx,
            cursor: None,
            config,
        };
        let task = tokio::spawn(worker.run());

        Self {
            room_id,
            leave_tx: Some(leave_tx),
            task,
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Ask the worker to stop; does not wait for it
    ///
    /// Calling it again is a no-op.
    pub fn leave(&mut self) {
        if let Some(leave_tx) = self.leave_tx.take() {
            // Err means the worker is already gone
            let _ = leave_tx.send(());
        }
    }

    pub fn state(&self) -> WorkerState {
        if self.task.is_finished() {
            WorkerState::Terminated
        } else if self.leave_tx.is_none() {
            WorkerState::Stopping
        } else {
            WorkerState::Active
        }
    }
}

/// Polling loop state, owned by the spawned task
struct RoomWorker {
    room_id: RoomId,
    transport: Arc<dyn ChatTransport>,
    messages: mpsc::Sender<Message>,
    leave_rx: oneshot::Receiver<()>,
    /// Last delivered message, None until the first poll succeeds
    cursor: Option<MessageId>,
    config: PollConfig,
}

impl RoomWorker {
    async fn run(mut self) {
        info!(room_id = %self.room_id, "started polling");

        loop {
            // A dropped handle stops the worker as well
            match self.leave_rx.try_recv() {
                Err(oneshot::error::TryRecvError::Empty) => {}
                _ => break,
            }

            if !self.poll_once().await {
                break;
            }
        }

        info!(room_id = %self.room_id, "stopped polling");
    }

    /// One fetch-and-emit round. Returns false once nobody consumes messages.
    async fn poll_once(&mut self) -> bool {
        let batch = match self.fetch().await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(room_id = %self.room_id, "cannot get room history: {}", e);
                Vec::new()
            }
        };

        let Some(last) = batch.last() else {
            tokio::time::sleep(self.config.backoff).await;
            return true;
        };
        self.cursor = Some(last.id.clone());

        for message in batch {
            if self.messages.send(message).await.is_err() {
                debug!(room_id = %self.room_id, "message channel closed");
                return false;
            }
        }
        true
    }

    async fn fetch(&self) -> Result<Vec<Message>, TransportError> {
        let Some(cursor) = &self.cursor else {
            // Start from the newest message instead of replaying history
            return self.transport.get_messages(&self.room_id, None, 1).await;
        };

        let mut messages = self
            .transport
            .get_messages(&self.room_id, Some(cursor), self.config.history_limit)
            .await?;

        // The API echoes the cursor message as the first item
        if messages.len() > 1 {
            messages.remove(0);
            Ok(messages)
        } else {
            Ok(Vec::new())
        }
    }
}
