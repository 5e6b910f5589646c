//! ChatServer Actor implementation
//!
//! The central actor that owns the connected clients. It runs client
//! commands against the relay and drains the relay's message channel,
//! publishing every received chat message to all clients.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::chat::Message;
use crate::error::SendError;
use crate::message::{require, ClientMessage, NotificationInput, ServerMessage};
use crate::relay::ChatRelay;
use crate::types::{ClientId, RoomId};

/// Commands sent from handlers to the ChatServer actor
#[derive(Debug)]
pub enum ServerCommand {
    /// New client connected
    Connect {
        client_id: ClientId,
        sender: mpsc::Sender<ServerMessage>,
    },
    /// Client disconnected
    Disconnect { client_id: ClientId },
    /// Client issued a command
    Request {
        client_id: ClientId,
        request: ClientMessage,
    },
}

/// A connected command-surface client
#[derive(Debug, Clone)]
struct Client {
    sender: mpsc::Sender<ServerMessage>,
}

impl Client {
    async fn send(&self, msg: ServerMessage) -> Result<(), SendError> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| SendError::ChannelClosed)
    }
}

/// The main ChatServer actor
pub struct ChatServer {
    /// All connected clients: ClientId -> Client
    clients: HashMap<ClientId, Client>,
    relay: Arc<ChatRelay>,
    /// Command receiver channel
    receiver: mpsc::Receiver<ServerCommand>,
    /// Messages relayed from joined rooms
    messages: mpsc::Receiver<Message>,
}

impl ChatServer {
    pub fn new(
        receiver: mpsc::Receiver<ServerCommand>,
        messages: mpsc::Receiver<Message>,
        relay: Arc<ChatRelay>,
    ) -> Self {
        Self {
            clients: HashMap::new(),
            relay,
            receiver,
            messages,
        }
    }

    /// Run the ChatServer event loop
    ///
    /// Stops when all command senders are dropped. Commands keep being
    /// served after the message channel closes (relay shut down). Queued
    /// commands are handled before relayed messages, so a client that has
    /// connected sees every message published after its connect.
    pub async fn run(mut self) {
        info!("ChatServer started");
        let mut relaying = true;

        loop {
            tokio::select! {
                biased;

                cmd = self.receiver.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                msg = self.messages.recv(), if relaying => match msg {
                    Some(msg) => self.publish(msg).await,
                    None => {
                        info!("message channel closed, no more messages to relay");
                        relaying = false;
                    }
                },
            }
        }

        info!("ChatServer shutting down");
    }

    /// Process a single command
    async fn handle_command(&mut self, cmd: ServerCommand) {
        match cmd {
            ServerCommand::Connect { client_id, sender } => {
                info!("Client {} connected", client_id);
                self.clients.insert(client_id, Client { sender });
                debug!("Total clients: {}", self.clients.len());
            }
            ServerCommand::Disconnect { client_id } => {
                info!("Client {} disconnected", client_id);
                self.clients.remove(&client_id);
                debug!("Total clients: {}", self.clients.len());
            }
            ServerCommand::Request { client_id, request } => {
                let Some(client) = self.clients.get(&client_id).cloned() else {
                    return;
                };

                // Remote calls can take seconds; keep the actor responsive
                let relay = self.relay.clone();
                tokio::spawn(async move {
                    let reply = execute(&relay, request).await;
                    if client.send(reply).await.is_err() {
                        debug!("Client {} gone before reply", client_id);
                    }
                });
            }
        }
    }

    /// Forward a received chat message to every client
    async fn publish(&self, message: Message) {
        info!(
            room_id = %message.room_id,
            "received message={:?} from={:?}",
            message.message,
            message.from.name
        );

        for client in self.clients.values() {
            let _ = client
                .send(ServerMessage::ReceivedMessage {
                    message: message.clone(),
                })
                .await;
        }
    }
}

/// Run one client command against the relay and build its reply event
pub async fn execute(relay: &ChatRelay, request: ClientMessage) -> ServerMessage {
    match request {
        ClientMessage::JoinRoom { room_id } => handle_join_room(relay, room_id).await,
        ClientMessage::LeaveRoom { room_id } => handle_leave_room(relay, room_id).await,
        ClientMessage::SendMessage { room_id, message } => {
            handle_send_message(relay, room_id, message).await
        }
        ClientMessage::SendNotification(input) => handle_send_notification(relay, input).await,
        ClientMessage::Broadcast { message } => handle_broadcast(relay, message).await,
        ClientMessage::JoinedRooms => ServerMessage::JoinedRooms {
            room_ids: relay.joined_room_ids().await,
        },
    }
}

async fn handle_join_room(relay: &ChatRelay, room_id: String) -> ServerMessage {
    if room_id.is_empty() {
        return ServerMessage::JoinRoomFailed {
            room_id,
            error: "missing room id field".to_string(),
        };
    }

    match relay.join_room(&RoomId::from(room_id.as_str())).await {
        Ok(()) => ServerMessage::RoomJoined { room_id },
        Err(e) => ServerMessage::JoinRoomFailed {
            room_id,
            error: format!("cannot join room: {}", e),
        },
    }
}

async fn handle_leave_room(relay: &ChatRelay, room_id: String) -> ServerMessage {
    if room_id.is_empty() {
        return ServerMessage::LeaveRoomFailed {
            room_id,
            error: "missing room id field".to_string(),
        };
    }

    match relay.leave_room(&RoomId::from(room_id.as_str())).await {
        Ok(()) => ServerMessage::RoomLeft { room_id },
        Err(e) => ServerMessage::LeaveRoomFailed {
            room_id,
            error: format!("cannot leave room: {}", e),
        },
    }
}

async fn handle_send_message(relay: &ChatRelay, room_id: String, message: String) -> ServerMessage {
    if let Err(error) = require(&[("room id", room_id.as_str()), ("message", message.as_str())]) {
        return ServerMessage::SendMessageFailed {
            room_id,
            message,
            error,
        };
    }

    match relay
        .send_message(&RoomId::from(room_id.as_str()), &message)
        .await
    {
        Ok(()) => ServerMessage::MessageSent { room_id, message },
        Err(e) => ServerMessage::SendMessageFailed {
            room_id,
            message,
            error: format!("error sending message: {}", e),
        },
    }
}

async fn handle_send_notification(relay: &ChatRelay, input: NotificationInput) -> ServerMessage {
    if let Err(error) = input.validate() {
        return ServerMessage::SendNotificationFailed {
            notification: input,
            error,
        };
    }

    let room_id = RoomId::from(input.room_id.as_str());
    match relay
        .send_notification(&room_id, &input.to_notification())
        .await
    {
        Ok(()) => ServerMessage::NotificationSent {
            notification: input,
        },
        Err(e) => ServerMessage::SendNotificationFailed {
            notification: input,
            error: format!("error sending notification: {}", e),
        },
    }
}

async fn handle_broadcast(relay: &ChatRelay, message: String) -> ServerMessage {
    if message.is_empty() {
        return ServerMessage::BroadcastFailed {
            message,
            error: "missing message field".to_string(),
        };
    }

    match relay.broadcast_message(&message).await {
        Ok(()) => ServerMessage::BroadcastSent { message },
        Err(e) => ServerMessage::BroadcastFailed {
            message,
            error: format!("error broadcasting message: {}", e),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::chat::{Color, Notification};
    use crate::room::PollConfig;
    use crate::store::tests::temp_backup_path;
    use crate::store::MembershipStore;
    use crate::transport::testing::{message, RecordingTransport};

    async fn relay_with(
        backup: &str,
        transport: Arc<RecordingTransport>,
    ) -> (Arc<ChatRelay>, PathBuf) {
        let path = temp_backup_path();
        std::fs::write(&path, backup).unwrap();
        let (tx, _rx) = mpsc::channel(16);
        let relay = ChatRelay::start(
            MembershipStore::new(&path),
            transport,
            tx,
            PollConfig {
                backoff: Duration::from_millis(10),
                ..PollConfig::default()
            },
        )
        .await
        .unwrap();
        (Arc::new(relay), path)
    }

    #[tokio::test]
    async fn test_join_and_list_rooms() {
        let transport = Arc::new(RecordingTransport::new());
        let (relay, path) = relay_with("[]", transport).await;

        let reply = execute(&relay, ClientMessage::JoinRoom { room_id: "ops".to_string() }).await;
        assert!(matches!(reply, ServerMessage::RoomJoined { ref room_id } if room_id == "ops"));

        let reply = execute(&relay, ClientMessage::JoinedRooms).await;
        let ServerMessage::JoinedRooms { room_ids } = reply else {
            panic!("Wrong variant");
        };
        assert_eq!(room_ids, vec![RoomId::from("ops")]);

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_join_without_room_id() {
        let transport = Arc::new(RecordingTransport::new());
        let (relay, path) = relay_with("[]", transport).await;

        let reply = execute(&relay, ClientMessage::JoinRoom { room_id: String::new() }).await;
        assert!(matches!(
            reply,
            ServerMessage::JoinRoomFailed { ref error, .. } if error == "missing room id field"
        ));
        assert!(relay.joined_room_ids().await.is_empty());

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_join_failure_reports_error() {
        let transport = Arc::new(RecordingTransport::new());
        transport.fail_room("ops");
        let (relay, path) = relay_with("[]", transport).await;

        let reply = execute(&relay, ClientMessage::JoinRoom { room_id: "ops".to_string() }).await;
        let ServerMessage::JoinRoomFailed { room_id, error } = reply else {
            panic!("Wrong variant");
        };
        assert_eq!(room_id, "ops");
        assert!(error.starts_with("cannot join room: cannot send notification to room=ops"));

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_leave_room() {
        let transport = Arc::new(RecordingTransport::new());
        let (relay, path) = relay_with(r#"["ops"]"#, transport).await;

        let reply = execute(&relay, ClientMessage::LeaveRoom { room_id: "ops".to_string() }).await;
        assert!(matches!(reply, ServerMessage::RoomLeft { .. }));
        assert!(relay.joined_room_ids().await.is_empty());

        let reply = execute(&relay, ClientMessage::LeaveRoom { room_id: String::new() }).await;
        assert!(matches!(reply, ServerMessage::LeaveRoomFailed { .. }));

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_send_message_validation_skips_relay() {
        let transport = Arc::new(RecordingTransport::new());
        let (relay, path) = relay_with("[]", transport.clone()).await;

        let reply = execute(
            &relay,
            ClientMessage::SendMessage {
                room_id: String::new(),
                message: String::new(),
            },
        )
        .await;
        let ServerMessage::SendMessageFailed { error, .. } = reply else {
            panic!("Wrong variant");
        };
        assert_eq!(error, "missing fields: [room id, message]");
        assert!(transport.sent.lock().unwrap().is_empty());

        let reply = execute(
            &relay,
            ClientMessage::SendMessage {
                room_id: "ops".to_string(),
                message: "hi".to_string(),
            },
        )
        .await;
        assert!(matches!(reply, ServerMessage::MessageSent { .. }));
        assert_eq!(transport.sent_to("ops"), vec!["hi".to_string()]);

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_send_notification() {
        let transport = Arc::new(RecordingTransport::new());
        let (relay, path) = relay_with("[]", transport.clone()).await;

        let input = NotificationInput {
            room_id: "ops".to_string(),
            message: "deployed".to_string(),
            message_format: "text".to_string(),
            notify: true,
            color: "purple".to_string(),
            from: "ci".to_string(),
        };
        let reply = execute(&relay, ClientMessage::SendNotification(input.clone())).await;
        assert!(matches!(
            reply,
            ServerMessage::NotificationSent { ref notification } if notification == &input
        ));
        assert_eq!(
            transport.notifications_for("ops"),
            vec![Notification {
                message: "deployed".to_string(),
                message_format: "text".to_string(),
                notify: true,
                color: Color::Purple,
                from: "ci".to_string(),
            }]
        );

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_broadcast_failure_names_rooms() {
        let transport = Arc::new(RecordingTransport::new());
        transport.fail_room("broken");
        let (relay, path) = relay_with(r#"["ops","broken"]"#, transport).await;

        let reply = execute(&relay, ClientMessage::Broadcast { message: "hi".to_string() }).await;
        let ServerMessage::BroadcastFailed { error, .. } = reply else {
            panic!("Wrong variant");
        };
        assert!(error.contains("room=broken"));
        assert!(!error.contains("room=ops"));

        let reply = execute(&relay, ClientMessage::Broadcast { message: String::new() }).await;
        assert!(matches!(
            reply,
            ServerMessage::BroadcastFailed { ref error, .. } if error == "missing message field"
        ));

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_server_publishes_and_replies() {
        let transport = Arc::new(RecordingTransport::new());
        let (relay, path) = relay_with("[]", transport).await;
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (msg_tx, msg_rx) = mpsc::channel(8);
        tokio::spawn(ChatServer::new(cmd_rx, msg_rx, relay).run());

        let client_id = ClientId::new();
        let (client_tx, mut client_rx) = mpsc::channel(8);
        cmd_tx
            .send(ServerCommand::Connect {
                client_id,
                sender: client_tx,
            })
            .await
            .unwrap();

        // queued right behind the connect
        msg_tx.send(message(&RoomId::from("ops"), "m1")).await.unwrap();
        let published = timeout(Duration::from_secs(1), client_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            published,
            ServerMessage::ReceivedMessage { ref message } if message.id.as_str() == "m1"
        ));

        cmd_tx
            .send(ServerCommand::Request {
                client_id,
                request: ClientMessage::JoinedRooms,
            })
            .await
            .unwrap();
        let reply = timeout(Duration::from_secs(1), client_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(reply, ServerMessage::JoinedRooms { .. }));

        cmd_tx
            .send(ServerCommand::Disconnect { client_id })
            .await
            .unwrap();
        drop(cmd_tx);
        // actor exits and drops the client's sender
        let closed = timeout(Duration::from_secs(1), client_rx.recv()).await.unwrap();
        assert!(closed.is_none());

        let _ = std::fs::remove_file(path);
    }
}
