//! Chat Room Relay - Entry Point
//!
//! Restores the joined rooms, starts polling them, serves the WebSocket
//! command surface and shuts down cleanly on SIGINT/SIGTERM.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use chat_relay::store::{prepare_backup_file, BACKUP_FILE_NAME};
use chat_relay::{
    handle_connection, ChatRelay, ChatServer, Config, HttpTransport, MembershipStore, PollConfig,
    ServerCommand,
};

/// Channel buffer size for server commands
const CHANNEL_BUFFER_SIZE: usize = 256;

/// Relayed messages buffered before workers start waiting on the consumer
const MESSAGE_CHANNEL_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=chat_relay=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_relay=info")),
        )
        .init();

    let config = Config::from_env()?;

    let backup_path = prepare_backup_file(&config.backup_dir, BACKUP_FILE_NAME).await?;
    let transport = Arc::new(HttpTransport::new(
        config.api_url.clone(),
        config.auth_tokens.clone(),
    )?);

    let (msg_tx, msg_rx) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);
    let relay = Arc::new(
        ChatRelay::start(
            MembershipStore::new(backup_path),
            transport,
            msg_tx,
            PollConfig::default(),
        )
        .await?,
    );

    if let Some(room_id) = &config.default_room {
        if let Err(e) = relay.join_room(room_id).await {
            warn!("default room: {}", e);
        }
    }

    let joined = relay.joined_room_ids().await;
    if joined.is_empty() {
        error!("relay did NOT join any rooms, provide DEFAULT_JOIN_ROOM env. var.");
        return Err("no rooms joined".into());
    }
    info!("joined rooms={:?}", joined);

    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!("Command surface listening on {}", config.listen_addr);

    let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
    tokio::spawn(ChatServer::new(cmd_rx, msg_rx, relay.clone()).run());
    info!("ChatServer actor started");

    tokio::select! {
        _ = accept_loop(listener, cmd_tx) => {}
        result = shutdown_signal() => {
            result?;
            info!("received interrupt, shutting down...");
            relay.shutdown().await;
            info!("shut down");
        }
    }

    Ok(())
}

/// Connection accept loop
async fn accept_loop(listener: TcpListener, cmd_tx: mpsc::Sender<ServerCommand>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("New connection from {}", addr);
                let cmd_tx = cmd_tx.clone();

                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, cmd_tx).await {
                        error!("Connection handler error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
