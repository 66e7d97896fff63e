//! WebSocket sync server with room-based board routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── Room (board_id) ── MutationRelay ── BoardStore
//! Client B ──┘                            │
//!                                         ├── ack ──► submitter
//!                                         ├── broadcast ──► room \ submitter
//!                                         └── activity:new ──► all sessions
//! ```
//!
//! Each connection owns one event-processing task. Inbound frames are
//! decoded and handed to the relay in arrival order; outbound frames come
//! through the session's bounded channel held by the room registry. There
//! is no ordering guarantee between the two directions beyond per-channel
//! FIFO.

use std::net::SocketAddr;
use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::protocol::ClientEvent;
use crate::registry::{Frame, RoomRegistry};
use crate::relay::{MutationRelay, SessionCtx};
use crate::store::BoardStore;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Outbound frame channel capacity per session
    pub channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            channel_capacity: 256,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    relay: Arc<MutationRelay>,
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    /// Create a new sync server with the given configuration and a fresh
    /// in-memory store.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_store(config, Arc::new(BoardStore::new()))
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Create against an existing store (pre-seeded boards, shared state).
    pub fn with_store(config: ServerConfig, store: Arc<BoardStore>) -> Self {
        let registry = Arc::new(RoomRegistry::new());
        let relay = Arc::new(MutationRelay::new(store, registry));
        Self {
            config,
            relay,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Start listening for WebSocket connections.
    ///
    /// This runs the server event loop. Call from an async runtime.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Sync server listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let relay = self.relay.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, relay, stats, config).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        relay: Arc<MutationRelay>,
        stats: Arc<RwLock<ServerStats>>,
        config: ServerConfig,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::info!("WebSocket connection established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        // Register the session before processing any frame so acks and
        // broadcasts have somewhere to go.
        let mut ctx = SessionCtx::new(Uuid::new_v4());
        let (tx, mut rx) = mpsc::channel::<Frame>(config.channel_capacity);
        relay.registry().register(ctx.session_id, tx).await;

        loop {
            tokio::select! {
                // Incoming WebSocket message
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            {
                                let mut s = stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += text.len() as u64;
                            }

                            match ClientEvent::decode(&text) {
                                Ok(ClientEvent::Hello(hello)) => {
                                    // Bind the authenticated actor to this session
                                    ctx.user_id = hello.user_id;
                                    log::info!(
                                        "Session {} identified as {} ({})",
                                        ctx.session_id,
                                        hello.name,
                                        hello.user_id
                                    );
                                }
                                Ok(event) => {
                                    relay.handle(&ctx, event).await;
                                }
                                Err(e) => {
                                    log::warn!("Failed to decode event from {addr}: {e}");
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            break;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            // A failed write means the peer is gone; fall
                            // through to cleanup instead of returning early
                            if let Err(e) = ws_sender.send(Message::Pong(data)).await {
                                log::warn!("Failed to write pong to {addr}: {e}");
                                break;
                            }
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                // Outgoing frame from the registry
                frame = rx.recv() => {
                    match frame {
                        Some(frame) => {
                            // Same as above: the peer may vanish with frames
                            // still queued, and cleanup must still run
                            if let Err(e) =
                                ws_sender.send(Message::Text(frame.as_ref().into())).await
                            {
                                log::warn!("Failed to write frame to {addr}: {e}");
                                break;
                            }
                        }
                        // Registry dropped the sender: session was evicted
                        None => break,
                    }
                }
            }
        }

        // Cleanup: leave every room (emitting presence) and unregister
        relay.disconnect(&ctx).await;

        {
            let mut s = stats.write().await;
            s.active_connections -= 1;
            s.active_rooms = relay.registry().room_count().await;
        }

        Ok(())
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Get the board store.
    pub fn store(&self) -> &Arc<BoardStore> {
        self.relay.store()
    }

    /// Get the room registry.
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        self.relay.registry()
    }
}
