//! WebSocket relay server with room-based fan-out.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── Room (session token) ── RoomChannel
//! Client B ──┘                              │
//!                                 ┌─────────┴─────────┐
//!                                 ▼                   ▼
//!                              Client A            Client B
//! ```
//!
//! The server holds no document state: frames pass through verbatim and a
//! participant who joins after a frame was sent never receives it. State
//! catch-up happens peer to peer through StateRequest/StateSnapshot frames,
//! which the server relays like any other.
//!
//! Membership changes are applied synchronously with the connection
//! lifecycle, so a dead handle is never part of a fan-out set.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::protocol::{MessageType, ParticipantRole, PeerInfo, RelayMessage};
use crate::room::{RoomChannel, RoomRegistry};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Relay channel capacity per room
    pub relay_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            relay_capacity: 256,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_frames: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
}

/// The relay server.
pub struct RelayServer {
    config: ServerConfig,
    /// Room registry: session token → fan-out channel
    registry: Arc<RoomRegistry>,
    /// Server-wide statistics
    stats: Arc<RwLock<ServerStats>>,
}

impl RelayServer {
    /// Create a new relay server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(RoomRegistry::new(config.relay_capacity));
        Self::with_registry(config, registry)
    }

    /// Create with an injected registry (isolated instances for testing).
    pub fn with_registry(config: ServerConfig, registry: Arc<RoomRegistry>) -> Self {
        Self {
            config,
            registry,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Start listening for WebSocket connections.
    ///
    /// This runs the server event loop. Call from an async runtime.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Relay server listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let registry = self.registry.clone();
            let stats = self.stats.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, registry, stats).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        registry: Arc<RoomRegistry>,
        stats: Arc<RwLock<ServerStats>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::info!("WebSocket connection established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        // State for this connection: one room at a time
        let mut peer: Option<PeerInfo> = None;
        let mut room: Option<String> = None;
        let mut channel: Option<Arc<RoomChannel>> = None;
        let mut relay_rx: Option<tokio::sync::broadcast::Receiver<Arc<Vec<u8>>>> = None;

        loop {
            tokio::select! {
                // Incoming WebSocket message
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            match RelayMessage::decode(&bytes) {
                                Ok(frame) => {
                                    {
                                        let mut s = stats.write().await;
                                        s.total_frames += 1;
                                        s.total_bytes += bytes.len() as u64;
                                    }

                                    match frame.kind {
                                        MessageType::Join => {
                                            // Joining a second room leaves the first
                                            if let (Some(ch), Some(r), Some(p)) =
                                                (channel.take(), room.take(), peer.as_ref())
                                            {
                                                Self::leave_room(&registry, &ch, &r, p.peer_id).await;
                                                relay_rx = None;
                                            }

                                            let info = frame.peer_info().unwrap_or_else(|_| {
                                                PeerInfo::with_id(
                                                    frame.peer_id,
                                                    "Anonymous",
                                                    ParticipantRole::Interviewer,
                                                )
                                            });

                                            let ch = registry.get_or_create(&frame.room).await;

                                            // Roster replay: tell the joiner who is
                                            // already here (carries call handles)
                                            for member in ch.members().await {
                                                let roster_frame =
                                                    RelayMessage::peer_joined(&member, &frame.room);
                                                let encoded = roster_frame.encode()?;
                                                ws_sender.send(Message::Binary(encoded.into())).await?;
                                            }

                                            let rx = ch.join(info.clone()).await;
                                            relay_rx = Some(rx);

                                            // Announce to the rest of the room
                                            let join_note = RelayMessage::peer_joined(&info, &frame.room);
                                            let _ = ch.relay(&join_note);

                                            log::info!(
                                                "Peer {} ({}) joined room {}",
                                                info.name,
                                                info.peer_id,
                                                frame.room
                                            );

                                            peer = Some(info);
                                            room = Some(frame.room.clone());
                                            channel = Some(ch);

                                            let mut s = stats.write().await;
                                            s.active_rooms = registry.room_count().await;
                                        }

                                        MessageType::Leave => {
                                            if let (Some(ch), Some(r), Some(p)) =
                                                (channel.take(), room.take(), peer.as_ref())
                                            {
                                                Self::leave_room(&registry, &ch, &r, p.peer_id).await;
                                                relay_rx = None;

                                                let mut s = stats.write().await;
                                                s.active_rooms = registry.room_count().await;
                                            }
                                        }

                                        MessageType::Update
                                        | MessageType::StateRequest
                                        | MessageType::StateSnapshot => {
                                            // Pass through verbatim: reuse the encoded
                                            // bytes, no re-serialization
                                            match (&channel, &room) {
                                                (Some(ch), Some(r)) if *r == frame.room => {
                                                    let reached = ch.relay_raw(Arc::new(bytes));
                                                    log::trace!(
                                                        "Relayed {:?} from {} to {} receivers in {r}",
                                                        frame.kind,
                                                        frame.peer_id,
                                                        reached
                                                    );
                                                }
                                                _ => {
                                                    log::debug!(
                                                        "Dropping {:?} for room {} from non-member {}",
                                                        frame.kind,
                                                        frame.room,
                                                        frame.peer_id
                                                    );
                                                }
                                            }
                                        }

                                        MessageType::Ping => {
                                            let pong = RelayMessage::pong(frame.peer_id);
                                            let encoded = pong.encode()?;
                                            ws_sender.send(Message::Binary(encoded.into())).await?;
                                        }

                                        _ => {
                                            log::debug!("Unhandled frame kind: {:?}", frame.kind);
                                        }
                                    }
                                }
                                Err(e) => {
                                    log::warn!("Failed to decode frame from {addr}: {e}");
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            break;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                // Outgoing relayed frame
                msg = async {
                    if let Some(ref mut rx) = relay_rx {
                        rx.recv().await
                    } else {
                        // Not in a room yet — wait forever
                        std::future::pending().await
                    }
                } => {
                    match msg {
                        Ok(data) => {
                            // Don't echo back to sender
                            if let Ok(frame) = RelayMessage::decode(&data) {
                                if Some(frame.peer_id) == peer.as_ref().map(|p| p.peer_id) {
                                    continue;
                                }
                            }
                            ws_sender.send(Message::Binary(data.to_vec().into())).await?;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            if let Some(ref ch) = channel {
                                ch.record_dropped(n);
                            }
                            log::warn!("Peer {peer:?} lagged by {n} frames");
                        }
                        Err(_) => break,
                    }
                }
            }
        }

        // Cleanup: membership removal is synchronous with disconnect, so no
        // frame is ever fanned out to this dead handle
        if let (Some(ch), Some(r), Some(p)) = (channel.take(), room.take(), peer.as_ref()) {
            Self::leave_room(&registry, &ch, &r, p.peer_id).await;
        }

        {
            let mut s = stats.write().await;
            s.active_connections -= 1;
            s.active_rooms = registry.room_count().await;
        }

        Ok(())
    }

    /// Remove a member, announce the departure, and discard the room if it
    /// became empty.
    async fn leave_room(
        registry: &Arc<RoomRegistry>,
        channel: &Arc<RoomChannel>,
        room: &str,
        peer_id: Uuid,
    ) {
        channel.leave(&peer_id).await;

        let left_note = RelayMessage::peer_left(peer_id, room);
        let _ = channel.relay(&left_note);

        registry.remove_if_empty(room).await;
        log::info!("Peer {peer_id} left room {room}");
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Get the room registry.
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }
}
