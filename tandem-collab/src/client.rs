//! WebSocket relay client for one participant's connection.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect, rejoin)
//! - Typed send paths for fragment updates and snapshots
//! - A [`SessionEvent`] stream the application drains to drive its
//!   [`SessionState`](crate::session::SessionState) mirror
//!
//! Sending while disconnected is an error surfaced to the caller — there
//! is no retry and no offline queue; the user is asked to reconnect. On
//! rejoin the client re-issues its Join and asks the room for a state
//! snapshot, so a rejoining participant does not keep a stale mirror until
//! the next edit happens to arrive.

use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use futures_util::StreamExt;
use uuid::Uuid;

use crate::protocol::{
    MessageType, PeerInfo, ProtocolError, RelayMessage, RoomSnapshot, RoomUpdate,
};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Events emitted by the relay client.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Connection established and room joined
    Connected,
    /// Connection lost
    Disconnected,
    /// A fragment update arrived from a remote peer
    Update { peer_id: Uuid, update: RoomUpdate },
    /// A rejoining peer asked for the current state; answer with
    /// [`RelayClient::send_snapshot`]
    SnapshotRequested { peer_id: Uuid },
    /// Full state snapshot answering our request
    Snapshot(RoomSnapshot),
    /// A peer joined the room (or was already there when we joined)
    PeerJoined(PeerInfo),
    /// A peer left the room
    PeerLeft(Uuid),
}

/// The relay client.
pub struct RelayClient {
    /// Our participant identity
    peer_info: PeerInfo,

    /// Room we belong to
    room: String,

    /// Connection state
    state: Arc<RwLock<ConnectionState>>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<tokio_tungstenite::tungstenite::Message>>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<SessionEvent>>,

    /// Event sender (held by the reader task)
    event_tx: mpsc::Sender<SessionEvent>,

    /// Server URL
    server_url: String,

    /// Whether this client has been connected before (rejoin detection)
    was_connected: bool,
}

impl RelayClient {
    /// Create a new relay client.
    pub fn new(peer_info: PeerInfo, room: impl Into<String>, server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            peer_info,
            room: room.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
            server_url: server_url.into(),
            was_connected: false,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.event_rx.take()
    }

    /// Connect to the relay and join the room.
    ///
    /// Spawns background tasks for reading/writing WebSocket messages. On
    /// a reconnect the client additionally asks the room for a state
    /// snapshot to replace its stale mirror.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        let rejoining = self.was_connected;
        *self.state.write().await = if rejoining {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Connecting
        };

        let url = format!("{}/{}", self.server_url, self.room);
        let ws_result = tokio_tungstenite::connect_async(&url).await;

        match ws_result {
            Ok((ws_stream, _)) => {
                let (ws_writer, mut ws_reader) = futures_util::StreamExt::split(ws_stream);

                // Outgoing message channel
                let (out_tx, mut out_rx) =
                    mpsc::channel::<tokio_tungstenite::tungstenite::Message>(256);
                self.outgoing_tx = Some(out_tx);

                // Writer task: forward outgoing channel to WebSocket
                let ws_writer = Arc::new(tokio::sync::Mutex::new(ws_writer));
                let writer = ws_writer.clone();
                tokio::spawn(async move {
                    while let Some(message) = out_rx.recv().await {
                        let mut w = writer.lock().await;
                        use futures_util::SinkExt;
                        if w.send(message).await.is_err() {
                            break;
                        }
                    }
                });

                // Join the room
                let join_msg = RelayMessage::join(&self.peer_info, &self.room);
                self.send_frame(&join_msg).await?;

                // Rejoin: ask current members for the state we missed
                if rejoining {
                    let req = RelayMessage::state_request(self.peer_info.peer_id, &self.room);
                    self.send_frame(&req).await?;
                }

                *self.state.write().await = ConnectionState::Connected;
                self.was_connected = true;
                let _ = self.event_tx.send(SessionEvent::Connected).await;

                // Reader task: process incoming frames
                let event_tx = self.event_tx.clone();
                let state = self.state.clone();
                let peer_id = self.peer_info.peer_id;
                tokio::spawn(async move {
                    while let Some(msg) = ws_reader.next().await {
                        match msg {
                            Ok(tokio_tungstenite::tungstenite::Message::Binary(data)) => {
                                let bytes: Vec<u8> = data.into();
                                if let Ok(frame) = RelayMessage::decode(&bytes) {
                                    // Skip our own frames
                                    if frame.peer_id == peer_id {
                                        continue;
                                    }

                                    let event = match frame.kind {
                                        MessageType::Update => match frame.room_update() {
                                            Ok(update) => Some(SessionEvent::Update {
                                                peer_id: frame.peer_id,
                                                update,
                                            }),
                                            Err(e) => {
                                                log::warn!("Bad update payload: {e}");
                                                None
                                            }
                                        },
                                        MessageType::StateRequest => {
                                            Some(SessionEvent::SnapshotRequested {
                                                peer_id: frame.peer_id,
                                            })
                                        }
                                        MessageType::StateSnapshot => match frame.snapshot() {
                                            Ok(snapshot) => Some(SessionEvent::Snapshot(snapshot)),
                                            Err(e) => {
                                                log::warn!("Bad snapshot payload: {e}");
                                                None
                                            }
                                        },
                                        MessageType::PeerJoined => match frame.peer_info() {
                                            Ok(info) => Some(SessionEvent::PeerJoined(info)),
                                            Err(e) => {
                                                log::warn!("Bad peer info payload: {e}");
                                                None
                                            }
                                        },
                                        MessageType::PeerLeft => {
                                            Some(SessionEvent::PeerLeft(frame.peer_id))
                                        }
                                        _ => None,
                                    };

                                    if let Some(evt) = event {
                                        let _ = event_tx.send(evt).await;
                                    }
                                }
                            }
                            Ok(tokio_tungstenite::tungstenite::Message::Close(_)) | Err(_) => {
                                break;
                            }
                            _ => {}
                        }
                    }

                    // Connection lost
                    *state.write().await = ConnectionState::Disconnected;
                    let _ = event_tx.send(SessionEvent::Disconnected).await;
                });

                Ok(())
            }
            Err(_e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                Err(ProtocolError::ConnectionClosed)
            }
        }
    }

    /// Send a fragment update to the room.
    ///
    /// Call this with already-debounced values for pad/code edits and
    /// directly for immediate concerns (language, output, chat).
    pub async fn send_update(&self, update: &RoomUpdate) -> Result<(), ProtocolError> {
        self.ensure_connected().await?;
        let msg = RelayMessage::update(self.peer_info.peer_id, &self.room, update);
        self.send_frame(&msg).await
    }

    /// Answer a state request with our current mirror.
    pub async fn send_snapshot(&self, snapshot: &RoomSnapshot) -> Result<(), ProtocolError> {
        self.ensure_connected().await?;
        let msg = RelayMessage::state_snapshot(self.peer_info.peer_id, &self.room, snapshot);
        self.send_frame(&msg).await
    }

    /// Ask current room members for a full state snapshot.
    pub async fn request_state(&self) -> Result<(), ProtocolError> {
        self.ensure_connected().await?;
        let msg = RelayMessage::state_request(self.peer_info.peer_id, &self.room);
        self.send_frame(&msg).await
    }

    /// Leave the room without dropping the connection.
    pub async fn leave(&self) -> Result<(), ProtocolError> {
        self.ensure_connected().await?;
        let msg = RelayMessage::leave(self.peer_info.peer_id, &self.room);
        self.send_frame(&msg).await
    }

    /// Send a heartbeat ping.
    pub async fn send_ping(&self) -> Result<(), ProtocolError> {
        let msg = RelayMessage::ping(self.peer_info.peer_id);
        self.send_frame(&msg).await
    }

    /// Close the connection. The server removes us from the room as part
    /// of its disconnect handling, exactly as for a network drop.
    pub async fn disconnect(&mut self) {
        if let Some(tx) = self.outgoing_tx.take() {
            let _ = tx
                .send(tokio_tungstenite::tungstenite::Message::Close(None))
                .await;
        }
        *self.state.write().await = ConnectionState::Disconnected;
    }

    async fn ensure_connected(&self) -> Result<(), ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(ProtocolError::ConnectionClosed);
        }
        Ok(())
    }

    async fn send_frame(&self, msg: &RelayMessage) -> Result<(), ProtocolError> {
        let encoded = msg.encode()?;
        match self.outgoing_tx {
            Some(ref tx) => tx
                .send(tokio_tungstenite::tungstenite::Message::Binary(encoded.into()))
                .await
                .map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Get our participant identity.
    pub fn peer_info(&self) -> &PeerInfo {
        &self.peer_info
    }

    /// Get the room token.
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Get the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ParticipantRole;

    fn test_client() -> RelayClient {
        let info = PeerInfo::new("TestUser", ParticipantRole::Interviewer);
        RelayClient::new(info, "abc123", "ws://localhost:9090")
    }

    #[test]
    fn test_client_creation() {
        let client = test_client();
        assert_eq!(client.peer_info().name, "TestUser");
        assert_eq!(client.room(), "abc123");
        assert_eq!(client.server_url(), "ws://localhost:9090");
    }

    #[tokio::test]
    async fn test_client_initial_state() {
        let client = test_client();
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_send_while_disconnected_errors() {
        let client = test_client();

        // No queueing: the caller is told to reconnect
        let result = client
            .send_update(&RoomUpdate::Code("x".to_string()))
            .await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));

        let result = client.request_state().await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_take_event_rx() {
        let mut client = test_client();

        // First take should succeed
        assert!(client.take_event_rx().is_some());
        // Second take should return None
        assert!(client.take_event_rx().is_none());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Nothing listening on this port
        let info = PeerInfo::new("TestUser", ParticipantRole::Interviewer);
        let mut client = RelayClient::new(info, "r", "ws://127.0.0.1:1");
        let result = client.connect().await;
        assert!(result.is_err());
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }
}
