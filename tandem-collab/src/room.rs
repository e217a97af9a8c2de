//! Room registry and per-room fan-out.
//!
//! Uses tokio broadcast channels for O(1) send to all subscribers.
//! Each member gets an independent receiver that buffers up to `capacity`
//! frames; a lagging member drops frames rather than stalling the room.
//!
//! The registry is an explicit object handed to the server, never ambient
//! global state, so tests can run isolated instances side by side.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::protocol::{PeerInfo, ProtocolError, RelayMessage};

/// Statistics for monitoring relay health.
#[derive(Debug, Clone, Default)]
pub struct RoomStats {
    pub frames_relayed: u64,
    pub frames_dropped: u64,
    pub members: usize,
}

/// Atomic relay stats — lock-free on the hot path.
struct AtomicRoomStats {
    frames_relayed: AtomicU64,
    frames_dropped: AtomicU64,
}

impl AtomicRoomStats {
    fn new() -> Self {
        Self {
            frames_relayed: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }
}

/// Fan-out channel for a single room.
///
/// All members of the same room share one broadcast channel. When a member
/// sends a frame, it is fanned out to the N-1 other members; the sender is
/// filtered out at the per-connection forwarding point by `peer_id`.
pub struct RoomChannel {
    /// Broadcast channel sender (shared by the whole room)
    sender: broadcast::Sender<Arc<Vec<u8>>>,

    /// Currently connected members
    members: Arc<RwLock<HashMap<Uuid, PeerInfo>>>,

    /// Channel capacity (frames buffered per receiver)
    capacity: usize,

    /// Lock-free stats (atomics)
    atomic_stats: Arc<AtomicRoomStats>,
}

impl RoomChannel {
    /// Create a new room channel with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            members: Arc::new(RwLock::new(HashMap::new())),
            capacity,
            atomic_stats: Arc::new(AtomicRoomStats::new()),
        }
    }

    /// Add a member to this room. Idempotent: re-joining with the same
    /// peer id replaces the membership record without duplicating it.
    ///
    /// Returns a receiver for this member to consume relayed frames.
    pub async fn join(&self, info: PeerInfo) -> broadcast::Receiver<Arc<Vec<u8>>> {
        let mut members = self.members.write().await;
        members.insert(info.peer_id, info);
        self.sender.subscribe()
    }

    /// Remove a member from this room.
    pub async fn leave(&self, peer_id: &Uuid) -> Option<PeerInfo> {
        let mut members = self.members.write().await;
        members.remove(peer_id)
    }

    /// Relay a frame to every subscribed member.
    ///
    /// Fire and forget: returns the number of receivers the frame reached;
    /// zero recipients is not an error.
    pub fn relay(&self, msg: &RelayMessage) -> Result<usize, ProtocolError> {
        let encoded = msg.encode()?;
        Ok(self.relay_raw(Arc::new(encoded)))
    }

    /// Relay pre-encoded bytes directly (zero-copy fast path).
    /// Fully lock-free: tokio broadcast send + atomic stats.
    pub fn relay_raw(&self, encoded: Arc<Vec<u8>>) -> usize {
        let count = self.sender.send(encoded).unwrap_or(0);
        self.atomic_stats.frames_relayed.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Record frames lost to a lagging receiver.
    pub fn record_dropped(&self, n: u64) {
        self.atomic_stats.frames_dropped.fetch_add(n, Ordering::Relaxed);
    }

    /// Current member count.
    pub async fn member_count(&self) -> usize {
        self.members.read().await.len()
    }

    /// All current member infos.
    pub async fn members(&self) -> Vec<PeerInfo> {
        self.members.read().await.values().cloned().collect()
    }

    /// Whether a peer is currently a member.
    pub async fn has_member(&self, peer_id: &Uuid) -> bool {
        self.members.read().await.contains_key(peer_id)
    }

    /// Relay statistics (lock-free snapshot plus member count).
    pub async fn stats(&self) -> RoomStats {
        let members = self.members.read().await;
        RoomStats {
            frames_relayed: self.atomic_stats.frames_relayed.load(Ordering::Relaxed),
            frames_dropped: self.atomic_stats.frames_dropped.load(Ordering::Relaxed),
            members: members.len(),
        }
    }

    /// Channel capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Subscribe without joining (raw receiver).
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Vec<u8>>> {
        self.sender.subscribe()
    }
}

/// Room registry: maps room tokens to fan-out channels.
///
/// Rooms are created implicitly on first join and discarded when the last
/// member leaves; no tombstones are kept. Purely in-memory — a process
/// restart drops every room.
pub struct RoomRegistry {
    rooms: Arc<RwLock<HashMap<String, Arc<RoomChannel>>>>,
    default_capacity: usize,
}

impl RoomRegistry {
    /// Create a new registry.
    pub fn new(default_capacity: usize) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            default_capacity,
        }
    }

    /// Get the room channel, creating the room on demand.
    pub async fn get_or_create(&self, room: &str) -> Arc<RoomChannel> {
        // Fast path: read lock
        {
            let rooms = self.rooms.read().await;
            if let Some(channel) = rooms.get(room) {
                return channel.clone();
            }
        }

        // Slow path: write lock to create
        let mut rooms = self.rooms.write().await;
        // Double-check after acquiring write lock
        if let Some(channel) = rooms.get(room) {
            return channel.clone();
        }

        let channel = Arc::new(RoomChannel::new(self.default_capacity));
        rooms.insert(room.to_string(), channel.clone());
        channel
    }

    /// Look up a room without creating it.
    pub async fn get(&self, room: &str) -> Option<Arc<RoomChannel>> {
        self.rooms.read().await.get(room).cloned()
    }

    /// Discard the room if its membership reached zero.
    pub async fn remove_if_empty(&self, room: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(channel) = rooms.get(room) {
            if channel.member_count().await == 0 {
                rooms.remove(room);
                log::info!("Room {room} removed (empty)");
                return true;
            }
        }
        false
    }

    /// Number of live rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Tokens of all live rooms.
    pub async fn active_rooms(&self) -> Vec<String> {
        self.rooms.read().await.keys().cloned().collect()
    }
}
