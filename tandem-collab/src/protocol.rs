//! Binary protocol for room-scoped relay frames.
//!
//! Wire format (bincode-encoded):
//! ```text
//! ┌──────────┬───────────┬───────────┬──────────┐
//! │ kind     │ peer_id   │ room      │ payload  │
//! │ 1 byte   │ 16 bytes  │ variable  │ variable │
//! └──────────┴───────────┴───────────┴──────────┘
//! ```
//!
//! Every shared-state concern gets exactly one frame kind; the sender is
//! excluded from fan-out by filtering on `peer_id`, so there are no
//! separate send/receive names.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Frame kinds for the relay protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Sender joins a room (first frame on a connection)
    Join = 1,
    /// Sender leaves its room
    Leave = 2,
    /// Shared-state fragment update, relayed verbatim
    Update = 3,
    /// Ask current room members for a full state snapshot
    StateRequest = 4,
    /// Full state snapshot answering a StateRequest
    StateSnapshot = 5,
    /// A peer joined the room (server notification)
    PeerJoined = 6,
    /// A peer left the room (server notification)
    PeerLeft = 7,
    /// Heartbeat ping
    Ping = 8,
    /// Heartbeat pong
    Pong = 9,
}

/// Which side of the interview a participant is on.
///
/// The interviewee initiates the media call; the interviewer answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParticipantRole {
    Interviewer,
    Interviewee,
}

impl ParticipantRole {
    /// Whether this role places the call offer.
    pub fn initiates_call(&self) -> bool {
        matches!(self, ParticipantRole::Interviewee)
    }
}

/// Participant identity with call-routing metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerInfo {
    pub peer_id: Uuid,
    pub name: String,
    pub role: ParticipantRole,
    /// Ephemeral handle assigned by the rendezvous service; the
    /// counterpart addresses its call offer to this.
    pub call_handle: String,
}

impl PeerInfo {
    pub fn new(name: impl Into<String>, role: ParticipantRole) -> Self {
        Self {
            peer_id: Uuid::new_v4(),
            name: name.into(),
            role,
            call_handle: String::new(),
        }
    }

    /// Create with explicit peer_id (for testing)
    pub fn with_id(peer_id: Uuid, name: impl Into<String>, role: ParticipantRole) -> Self {
        Self {
            peer_id,
            name: name.into(),
            role,
            call_handle: String::new(),
        }
    }

    /// Attach the rendezvous handle once the signaling service assigned it.
    pub fn with_call_handle(mut self, handle: impl Into<String>) -> Self {
        self.call_handle = handle.into();
        self
    }
}

/// Languages the execution service supports, with pinned runtime versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Java,
    Cpp,
    Go,
    Rust,
}

impl Language {
    pub const ALL: [Language; 7] = [
        Language::Python,
        Language::JavaScript,
        Language::TypeScript,
        Language::Java,
        Language::Cpp,
        Language::Go,
        Language::Rust,
    ];

    /// Name the execution service keys runtimes by.
    pub fn name(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Java => "java",
            Language::Cpp => "c++",
            Language::Go => "go",
            Language::Rust => "rust",
        }
    }

    /// Pinned runtime version for this language.
    pub fn version(&self) -> &'static str {
        match self {
            Language::Python => "3.10.0",
            Language::JavaScript => "18.15.0",
            Language::TypeScript => "5.0.3",
            Language::Java => "15.0.2",
            Language::Cpp => "10.2.0",
            Language::Go => "1.16.2",
            Language::Rust => "1.68.2",
        }
    }

    /// Look up a language by its service name.
    pub fn from_name(name: &str) -> Option<Language> {
        Language::ALL.iter().copied().find(|l| l.name() == name)
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.name(), self.version())
    }
}

/// Captured output of one execution run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    /// Non-zero exit or runtime error
    pub failed: bool,
}

impl RunOutput {
    /// stdout followed by stderr, the way the output panel shows it.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}{}", self.stdout, self.stderr)
        }
    }
}

/// One line of room chat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub author: String,
    pub body: String,
}

/// A last-write-wins update to one shared fragment.
///
/// One variant per concern; recipients overwrite their local copy with the
/// carried value, no merging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum RoomUpdate {
    /// Rich-text pad content (opaque markup)
    Pad(String),
    /// Code editor buffer
    Code(String),
    /// Program input buffer fed to execution
    Stdin(String),
    /// Selected execution language
    Language(Language),
    /// Most recent execution result
    Output(RunOutput),
    /// Chat message
    Chat(ChatMessage),
}

/// Complete fragment set, exchanged for reconnect reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomSnapshot {
    pub pad: String,
    pub code: String,
    pub stdin: String,
    pub language: Language,
    pub output: Option<RunOutput>,
}

impl Default for RoomSnapshot {
    fn default() -> Self {
        Self {
            pad: String::new(),
            code: String::new(),
            stdin: String::new(),
            language: Language::Python,
            output: None,
        }
    }
}

/// Top-level relay frame.
///
/// Serialized with bincode for minimal overhead. The server never inspects
/// `payload` except for Join; updates pass through verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayMessage {
    pub kind: MessageType,
    pub peer_id: Uuid,
    /// Opaque room token (typically a generated session id)
    pub room: String,
    /// Frame payload (varies by kind)
    pub payload: Vec<u8>,
}

impl RelayMessage {
    /// Create a join frame carrying the sender's identity.
    pub fn join(info: &PeerInfo, room: impl Into<String>) -> Self {
        let payload = bincode::serde::encode_to_vec(info, bincode::config::standard())
            .unwrap_or_default();
        Self {
            kind: MessageType::Join,
            peer_id: info.peer_id,
            room: room.into(),
            payload,
        }
    }

    /// Create a leave frame.
    pub fn leave(peer_id: Uuid, room: impl Into<String>) -> Self {
        Self {
            kind: MessageType::Leave,
            peer_id,
            room: room.into(),
            payload: Vec::new(),
        }
    }

    /// Create a fragment update frame.
    pub fn update(peer_id: Uuid, room: impl Into<String>, update: &RoomUpdate) -> Self {
        let payload = bincode::serde::encode_to_vec(update, bincode::config::standard())
            .unwrap_or_default();
        Self {
            kind: MessageType::Update,
            peer_id,
            room: room.into(),
            payload,
        }
    }

    /// Create a state request frame.
    pub fn state_request(peer_id: Uuid, room: impl Into<String>) -> Self {
        Self {
            kind: MessageType::StateRequest,
            peer_id,
            room: room.into(),
            payload: Vec::new(),
        }
    }

    /// Create a state snapshot frame answering a request.
    pub fn state_snapshot(peer_id: Uuid, room: impl Into<String>, snapshot: &RoomSnapshot) -> Self {
        let payload = bincode::serde::encode_to_vec(snapshot, bincode::config::standard())
            .unwrap_or_default();
        Self {
            kind: MessageType::StateSnapshot,
            peer_id,
            room: room.into(),
            payload,
        }
    }

    /// Create a peer joined notification.
    pub fn peer_joined(info: &PeerInfo, room: impl Into<String>) -> Self {
        let payload = bincode::serde::encode_to_vec(info, bincode::config::standard())
            .unwrap_or_default();
        Self {
            kind: MessageType::PeerJoined,
            peer_id: info.peer_id,
            room: room.into(),
            payload,
        }
    }

    /// Create a peer left notification.
    pub fn peer_left(peer_id: Uuid, room: impl Into<String>) -> Self {
        Self {
            kind: MessageType::PeerLeft,
            peer_id,
            room: room.into(),
            payload: Vec::new(),
        }
    }

    /// Create a ping frame.
    pub fn ping(peer_id: Uuid) -> Self {
        Self {
            kind: MessageType::Ping,
            peer_id,
            room: String::new(),
            payload: Vec::new(),
        }
    }

    /// Create a pong frame.
    pub fn pong(peer_id: Uuid) -> Self {
        Self {
            kind: MessageType::Pong,
            peer_id,
            room: String::new(),
            payload: Vec::new(),
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(msg)
    }

    /// Parse peer info from a Join or PeerJoined payload.
    pub fn peer_info(&self) -> Result<PeerInfo, ProtocolError> {
        if self.kind != MessageType::Join && self.kind != MessageType::PeerJoined {
            return Err(ProtocolError::InvalidMessageType);
        }
        let (info, _) = bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(info)
    }

    /// Parse a fragment update payload.
    pub fn room_update(&self) -> Result<RoomUpdate, ProtocolError> {
        if self.kind != MessageType::Update {
            return Err(ProtocolError::InvalidMessageType);
        }
        let (update, _) = bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(update)
    }

    /// Parse a state snapshot payload.
    pub fn snapshot(&self) -> Result<RoomSnapshot, ProtocolError> {
        if self.kind != MessageType::StateSnapshot {
            return Err(ProtocolError::InvalidMessageType);
        }
        let (snapshot, _) = bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(snapshot)
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    InvalidMessageType,
    ConnectionClosed,
    Timeout,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::InvalidMessageType => write!(f, "Invalid message type"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Timeout => write!(f, "Connection timeout"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_roundtrip() {
        let peer = Uuid::new_v4();
        let update = RoomUpdate::Code("fn main() {}".to_string());

        let msg = RelayMessage::update(peer, "abc123", &update);
        let encoded = msg.encode().unwrap();
        let decoded = RelayMessage::decode(&encoded).unwrap();

        assert_eq!(decoded.kind, MessageType::Update);
        assert_eq!(decoded.peer_id, peer);
        assert_eq!(decoded.room, "abc123");
        assert_eq!(decoded.room_update().unwrap(), update);
    }

    #[test]
    fn test_join_carries_call_handle() {
        let info = PeerInfo::new("Alice", ParticipantRole::Interviewee)
            .with_call_handle("rv-1234");

        let msg = RelayMessage::join(&info, "room-1");
        let decoded = RelayMessage::decode(&msg.encode().unwrap()).unwrap();

        let parsed = decoded.peer_info().unwrap();
        assert_eq!(parsed.name, "Alice");
        assert_eq!(parsed.call_handle, "rv-1234");
        assert!(parsed.role.initiates_call());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let snapshot = RoomSnapshot {
            pad: "<p>notes</p>".to_string(),
            code: "print(1+1)".to_string(),
            stdin: String::new(),
            language: Language::Python,
            output: Some(RunOutput {
                stdout: "2\n".to_string(),
                stderr: String::new(),
                failed: false,
            }),
        };

        let msg = RelayMessage::state_snapshot(Uuid::new_v4(), "xyz", &snapshot);
        let decoded = RelayMessage::decode(&msg.encode().unwrap()).unwrap();

        assert_eq!(decoded.kind, MessageType::StateSnapshot);
        assert_eq!(decoded.snapshot().unwrap(), snapshot);
    }

    #[test]
    fn test_wrong_kind_accessor_errors() {
        let msg = RelayMessage::ping(Uuid::new_v4());
        assert!(msg.peer_info().is_err());
        assert!(msg.room_update().is_err());
        assert!(msg.snapshot().is_err());
    }

    #[test]
    fn test_decode_invalid_bytes() {
        let garbage = vec![0xFF, 0xFE, 0xFD];
        assert!(RelayMessage::decode(&garbage).is_err());
    }

    #[test]
    fn test_language_catalog() {
        assert_eq!(Language::Python.name(), "python");
        assert_eq!(Language::Python.version(), "3.10.0");
        assert_eq!(Language::from_name("c++"), Some(Language::Cpp));
        assert_eq!(Language::from_name("cobol"), None);
        assert_eq!(Language::ALL.len(), 7);
    }

    #[test]
    fn test_language_display() {
        assert_eq!(Language::Go.to_string(), "go 1.16.2");
    }

    #[test]
    fn test_run_output_combined() {
        let ok = RunOutput {
            stdout: "2\n".to_string(),
            stderr: String::new(),
            failed: false,
        };
        assert_eq!(ok.combined(), "2\n");

        let both = RunOutput {
            stdout: "partial\n".to_string(),
            stderr: "boom\n".to_string(),
            failed: true,
        };
        assert_eq!(both.combined(), "partial\nboom\n");
    }

    #[test]
    fn test_roles() {
        assert!(ParticipantRole::Interviewee.initiates_call());
        assert!(!ParticipantRole::Interviewer.initiates_call());
    }

    #[test]
    fn test_leave_and_peer_left_have_empty_payload() {
        let peer = Uuid::new_v4();
        let leave = RelayMessage::leave(peer, "r1");
        let left = RelayMessage::peer_left(peer, "r1");
        assert!(leave.payload.is_empty());
        assert!(left.payload.is_empty());
        assert_eq!(leave.kind, MessageType::Leave);
        assert_eq!(left.kind, MessageType::PeerLeft);
    }

    #[test]
    fn test_ping_has_no_room() {
        let msg = RelayMessage::ping(Uuid::new_v4());
        assert!(msg.room.is_empty());
    }

    #[test]
    fn test_chat_update_roundtrip() {
        let update = RoomUpdate::Chat(ChatMessage {
            author: "Bob".to_string(),
            body: "can you hear me?".to_string(),
        });
        let msg = RelayMessage::update(Uuid::new_v4(), "r", &update);
        let decoded = RelayMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded.room_update().unwrap(), update);
    }
}
