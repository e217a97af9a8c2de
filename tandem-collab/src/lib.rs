//! # tandem-collab — Real-time sync layer for pair interview sessions
//!
//! Two participants share a synchronized workspace: a collaborative
//! rich-text pad, a collaborative code editor with remote execution, and a
//! direct audio/video call.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     WebSocket      ┌──────────────┐
//! │ RelayClient  │ ◄─────────────────► │ RelayServer  │
//! │ (per user)   │     Binary Proto    │ (stateless)  │
//! └──────┬───────┘                     └──────┬───────┘
//!        │                                    │
//!        ▼                             ┌──────┴───────┐
//! ┌──────────────┐                     │ RoomRegistry │
//! │ SessionState │                     │ (fan-out)    │
//! │ (LWW mirror) │                     └──────────────┘
//! └──────────────┘
//!
//! CallNegotiator ──► rendezvous service ──► peer-to-peer media
//! ExecutionDispatcher ──► execution service (HTTP)
//! ```
//!
//! The server relays frames verbatim and keeps no document state; each
//! client mirrors the shared fragments locally and overwrites them on
//! every inbound update (last write wins). Free-text edits are debounced
//! before they hit the wire; language changes, run output, and chat relay
//! immediately. The media call and code execution bypass the relay
//! entirely, through their own external services.
//!
//! ## Modules
//!
//! - [`protocol`] — Binary wire protocol (bincode-encoded RelayMessage)
//! - [`room`] — Room registry and per-room fan-out
//! - [`server`] — WebSocket relay server
//! - [`client`] — WebSocket relay client
//! - [`session`] — Shared-state mirror and edit debouncing
//! - [`call`] — Media call negotiation state machine
//! - [`exec`] — Code execution dispatch

pub mod protocol;
pub mod room;
pub mod server;
pub mod client;
pub mod session;
pub mod call;
pub mod exec;

// Re-exports for convenience
pub use protocol::{
    ChatMessage, Language, MessageType, ParticipantRole, PeerInfo, ProtocolError,
    RelayMessage, RoomSnapshot, RoomUpdate, RunOutput,
};
pub use room::{RoomChannel, RoomRegistry, RoomStats};
pub use server::{RelayServer, ServerConfig, ServerStats};
pub use client::{ConnectionState, RelayClient, SessionEvent};
pub use session::{Debouncer, SessionState, DEFAULT_DEBOUNCE_WINDOW};
pub use call::{
    CallError, CallNegotiator, CallRole, CallSignal, CallState, CaptureRequest,
    MediaDevices, MediaError, MediaStream, MediaTrack, Registration, Rendezvous,
    TrackKind,
};
pub use exec::{ExecConfig, ExecError, ExecutionDispatcher};
