//! Client-side mirror of the shared workspace, plus edit debouncing.
//!
//! Every participant holds a full local copy of the room's fragments (pad,
//! code buffer, program input, language, last run output). Inbound updates
//! overwrite the targeted fragment unconditionally — last write wins, no
//! merge, no cursor preservation. Mirrors may diverge while both sides are
//! typing; they converge once one side goes quiet for a debounce window.
//!
//! Two propagation disciplines coexist:
//! - immediate: language selection, run output, chat
//! - debounced: pad and code edits, coalesced by [`Debouncer`]

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::{ChatMessage, Language, PeerInfo, RoomSnapshot, RoomUpdate, RunOutput};

/// Local mirror of one room's shared fragments.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Rich-text pad content (opaque markup)
    pub pad: String,
    /// Code editor buffer
    pub code: String,
    /// Program input buffer
    pub stdin: String,
    /// Selected execution language
    pub language: Language,
    /// Most recent run output, local or relayed
    pub output: Option<RunOutput>,
    /// Chat history, in arrival order
    pub chat: Vec<ChatMessage>,
    /// Peers currently known to be in the room
    peers: HashMap<Uuid, PeerInfo>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            pad: String::new(),
            code: String::new(),
            stdin: String::new(),
            language: Language::Python,
            output: None,
            chat: Vec::new(),
            peers: HashMap::new(),
        }
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the targeted fragment with the received value.
    ///
    /// Last write wins by arrival order; concurrent edits from the other
    /// side silently clobber local ones.
    pub fn apply(&mut self, update: RoomUpdate) {
        match update {
            RoomUpdate::Pad(markup) => self.pad = markup,
            RoomUpdate::Code(source) => self.code = source,
            RoomUpdate::Stdin(input) => self.stdin = input,
            RoomUpdate::Language(language) => self.language = language,
            RoomUpdate::Output(output) => self.output = Some(output),
            RoomUpdate::Chat(message) => self.chat.push(message),
        }
    }

    /// Capture the full fragment set, for answering a state request.
    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            pad: self.pad.clone(),
            code: self.code.clone(),
            stdin: self.stdin.clone(),
            language: self.language,
            output: self.output.clone(),
        }
    }

    /// Overwrite every fragment from a received snapshot.
    pub fn apply_snapshot(&mut self, snapshot: RoomSnapshot) {
        self.pad = snapshot.pad;
        self.code = snapshot.code;
        self.stdin = snapshot.stdin;
        self.language = snapshot.language;
        self.output = snapshot.output;
    }

    /// Record a peer as present.
    pub fn peer_joined(&mut self, info: PeerInfo) {
        self.peers.insert(info.peer_id, info);
    }

    /// Forget a departed peer.
    pub fn peer_left(&mut self, peer_id: &Uuid) -> Option<PeerInfo> {
        self.peers.remove(peer_id)
    }

    /// Peers currently in the room (excluding ourselves).
    pub fn peers(&self) -> Vec<&PeerInfo> {
        self.peers.values().collect()
    }

    /// Look up a peer by id.
    pub fn peer(&self, peer_id: &Uuid) -> Option<&PeerInfo> {
        self.peers.get(peer_id)
    }

    /// The counterpart's call handle, once known.
    ///
    /// In normal operation a room has exactly one other participant; with
    /// more, the first peer holding a handle wins.
    pub fn remote_call_handle(&self) -> Option<&str> {
        self.peers
            .values()
            .find(|p| !p.call_handle.is_empty())
            .map(|p| p.call_handle.as_str())
    }
}

/// Default quiet window for free-text edits.
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_secs(1);

/// Coalesces rapid successive edits into one settled value.
///
/// Every pushed value resets the quiet-window timer; only when the window
/// elapses with no further input is the latest value emitted. N keystrokes
/// inside one window produce exactly one output carrying the final text.
///
/// Dropping the `Debouncer` flushes a still-pending value before the
/// output channel closes.
pub struct Debouncer<T> {
    tx: mpsc::Sender<T>,
}

impl<T: Send + 'static> Debouncer<T> {
    /// Spawn a debounce task with the default window.
    pub fn with_default_window() -> (Self, mpsc::Receiver<T>) {
        Self::new(DEFAULT_DEBOUNCE_WINDOW)
    }

    /// Spawn the debounce task. Returns the handle used to push edits and
    /// the receiver of settled values.
    pub fn new(window: Duration) -> (Self, mpsc::Receiver<T>) {
        let (in_tx, mut in_rx) = mpsc::channel::<T>(64);
        let (out_tx, out_rx) = mpsc::channel::<T>(16);

        tokio::spawn(async move {
            while let Some(first) = in_rx.recv().await {
                let mut pending = first;
                loop {
                    match tokio::time::timeout(window, in_rx.recv()).await {
                        // Newer edit inside the window: replace and restart
                        Ok(Some(next)) => pending = next,
                        // Input side dropped: flush and stop
                        Ok(None) => {
                            let _ = out_tx.send(pending).await;
                            return;
                        }
                        // Quiet window elapsed: emit the settled value
                        Err(_) => {
                            if out_tx.send(pending).await.is_err() {
                                return;
                            }
                            break;
                        }
                    }
                }
            }
        });

        (Self { tx: in_tx }, out_rx)
    }

    /// Push a new edit, resetting the quiet-window timer.
    pub async fn push(&self, value: T) {
        let _ = self.tx.send(value).await;
    }
}
