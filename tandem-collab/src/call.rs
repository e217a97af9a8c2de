//! Two-party media call negotiation as an explicit state machine.
//!
//! The negotiator talks to two opaque external collaborators:
//! - a [`Rendezvous`] service that assigns each client an ephemeral call
//!   handle and relays offer/answer/candidate signals between handles
//!   (out of band from the room relay), and
//! - [`MediaDevices`], the local capture layer, whose requests can fail
//!   (permission revoked, device busy) without killing the session.
//!
//! State chains:
//! ```text
//! initiator:  Idle ── offer() ──► AwaitingAnswer ── Answer ──► Connected ──► Ended
//! responder:  Idle ── Offer ──► AwaitingMedia ── answer() ──► Answering
//!                                  │                              │ first Candidate
//!                                  └── capture failed (retry) ◄───┘      ▼
//!                                                                    Connected ──► Ended
//! ```
//!
//! Once `Connected`, audio/video flows directly between the two clients;
//! the room relay has no visibility into call state. Mute and camera-off
//! are local track toggles and never renegotiate the connection. Teardown
//! is a transition to `Ended`: the remote side observes connection loss,
//! there is no explicit leave signal.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::protocol::ParticipantRole;

/// Signals exchanged through the rendezvous service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum CallSignal {
    /// Media description offered by the initiator
    Offer { from: String, sdp: String },
    /// Media description answering an offer
    Answer { sdp: String },
    /// ICE-style connectivity candidate
    Candidate { candidate: String },
}

/// Call lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    /// Responder: offer received, local capture not yet granted
    AwaitingMedia,
    /// Initiator: offer sent, waiting for the answer
    AwaitingAnswer,
    /// Responder: answer sent, waiting for a direct path
    Answering,
    Connected,
    Ended,
}

/// Which side of the handshake we drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    Initiator,
    Responder,
}

impl CallRole {
    /// The interviewee places the call; the interviewer answers.
    pub fn from_participant(role: ParticipantRole) -> Self {
        if role.initiates_call() {
            CallRole::Initiator
        } else {
            CallRole::Responder
        }
    }
}

/// Media track kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// A captured local media track.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    pub kind: TrackKind,
    /// Track-level enable toggle (mute / camera indicator)
    pub enabled: bool,
}

impl MediaTrack {
    pub fn new(kind: TrackKind) -> Self {
        Self { kind, enabled: true }
    }
}

/// Result of a local capture request.
#[derive(Debug, Clone)]
pub struct MediaStream {
    pub audio: MediaTrack,
    pub video: Option<MediaTrack>,
}

/// What to capture.
#[derive(Debug, Clone, Copy)]
pub struct CaptureRequest {
    pub audio: bool,
    pub video: bool,
}

impl CaptureRequest {
    pub fn audio_video() -> Self {
        Self { audio: true, video: true }
    }

    pub fn video_only() -> Self {
        Self { audio: false, video: true }
    }
}

/// Media capture errors. Surfaced to the user who attempted the capture;
/// never fatal to the rest of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    PermissionDenied,
    DeviceBusy,
    DeviceUnavailable,
}

impl std::fmt::Display for MediaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PermissionDenied => write!(f, "Media permission denied"),
            Self::DeviceBusy => write!(f, "Media device busy"),
            Self::DeviceUnavailable => write!(f, "Media device unavailable"),
        }
    }
}

impl std::error::Error for MediaError {}

/// Call negotiation errors.
#[derive(Debug)]
pub enum CallError {
    /// Local capture failed
    Media(MediaError),
    /// The rendezvous service rejected or dropped a signal
    Signaling(String),
    /// Operation or signal not valid in the current state
    InvalidState { state: CallState, event: &'static str },
    /// register() has not been called yet
    NotRegistered,
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Media(e) => write!(f, "Media error: {e}"),
            Self::Signaling(e) => write!(f, "Signaling error: {e}"),
            Self::InvalidState { state, event } => {
                write!(f, "{event} not valid in state {state:?}")
            }
            Self::NotRegistered => write!(f, "Not registered with rendezvous service"),
        }
    }
}

impl std::error::Error for CallError {}

impl From<MediaError> for CallError {
    fn from(e: MediaError) -> Self {
        CallError::Media(e)
    }
}

/// Registration with the rendezvous service: our ephemeral handle plus the
/// inbox of signals addressed to it.
pub struct Registration {
    pub handle: String,
    pub inbox: mpsc::Receiver<CallSignal>,
}

/// Rendezvous/signaling service. Opaque external dependency: assigns
/// ephemeral call handles and relays signals between two handles.
pub trait Rendezvous {
    /// Register and obtain an ephemeral call handle.
    fn register(&mut self) -> impl std::future::Future<Output = Result<Registration, CallError>> + Send;

    /// Send a signal to another handle.
    fn send(
        &self,
        to: &str,
        signal: CallSignal,
    ) -> impl std::future::Future<Output = Result<(), CallError>> + Send;

    /// Release a registration.
    fn unregister(&mut self, handle: &str) -> impl std::future::Future<Output = ()> + Send;
}

/// Local media capture layer.
pub trait MediaDevices {
    /// Request capture of local tracks. May suspend on a permission
    /// prompt; may fail.
    fn capture(
        &self,
        request: CaptureRequest,
    ) -> impl std::future::Future<Output = Result<MediaStream, MediaError>> + Send;

    /// Media description for the given local stream (offer/answer body).
    fn description(&self, stream: &MediaStream) -> String;
}

/// Per-participant call negotiator.
pub struct CallNegotiator<S, M> {
    role: CallRole,
    signaling: S,
    devices: M,
    state: CallState,
    /// Our rendezvous handle, once registered
    handle: Option<String>,
    /// Inbox of signals addressed to us
    inbox: Option<mpsc::Receiver<CallSignal>>,
    /// The counterpart's handle, once known
    remote: Option<String>,
    /// The counterpart's media description (offer or answer body)
    remote_description: Option<String>,
    /// Local capture, while the call is live
    media: Option<MediaStream>,
    /// Remote connectivity candidates, in arrival order
    remote_candidates: Vec<String>,
}

impl<S: Rendezvous, M: MediaDevices> CallNegotiator<S, M> {
    pub fn new(role: CallRole, signaling: S, devices: M) -> Self {
        Self {
            role,
            signaling,
            devices,
            state: CallState::Idle,
            handle: None,
            inbox: None,
            remote: None,
            remote_description: None,
            media: None,
            remote_candidates: Vec::new(),
        }
    }

    /// Register with the rendezvous service. The returned handle travels
    /// in our `PeerInfo` so the counterpart can address us.
    pub async fn register(&mut self) -> Result<&str, CallError> {
        let registration = self.signaling.register().await?;
        self.inbox = Some(registration.inbox);
        Ok(self.handle.insert(registration.handle).as_str())
    }

    /// Initiator: capture local media and send the offer.
    ///
    /// On capture failure the error is surfaced and the state stays
    /// `Idle`; the user may retry after granting permission.
    pub async fn offer(&mut self, remote_handle: &str) -> Result<(), CallError> {
        if self.role != CallRole::Initiator || self.state != CallState::Idle {
            return Err(CallError::InvalidState { state: self.state, event: "offer" });
        }
        let own = self.handle.clone().ok_or(CallError::NotRegistered)?;

        let stream = self.devices.capture(CaptureRequest::audio_video()).await?;
        let sdp = self.devices.description(&stream);

        self.signaling
            .send(remote_handle, CallSignal::Offer { from: own, sdp })
            .await?;

        self.media = Some(stream);
        self.remote = Some(remote_handle.to_string());
        self.state = CallState::AwaitingAnswer;
        log::info!("Call offer sent to {remote_handle}");
        Ok(())
    }

    /// Responder: capture local media and answer the stored offer.
    ///
    /// On capture failure the state remains `AwaitingMedia` so the user
    /// can retry; the offer is not lost.
    pub async fn answer(&mut self) -> Result<(), CallError> {
        if self.state != CallState::AwaitingMedia {
            return Err(CallError::InvalidState { state: self.state, event: "answer" });
        }
        if self.handle.is_none() {
            return Err(CallError::NotRegistered);
        }
        let remote = self
            .remote
            .clone()
            .ok_or(CallError::InvalidState { state: self.state, event: "answer" })?;

        let stream = self.devices.capture(CaptureRequest::audio_video()).await?;
        let sdp = self.devices.description(&stream);

        self.signaling.send(&remote, CallSignal::Answer { sdp }).await?;

        self.media = Some(stream);
        self.state = CallState::Answering;
        log::info!("Call answered toward {remote}");
        Ok(())
    }

    /// Feed one inbound signal into the state machine.
    pub async fn handle_signal(&mut self, signal: CallSignal) -> Result<(), CallError> {
        match signal {
            CallSignal::Offer { from, sdp } => {
                if self.role != CallRole::Responder || self.state != CallState::Idle {
                    return Err(CallError::InvalidState { state: self.state, event: "Offer" });
                }
                log::info!("Incoming call offer from {from}");
                self.remote = Some(from);
                self.remote_description = Some(sdp);
                self.state = CallState::AwaitingMedia;
                Ok(())
            }

            CallSignal::Answer { sdp } => {
                if self.state != CallState::AwaitingAnswer {
                    return Err(CallError::InvalidState { state: self.state, event: "Answer" });
                }
                self.remote_description = Some(sdp);
                self.state = CallState::Connected;
                log::info!("Call answered; media connected");
                Ok(())
            }

            CallSignal::Candidate { candidate } => {
                match self.state {
                    CallState::AwaitingAnswer | CallState::Answering | CallState::Connected => {
                        self.remote_candidates.push(candidate);
                        // First candidate after our answer means a direct
                        // path exists
                        if self.state == CallState::Answering {
                            self.state = CallState::Connected;
                            log::info!("Direct media path established");
                        }
                        Ok(())
                    }
                    _ => Err(CallError::InvalidState { state: self.state, event: "Candidate" }),
                }
            }
        }
    }

    /// Send a local connectivity candidate to the counterpart.
    pub async fn send_candidate(&self, candidate: String) -> Result<(), CallError> {
        let remote = self
            .remote
            .as_deref()
            .ok_or(CallError::InvalidState { state: self.state, event: "send_candidate" })?;
        self.signaling
            .send(remote, CallSignal::Candidate { candidate })
            .await
    }

    /// Receive the next signal addressed to our handle.
    pub async fn next_signal(&mut self) -> Option<CallSignal> {
        match self.inbox {
            Some(ref mut rx) => rx.recv().await,
            None => None,
        }
    }

    /// Local audio mute toggle. A pure track-enable flip; the connection
    /// is not renegotiated.
    pub fn set_muted(&mut self, muted: bool) {
        if let Some(ref mut media) = self.media {
            media.audio.enabled = !muted;
        }
    }

    /// Whether the local audio track is muted.
    pub fn muted(&self) -> bool {
        self.media.as_ref().map(|m| !m.audio.enabled).unwrap_or(false)
    }

    /// Camera toggle. Turning off stops and releases the video track;
    /// turning back on re-acquires the device, which can fail (permission
    /// revoked, device busy). The failure is surfaced to the caller and
    /// the call stays up on audio.
    pub async fn set_camera(&mut self, on: bool) -> Result<(), CallError> {
        let media = match self.media {
            Some(ref mut m) => m,
            None => {
                return Err(CallError::InvalidState { state: self.state, event: "set_camera" })
            }
        };

        if !on {
            media.video = None;
            log::debug!("Video track stopped");
            return Ok(());
        }

        if media.video.is_some() {
            return Ok(());
        }

        // Fresh capture request for the re-acquired track
        let fresh = self.devices.capture(CaptureRequest::video_only()).await?;
        media.video = fresh.video;
        log::debug!("Video track re-acquired");
        Ok(())
    }

    /// Whether a live video track is attached.
    pub fn camera_on(&self) -> bool {
        self.media.as_ref().map(|m| m.video.is_some()).unwrap_or(false)
    }

    /// End the call locally and release the rendezvous registration. The
    /// remote side sees this as connection loss.
    pub async fn hang_up(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.signaling.unregister(&handle).await;
        }
        self.media = None;
        self.inbox = None;
        self.remote_description = None;
        self.state = CallState::Ended;
        log::info!("Call ended locally");
    }

    /// The media layer reported the peer connection as lost.
    pub fn on_peer_disconnected(&mut self) {
        self.media = None;
        self.state = CallState::Ended;
        log::info!("Peer connection lost; call ended");
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn role(&self) -> CallRole {
        self.role
    }

    /// Our rendezvous handle, once registered.
    pub fn handle(&self) -> Option<&str> {
        self.handle.as_deref()
    }

    /// The counterpart's handle, once known.
    pub fn remote_handle(&self) -> Option<&str> {
        self.remote.as_deref()
    }

    /// The counterpart's media description, once exchanged.
    pub fn remote_description(&self) -> Option<&str> {
        self.remote_description.as_deref()
    }

    /// Remote candidates received so far.
    pub fn remote_candidates(&self) -> &[String] {
        &self.remote_candidates
    }
}
