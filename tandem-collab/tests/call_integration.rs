//! Integration tests for two-party call negotiation.
//!
//! Two negotiators talk through an in-memory rendezvous hub that behaves
//! like the real signaling service: ephemeral handles, signals relayed
//! between handles, unknown handles rejected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tandem_collab::call::{
    CallError, CallNegotiator, CallRole, CallSignal, CallState, CaptureRequest,
    MediaDevices, MediaError, MediaStream, MediaTrack, Registration, Rendezvous,
    TrackKind,
};
use tandem_collab::protocol::ParticipantRole;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{timeout, Duration};

/// Shared in-memory signaling hub.
#[derive(Clone, Default)]
struct SignalHub {
    clients: Arc<Mutex<HashMap<String, mpsc::Sender<CallSignal>>>>,
    next_id: Arc<AtomicU64>,
}

impl SignalHub {
    fn new() -> Self {
        Self::default()
    }

    fn endpoint(&self) -> HubRendezvous {
        HubRendezvous { hub: self.clone() }
    }
}

/// One client's view of the hub.
struct HubRendezvous {
    hub: SignalHub,
}

impl Rendezvous for HubRendezvous {
    async fn register(&mut self) -> Result<Registration, CallError> {
        let id = self.hub.next_id.fetch_add(1, Ordering::SeqCst);
        let handle = format!("rv-{id}");
        let (tx, rx) = mpsc::channel(32);
        self.hub.clients.lock().await.insert(handle.clone(), tx);
        Ok(Registration { handle, inbox: rx })
    }

    async fn send(&self, to: &str, signal: CallSignal) -> Result<(), CallError> {
        let tx = {
            let clients = self.hub.clients.lock().await;
            clients.get(to).cloned()
        };
        match tx {
            Some(tx) => tx
                .send(signal)
                .await
                .map_err(|_| CallError::Signaling(format!("handle {to} gone"))),
            None => Err(CallError::Signaling(format!("unknown handle {to}"))),
        }
    }

    async fn unregister(&mut self, handle: &str) {
        self.hub.clients.lock().await.remove(handle);
    }
}

/// Capture layer that can be told to start failing re-acquires.
struct TestDevices {
    fail_reacquire: Arc<AtomicBool>,
}

impl TestDevices {
    fn new() -> Self {
        Self { fail_reacquire: Arc::new(AtomicBool::new(false)) }
    }
}

impl MediaDevices for TestDevices {
    async fn capture(&self, request: CaptureRequest) -> Result<MediaStream, MediaError> {
        if !request.audio && self.fail_reacquire.load(Ordering::SeqCst) {
            return Err(MediaError::DeviceBusy);
        }
        Ok(MediaStream {
            audio: MediaTrack::new(TrackKind::Audio),
            video: request.video.then(|| MediaTrack::new(TrackKind::Video)),
        })
    }

    fn description(&self, _stream: &MediaStream) -> String {
        "v=0 test".to_string()
    }
}

type TestNegotiator = CallNegotiator<HubRendezvous, TestDevices>;

fn negotiator(hub: &SignalHub, role: ParticipantRole) -> TestNegotiator {
    CallNegotiator::new(CallRole::from_participant(role), hub.endpoint(), TestDevices::new())
}

/// Pump one signal from the inbox into the state machine.
async fn pump(neg: &mut TestNegotiator) {
    let signal = timeout(Duration::from_secs(2), neg.next_signal())
        .await
        .expect("signal within timeout")
        .expect("inbox open");
    neg.handle_signal(signal).await.expect("signal accepted");
}

#[tokio::test]
async fn test_full_handshake() {
    let hub = SignalHub::new();

    // Interviewee initiates, interviewer answers
    let mut caller = negotiator(&hub, ParticipantRole::Interviewee);
    let mut callee = negotiator(&hub, ParticipantRole::Interviewer);

    caller.register().await.unwrap();
    let callee_handle = callee.register().await.unwrap().to_string();

    caller.offer(&callee_handle).await.unwrap();
    assert_eq!(caller.state(), CallState::AwaitingAnswer);

    // Callee: Offer → AwaitingMedia → answer() → Answering
    pump(&mut callee).await;
    assert_eq!(callee.state(), CallState::AwaitingMedia);
    assert_eq!(callee.remote_handle(), caller.handle());

    callee.answer().await.unwrap();
    assert_eq!(callee.state(), CallState::Answering);

    // Caller: Answer → Connected
    pump(&mut caller).await;
    assert_eq!(caller.state(), CallState::Connected);
    assert_eq!(caller.remote_description(), Some("v=0 test"));

    // Candidates trickle both ways; the first one the callee receives
    // marks the direct path as established
    caller.send_candidate("caller-host".to_string()).await.unwrap();
    pump(&mut callee).await;
    assert_eq!(callee.state(), CallState::Connected);

    callee.send_candidate("callee-host".to_string()).await.unwrap();
    pump(&mut caller).await;
    assert_eq!(caller.state(), CallState::Connected);

    assert_eq!(caller.remote_candidates(), ["callee-host"]);
    assert_eq!(callee.remote_candidates(), ["caller-host"]);
}

#[tokio::test]
async fn test_track_toggles_during_call() {
    let hub = SignalHub::new();
    let mut caller = negotiator(&hub, ParticipantRole::Interviewee);
    let mut callee = negotiator(&hub, ParticipantRole::Interviewer);

    caller.register().await.unwrap();
    let callee_handle = callee.register().await.unwrap().to_string();

    caller.offer(&callee_handle).await.unwrap();
    pump(&mut callee).await;
    callee.answer().await.unwrap();
    pump(&mut caller).await;

    // Mute is purely local
    caller.set_muted(true);
    assert!(caller.muted());
    caller.set_muted(false);
    assert!(!caller.muted());

    // Camera off releases the device; back on re-acquires
    caller.set_camera(false).await.unwrap();
    assert!(!caller.camera_on());
    caller.set_camera(true).await.unwrap();
    assert!(caller.camera_on());

    assert_eq!(caller.state(), CallState::Connected);
}

#[tokio::test]
async fn test_camera_reacquire_failure_keeps_call_up() {
    let hub = SignalHub::new();
    let devices = TestDevices::new();
    let fail_flag = devices.fail_reacquire.clone();
    let mut caller = CallNegotiator::new(CallRole::Initiator, hub.endpoint(), devices);
    let mut callee = negotiator(&hub, ParticipantRole::Interviewer);

    caller.register().await.unwrap();
    let callee_handle = callee.register().await.unwrap().to_string();

    caller.offer(&callee_handle).await.unwrap();
    pump(&mut callee).await;
    callee.answer().await.unwrap();
    pump(&mut caller).await;

    caller.set_camera(false).await.unwrap();

    // The device is now busy elsewhere
    fail_flag.store(true, Ordering::SeqCst);
    let result = caller.set_camera(true).await;
    assert!(matches!(result, Err(CallError::Media(MediaError::DeviceBusy))));

    // Surfaced to the user, not fatal: the call stays up on audio
    assert_eq!(caller.state(), CallState::Connected);
    assert!(!caller.camera_on());

    // Device freed again: retry succeeds
    fail_flag.store(false, Ordering::SeqCst);
    caller.set_camera(true).await.unwrap();
    assert!(caller.camera_on());
}

#[tokio::test]
async fn test_teardown_on_peer_loss() {
    let hub = SignalHub::new();
    let mut caller = negotiator(&hub, ParticipantRole::Interviewee);
    let mut callee = negotiator(&hub, ParticipantRole::Interviewer);

    caller.register().await.unwrap();
    let callee_handle = callee.register().await.unwrap().to_string();
    let caller_handle = caller.handle().unwrap().to_string();

    caller.offer(&callee_handle).await.unwrap();
    pump(&mut callee).await;
    callee.answer().await.unwrap();
    pump(&mut caller).await;

    // Caller navigates away: local call object is destroyed
    caller.hang_up().await;
    assert_eq!(caller.state(), CallState::Ended);

    // No explicit leave signal exists; the surviving side observes the
    // connection loss and ends too
    callee.on_peer_disconnected();
    assert_eq!(callee.state(), CallState::Ended);

    // The departed handle is gone from the rendezvous service
    let result = hub
        .endpoint()
        .send(&caller_handle, CallSignal::Candidate { candidate: "late".to_string() })
        .await;
    assert!(matches!(result, Err(CallError::Signaling(_))));
}
