#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use ssc_call::config::CallConfig;
use ssc_call::media::{MediaConstraints, MediaDevices, MediaStream, MediaTrack, RemoteStreamSink, TrackKind};
use ssc_call::peer::{PeerChannel, PeerConnector, PeerEvent, PeerEventSender};
use ssc_call::signaling::{MemorySignalingHub, SignalPayload, SignalingClient};
use ssc_call::{start_call, CallEnvironment, CallError, CallHandle, CallId, Result, Role};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayBehavior {
    Grant,
    Cancel,
    NoVideo,
}

/// Hands out fresh camera/microphone and display streams and remembers them.
pub struct FakeDevices {
    deny_user_media: bool,
    display: DisplayBehavior,
    media_gate: Option<Notify>,
    user_streams: Mutex<Vec<MediaStream>>,
    display_streams: Mutex<Vec<MediaStream>>,
}

impl FakeDevices {
    pub fn new() -> Arc<Self> {
        Self::build(false, DisplayBehavior::Grant)
    }

    pub fn denying() -> Arc<Self> {
        Self::build(true, DisplayBehavior::Grant)
    }

    pub fn with_display(display: DisplayBehavior) -> Arc<Self> {
        Self::build(false, display)
    }

    /// Camera access only resolves after `release_media`
    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            media_gate: Some(Notify::new()),
            ..Self::plain(false, DisplayBehavior::Grant)
        })
    }

    pub fn release_media(&self) {
        if let Some(gate) = &self.media_gate {
            gate.notify_one();
        }
    }

    fn build(deny_user_media: bool, display: DisplayBehavior) -> Arc<Self> {
        Arc::new(Self::plain(deny_user_media, display))
    }

    fn plain(deny_user_media: bool, display: DisplayBehavior) -> Self {
        Self {
            deny_user_media,
            display,
            media_gate: None,
            user_streams: Mutex::new(Vec::new()),
            display_streams: Mutex::new(Vec::new()),
        }
    }

    pub fn camera_stream(&self) -> MediaStream {
        self.user_streams.lock().unwrap().last().cloned().unwrap()
    }

    pub fn camera_track(&self) -> MediaTrack {
        self.camera_stream().video_tracks().remove(0)
    }

    pub fn display_stream(&self) -> MediaStream {
        self.display_streams.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn user_media(&self, _constraints: MediaConstraints) -> Result<MediaStream> {
        if let Some(gate) = &self.media_gate {
            gate.notified().await;
        }
        if self.deny_user_media {
            return Err(CallError::MediaAccessDenied("permission denied".into()));
        }
        let stream = MediaStream::new(vec![
            MediaTrack::new(TrackKind::Audio, "microphone"),
            MediaTrack::new(TrackKind::Video, "camera"),
        ]);
        self.user_streams.lock().unwrap().push(stream.clone());
        Ok(stream)
    }

    async fn display_media(&self) -> Result<MediaStream> {
        let stream = match self.display {
            DisplayBehavior::Cancel => return Err(CallError::UserCancelledCapture),
            DisplayBehavior::NoVideo => MediaStream::new(vec![]),
            DisplayBehavior::Grant => {
                MediaStream::new(vec![MediaTrack::new(TrackKind::Video, "screen")])
            }
        };
        self.display_streams.lock().unwrap().push(stream.clone());
        Ok(stream)
    }
}

#[derive(Default)]
pub struct RecordingSink {
    streams: Mutex<Vec<MediaStream>>,
}

impl RecordingSink {
    pub fn attached(&self) -> Vec<MediaStream> {
        self.streams.lock().unwrap().clone()
    }
}

impl RemoteStreamSink for RecordingSink {
    fn attach(&self, stream: MediaStream) {
        self.streams.lock().unwrap().push(stream);
    }
}

#[derive(Default)]
struct End {
    events: Option<PeerEventSender>,
    local: Option<MediaStream>,
    accepted: Vec<SignalPayload>,
    replaced: Vec<(MediaTrack, MediaTrack)>,
    sent: Vec<Bytes>,
    connects: usize,
    destroys: usize,
    /// Successful replacements allowed before the peer refuses more
    replace_limit: Option<usize>,
    refused: usize,
}

#[derive(Default)]
struct Loop {
    initiator: End,
    joiner: End,
    offers: usize,
}

impl Loop {
    fn end(&mut self, role: Role) -> &mut End {
        match role {
            Role::Initiator => &mut self.initiator,
            Role::Joiner => &mut self.joiner,
        }
    }

    fn counterpart(&mut self, role: Role) -> &mut End {
        match role {
            Role::Initiator => &mut self.joiner,
            Role::Joiner => &mut self.initiator,
        }
    }

    fn emit(&mut self, role: Role, event: PeerEvent) {
        if let Some(tx) = &self.end(role).events {
            let _ = tx.send(event);
        }
    }
}

/// In-process peer pair: one initiator end and one joiner end.
///
/// The initiator emits its offer on connect, the joiner answers once it
/// accepted the offer, and both ends report `Connected` once both accepted.
#[derive(Default, Clone)]
pub struct LoopbackConnector {
    state: Arc<Mutex<Loop>>,
}

impl LoopbackConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connects(&self, role: Role) -> usize {
        self.state.lock().unwrap().end(role).connects
    }

    pub fn destroys(&self, role: Role) -> usize {
        self.state.lock().unwrap().end(role).destroys
    }

    pub fn accepted(&self, role: Role) -> Vec<SignalPayload> {
        self.state.lock().unwrap().end(role).accepted.clone()
    }

    pub fn replaced(&self, role: Role) -> Vec<(MediaTrack, MediaTrack)> {
        self.state.lock().unwrap().end(role).replaced.clone()
    }

    pub fn sent(&self, role: Role) -> Vec<Bytes> {
        self.state.lock().unwrap().end(role).sent.clone()
    }

    pub fn refused(&self, role: Role) -> usize {
        self.state.lock().unwrap().end(role).refused
    }

    /// `Some(n)`: track replacements fail once `n` succeeded
    pub fn limit_replacements(&self, role: Role, limit: Option<usize>) {
        self.state.lock().unwrap().end(role).replace_limit = limit;
    }

    /// Reports a transport failure to one end
    pub fn fail(&self, role: Role, reason: &str) {
        self.state
            .lock()
            .unwrap()
            .emit(role, PeerEvent::Failed(reason.to_string()));
    }
}

#[async_trait]
impl PeerConnector for LoopbackConnector {
    async fn connect(
        &self,
        role: Role,
        local: &MediaStream,
        events: PeerEventSender,
    ) -> Result<Box<dyn PeerChannel>> {
        let mut state = self.state.lock().unwrap();
        let end = state.end(role);
        end.events = Some(events);
        end.local = Some(local.clone());
        end.connects += 1;

        if role == Role::Initiator {
            state.offers += 1;
            let offer = SignalPayload::new(format!("offer-{}", state.offers));
            state.emit(role, PeerEvent::LocalSignal(offer));
        }

        Ok(Box::new(LoopbackPeer {
            role,
            state: Arc::clone(&self.state),
        }))
    }
}

struct LoopbackPeer {
    role: Role,
    state: Arc<Mutex<Loop>>,
}

#[async_trait]
impl PeerChannel for LoopbackPeer {
    async fn accept_remote_signal(&mut self, payload: SignalPayload) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.end(self.role).accepted.push(payload);

        if self.role == Role::Joiner {
            state.emit(
                Role::Joiner,
                PeerEvent::LocalSignal(SignalPayload::new("answer")),
            );
        }

        let both = !state.initiator.accepted.is_empty() && !state.joiner.accepted.is_empty();
        if both {
            for role in [Role::Initiator, Role::Joiner] {
                let remote = state.counterpart(role).local.clone();
                state.emit(role, PeerEvent::Connected);
                if let Some(remote) = remote {
                    state.emit(role, PeerEvent::RemoteStream(remote));
                }
            }
        }
        Ok(())
    }

    async fn send(&mut self, data: Bytes) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.end(self.role).sent.push(data.clone());
        let counterpart = match self.role {
            Role::Initiator => Role::Joiner,
            Role::Joiner => Role::Initiator,
        };
        state.emit(counterpart, PeerEvent::Data(data));
        Ok(())
    }

    async fn replace_outbound_video_track(
        &mut self,
        old: &MediaTrack,
        new: &MediaTrack,
        _stream: &MediaStream,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let end = state.end(self.role);
        if end.replace_limit.is_some_and(|limit| end.replaced.len() >= limit) {
            end.refused += 1;
            return Err(CallError::PeerChannelFailure("replace refused".into()));
        }
        end.replaced.push((old.clone(), new.clone()));
        Ok(())
    }

    async fn destroy(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.end(self.role).destroys += 1;
        let counterpart = match self.role {
            Role::Initiator => Role::Joiner,
            Role::Joiner => Role::Initiator,
        };
        state.emit(counterpart, PeerEvent::Closed);
        Ok(())
    }
}

pub struct Party {
    pub handle: CallHandle,
    pub devices: Arc<FakeDevices>,
    pub sink: Arc<RecordingSink>,
}

pub fn call_id() -> CallId {
    CallId::new("b1946ac92492d234").unwrap()
}

pub fn start_party(
    role: Role,
    config: CallConfig,
    hub: &MemorySignalingHub,
    connector: &Arc<LoopbackConnector>,
    devices: Arc<FakeDevices>,
) -> Party {
    start_party_with(role, config, Arc::new(hub.client(&call_id())), connector, devices)
}

pub fn start_party_with(
    role: Role,
    config: CallConfig,
    signaling: Arc<dyn SignalingClient>,
    connector: &Arc<LoopbackConnector>,
    devices: Arc<FakeDevices>,
) -> Party {
    let sink = Arc::new(RecordingSink::default());
    let env = CallEnvironment {
        devices: devices.clone(),
        connector: connector.clone(),
        signaling,
        sink: sink.clone(),
    };
    let handle = start_call(call_id(), role, Arc::new(config), env);
    Party {
        handle,
        devices,
        sink,
    }
}

/// Polls until `cond` holds; panics after a generous deadline.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(30), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
