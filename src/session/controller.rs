//! The call state machine.
//!
//! One task per call. Every input (UI commands, peer events, live signaling,
//! media and lookup completions, timers) is turned into a [`SessionEvent`] and
//! handled by [`CallController::dispatch`], so state only ever changes in one
//! place and in arrival order.

use super::handle::{CallHandle, Command};
use super::{CallId, CallSession, CallSnapshot, DisconnectReason, Role, SessionState, VideoSource};
use crate::alert::AlertTimer;
use crate::config::CallConfig;
use crate::media::{MediaConstraints, MediaDevices, MediaStream, RemoteStreamSink};
use crate::messages::{Message, MessageLog};
use crate::peer::{PeerConnector, PeerEvent, PeerSession};
use crate::screen_share::ScreenShareController;
use crate::signaling::{LiveReceiver, SignalPayload, SignalingClient};
use crate::{CallError, Result};
use bytes::Bytes;
use futures::future::BoxFuture;
use std::future::pending;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

const COMMAND_BUFFER: usize = 32;

/// External collaborators a call needs
#[derive(Clone)]
pub struct CallEnvironment {
    pub devices: Arc<dyn MediaDevices>,
    pub connector: Arc<dyn PeerConnector>,
    pub signaling: Arc<dyn SignalingClient>,
    pub sink: Arc<dyn RemoteStreamSink>,
}

enum SessionEvent {
    Command(Command),
    HandlesDropped,
    Peer(PeerEvent),
    LiveSignal(SignalPayload),
    MediaAcquired(Result<MediaStream>),
    SignalFetched(Option<SignalPayload>),
    FetchRetryDue,
    AlertExpired,
    CaptureEnded,
}

pub struct CallController {
    session: CallSession,
    config: Arc<CallConfig>,
    env: CallEnvironment,
    local_media: Option<MediaStream>,
    peer: Option<PeerSession>,
    screen_share: Option<ScreenShareController>,
    messages: MessageLog,
    alert: AlertTimer,
    live_rx: Option<LiveReceiver>,
    /// Live payload that arrived before the peer channel existed
    pending_remote: Option<SignalPayload>,
    media_request: Option<BoxFuture<'static, Result<MediaStream>>>,
    signal_fetch: Option<BoxFuture<'static, Option<SignalPayload>>>,
    fetch_attempts: u32,
    fetch_retry_at: Option<Instant>,
    commands: mpsc::Receiver<Command>,
    snapshot_tx: watch::Sender<CallSnapshot>,
}

/// Spawns the controller for one call and returns the UI-facing handle.
pub fn start_call(
    call_id: CallId,
    role: Role,
    config: Arc<CallConfig>,
    env: CallEnvironment,
) -> CallHandle {
    let (controller, handle) = CallController::new(call_id, role, config, env);
    tokio::spawn(controller.run());
    handle
}

impl CallController {
    pub fn new(
        call_id: CallId,
        role: Role,
        config: Arc<CallConfig>,
        env: CallEnvironment,
    ) -> (Self, CallHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let session = CallSession::new(call_id, role);
        let messages = MessageLog::new();
        let alert = AlertTimer::new(config.alert_timeout());

        let initial = snapshot_of(&session, &messages, &alert);
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);

        let controller = Self {
            session,
            config,
            env,
            local_media: None,
            peer: None,
            screen_share: None,
            messages,
            alert,
            live_rx: None,
            pending_remote: None,
            media_request: None,
            signal_fetch: None,
            fetch_attempts: 0,
            fetch_retry_at: None,
            commands: cmd_rx,
            snapshot_tx,
        };
        let handle = CallHandle::new(cmd_tx, snapshot_rx);
        (controller, handle)
    }

    pub fn snapshot(&self) -> CallSnapshot {
        snapshot_of(&self.session, &self.messages, &self.alert)
    }

    /// Drives the call until it is disconnected.
    pub async fn run(mut self) {
        info!(
            call_id = %self.session.call_id,
            role = ?self.session.role,
            "call session starting"
        );
        self.begin().await;
        self.publish();

        while !self.session.state.is_terminal() {
            let event = self.next_event().await;
            self.dispatch(event).await;
            self.publish();
        }

        info!(
            call_id = %self.session.call_id,
            state = ?self.session.state,
            "call session ended"
        );
    }

    async fn begin(&mut self) {
        match self.env.signaling.subscribe_live() {
            Ok(rx) => self.live_rx = Some(rx),
            Err(e) if self.session.role.is_initiator() => {
                error!("initiator cannot listen for the answer: {}", e);
                self.teardown(DisconnectReason::SignalingFailure(e.to_string()))
                    .await;
                return;
            }
            Err(e) => debug!("joiner runs without live receive: {}", e),
        }

        self.transition(SessionState::AcquiringMedia);
        let devices = Arc::clone(&self.env.devices);
        self.media_request = Some(Box::pin(async move {
            devices.user_media(MediaConstraints::default()).await
        }));
    }

    async fn next_event(&mut self) -> SessionEvent {
        tokio::select! {
            cmd = self.commands.recv() => match cmd {
                Some(cmd) => SessionEvent::Command(cmd),
                None => SessionEvent::HandlesDropped,
            },
            Some(event) = next_peer_event(&mut self.peer) => SessionEvent::Peer(event),
            Some(payload) = recv_live(&mut self.live_rx) => SessionEvent::LiveSignal(payload),
            media = poll_slot(&mut self.media_request) => SessionEvent::MediaAcquired(media),
            fetched = poll_slot(&mut self.signal_fetch) => SessionEvent::SignalFetched(fetched),
            _ = sleep_until_opt(self.fetch_retry_at) => SessionEvent::FetchRetryDue,
            _ = self.alert.expired() => SessionEvent::AlertExpired,
            _ = capture_ended(&self.screen_share) => SessionEvent::CaptureEnded,
        }
    }

    async fn dispatch(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Command(cmd) => self.handle_command(cmd).await,
            SessionEvent::HandlesDropped => {
                info!("all call handles dropped, hanging up");
                self.teardown(DisconnectReason::Hangup).await;
            }
            SessionEvent::Peer(event) => self.handle_peer_event(event).await,
            SessionEvent::LiveSignal(payload) => self.handle_live_signal(payload).await,
            SessionEvent::MediaAcquired(media) => self.on_media(media).await,
            SessionEvent::SignalFetched(payload) => self.on_signal_fetched(payload).await,
            SessionEvent::FetchRetryDue => {
                self.fetch_retry_at = None;
                self.start_signal_fetch();
            }
            SessionEvent::AlertExpired => {
                debug!("message alert dismissed");
                self.alert.dismiss();
            }
            SessionEvent::CaptureEnded => self.on_capture_ended().await,
        }
    }

    // ---- setup ----

    async fn on_media(&mut self, media: Result<MediaStream>) {
        let stream = match media {
            Ok(stream) => stream,
            Err(e) => {
                error!("media acquisition failed: {}", e);
                let reason = match e {
                    CallError::MediaAccessDenied(msg) => msg,
                    other => other.to_string(),
                };
                self.teardown(DisconnectReason::MediaAccessDenied(reason))
                    .await;
                return;
            }
        };

        info!(
            audio = stream.audio_tracks().len(),
            video = stream.video_tracks().len(),
            "local media acquired"
        );
        for track in stream.audio_tracks() {
            track.set_enabled(self.session.audio_enabled);
        }
        self.screen_share = match ScreenShareController::new(&stream) {
            Ok(share) => Some(share),
            Err(_) => {
                warn!("no camera track, screen share unavailable");
                None
            }
        };
        self.local_media = Some(stream.clone());

        let role = self.session.role;
        match PeerSession::open(self.env.connector.as_ref(), role, &stream).await {
            Ok(peer) => self.peer = Some(peer),
            Err(e) => {
                error!("peer channel could not be created: {}", e);
                self.teardown(DisconnectReason::PeerFailure(e.to_string()))
                    .await;
                return;
            }
        }

        match role {
            Role::Initiator => {
                self.transition(SessionState::Negotiating);
                if let Some(payload) = self.pending_remote.take() {
                    debug!("applying buffered live payload");
                    self.accept_remote(payload).await;
                }
            }
            Role::Joiner => {
                self.transition(SessionState::AwaitingSignal);
                self.start_signal_fetch();
            }
        }
    }

    fn start_signal_fetch(&mut self) {
        self.fetch_attempts += 1;
        debug!(attempt = self.fetch_attempts, "looking up initiator signal");
        let signaling = Arc::clone(&self.env.signaling);
        let call_id = self.session.call_id.clone();
        self.signal_fetch = Some(Box::pin(async move {
            signaling.fetch_published(&call_id).await
        }));
    }

    async fn on_signal_fetched(&mut self, payload: Option<SignalPayload>) {
        if self.session.state != SessionState::AwaitingSignal {
            return;
        }
        match payload {
            Some(payload) => {
                info!("initiator signal found");
                if self.accept_remote(payload).await {
                    self.transition(SessionState::Negotiating);
                }
            }
            None => {
                let policy = self.config.signal_fetch;
                if self.fetch_attempts < policy.attempts {
                    debug!(
                        attempt = self.fetch_attempts,
                        "initiator signal not available yet, retrying"
                    );
                    self.fetch_retry_at = Some(Instant::now() + policy.retry_interval());
                } else {
                    warn!(
                        attempts = self.fetch_attempts,
                        "initiator signal not available, call stays in AwaitingSignal"
                    );
                }
            }
        }
    }

    async fn handle_live_signal(&mut self, payload: SignalPayload) {
        if !self.session.role.is_initiator() {
            warn!("joiner ignores live {:?}", payload);
            return;
        }
        let accepted = self.peer.as_ref().map(PeerSession::remote_signal_accepted);
        match accepted {
            None => {
                if self.pending_remote.is_some() {
                    warn!("live payload already buffered, ignoring {:?}", payload);
                } else {
                    debug!("peer channel not ready, buffering live {:?}", payload);
                    self.pending_remote = Some(payload);
                }
            }
            Some(true) => {
                warn!("answer already accepted, ignoring {:?}", payload);
            }
            Some(false) => {
                self.accept_remote(payload).await;
            }
        }
    }

    /// Feeds the counterpart's payload to the peer. False if it was not applied.
    async fn accept_remote(&mut self, payload: SignalPayload) -> bool {
        let Some(peer) = self.peer.as_mut() else {
            self.pending_remote = Some(payload);
            return false;
        };
        match peer.accept_remote_signal(payload).await {
            Ok(()) => true,
            Err(CallError::SignalAlreadyAccepted) => {
                warn!("duplicate remote signal ignored");
                false
            }
            Err(e) => {
                error!("remote signal rejected: {}", e);
                self.teardown(DisconnectReason::PeerFailure(e.to_string()))
                    .await;
                false
            }
        }
    }

    // ---- peer events ----

    async fn handle_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::LocalSignal(payload) => self.route_local_signal(payload).await,
            PeerEvent::Connected => {
                info!("peer connected");
                if matches!(
                    self.session.state,
                    SessionState::Negotiating | SessionState::AwaitingSignal
                ) {
                    self.transition(SessionState::Connected);
                }
            }
            PeerEvent::Data(bytes) => self.on_remote_message(bytes),
            PeerEvent::RemoteStream(stream) => {
                info!(stream = stream.id(), "remote stream available");
                self.env.sink.attach(stream);
                self.session.remote_stream_attached = true;
            }
            PeerEvent::Closed => {
                info!("peer channel closed by counterpart");
                self.teardown(DisconnectReason::RemoteHangup).await;
            }
            PeerEvent::Failed(reason) => {
                error!("peer channel failed: {}", reason);
                self.teardown(DisconnectReason::PeerFailure(reason)).await;
            }
        }
    }

    async fn route_local_signal(&mut self, payload: SignalPayload) {
        let result = match self.session.role {
            Role::Initiator => {
                debug!("publishing local {:?}", payload);
                self.env
                    .signaling
                    .publish(&self.session.call_id, &payload)
                    .await
            }
            Role::Joiner => {
                debug!("sending local {:?} over live channel", payload);
                self.env.signaling.send_live(&payload).await
            }
        };
        if let Err(e) = result {
            error!("local signal could not be delivered: {}", e);
            self.teardown(DisconnectReason::SignalingFailure(e.to_string()))
                .await;
        }
    }

    fn on_remote_message(&mut self, bytes: Bytes) {
        let message = Message::remote(String::from_utf8_lossy(&bytes).into_owned());
        debug!(len = bytes.len(), "chat message received");
        self.messages.append(message.clone());
        if !self.session.chat_open {
            self.alert.notify(message);
        }
    }

    async fn on_capture_ended(&mut self) {
        let Some(share) = self.screen_share.as_mut() else {
            return;
        };
        match self.peer.as_mut() {
            Some(peer) => match share.revert(peer).await {
                Ok(()) => self.session.outbound_video = VideoSource::Camera,
                Err(e) => warn!("camera could not be restored, still presenting: {}", e),
            },
            None => {
                share.release();
                self.session.outbound_video = VideoSource::Camera;
            }
        }
    }

    // ---- UI commands ----

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::SendMessage { text, reply } => {
                let result = self.send_message(text).await;
                let _ = reply.send(result);
            }
            Command::ToggleAudio { enabled, reply } => {
                let _ = reply.send(self.toggle_audio(enabled));
            }
            Command::StartScreenShare { reply } => {
                let result = self.start_screen_share().await;
                let _ = reply.send(result);
            }
            Command::StopScreenShare { reply } => {
                let result = self.stop_screen_share().await;
                let _ = reply.send(result);
            }
            Command::SetChatOpen { open } => {
                self.session.chat_open = open;
            }
            Command::DismissAlert => self.alert.dismiss(),
            Command::Disconnect { reply } => {
                self.teardown(DisconnectReason::Hangup).await;
                let _ = reply.send(());
            }
        }
    }

    async fn send_message(&mut self, text: String) -> Result<()> {
        let peer = self.peer.as_mut().ok_or(CallError::SendBeforeConnected)?;
        peer.send(Bytes::from(text.clone().into_bytes())).await?;
        // optimistic local echo: no delivery acknowledgment exists
        self.messages.append(Message::local(text));
        Ok(())
    }

    fn toggle_audio(&mut self, enabled: bool) -> Result<()> {
        let media = self.local_media.as_ref().ok_or(CallError::MediaNotReady)?;
        for track in media.audio_tracks() {
            track.set_enabled(enabled);
        }
        self.session.audio_enabled = enabled;
        debug!(enabled, "audio toggled");
        Ok(())
    }

    async fn start_screen_share(&mut self) -> Result<()> {
        let (Some(share), Some(peer)) = (self.screen_share.as_mut(), self.peer.as_mut()) else {
            return Err(CallError::MediaNotReady);
        };
        share.start(self.env.devices.as_ref(), peer).await?;
        self.session.outbound_video = VideoSource::Display;
        Ok(())
    }

    async fn stop_screen_share(&mut self) -> Result<()> {
        let (Some(share), Some(peer)) = (self.screen_share.as_mut(), self.peer.as_mut()) else {
            return Err(CallError::NotSharing);
        };
        share.stop(peer).await?;
        self.session.outbound_video = VideoSource::Camera;
        Ok(())
    }

    // ---- teardown ----

    async fn teardown(&mut self, reason: DisconnectReason) {
        if self.session.state.is_terminal() {
            return;
        }
        info!(?reason, "tearing down call");

        self.media_request = None;
        self.signal_fetch = None;
        self.fetch_retry_at = None;
        self.pending_remote = None;
        self.live_rx = None;

        if let Some(share) = self.screen_share.as_mut() {
            share.release();
        }
        if let Some(mut peer) = self.peer.take() {
            if let Err(e) = peer.destroy().await {
                warn!("peer teardown reported: {}", e);
            }
        }
        if let Some(media) = self.local_media.take() {
            media.stop();
        }
        self.alert.dismiss();
        self.session.outbound_video = VideoSource::Camera;
        self.session.state = SessionState::Disconnected(reason);
    }

    fn transition(&mut self, next: SessionState) {
        if self.session.state.is_terminal() {
            return;
        }
        debug!("state {:?} -> {:?}", self.session.state, next);
        self.session.state = next;
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }
}

fn snapshot_of(session: &CallSession, messages: &MessageLog, alert: &AlertTimer) -> CallSnapshot {
    CallSnapshot {
        call_id: session.call_id.clone(),
        role: session.role,
        state: session.state.clone(),
        outbound_video: session.outbound_video,
        audio_enabled: session.audio_enabled,
        chat_open: session.chat_open,
        remote_stream_attached: session.remote_stream_attached,
        messages: messages.snapshot(),
        alert: alert.state().clone(),
    }
}

async fn next_peer_event(peer: &mut Option<PeerSession>) -> Option<PeerEvent> {
    match peer {
        Some(peer) => peer.next_event().await,
        None => pending().await,
    }
}

async fn recv_live(rx: &mut Option<LiveReceiver>) -> Option<SignalPayload> {
    match rx {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

async fn poll_slot<T>(slot: &mut Option<BoxFuture<'static, T>>) -> T {
    let out = match slot.as_mut() {
        Some(fut) => fut.await,
        None => pending().await,
    };
    *slot = None;
    out
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn capture_ended(share: &Option<ScreenShareController>) {
    match share {
        Some(share) => share.capture_ended().await,
        None => pending().await,
    }
}
