use super::{PeerChannel, PeerConnector, PeerEvent, PeerEventReceiver};
use crate::media::{MediaStream, MediaTrack};
use crate::session::Role;
use crate::signaling::SignalPayload;
use crate::{CallError, Result};
use bytes::Bytes;
use std::future::pending;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Owns the raw peer channel for one call and the guard rails around it:
/// remote setup data goes in once, sends wait for the data path, and the
/// channel is destroyed exactly once.
pub struct PeerSession {
    role: Role,
    channel: Option<Box<dyn PeerChannel>>,
    events: PeerEventReceiver,
    connected: bool,
    remote_signal_accepted: bool,
    outbound_video: Option<MediaTrack>,
}

impl PeerSession {
    pub async fn open(
        connector: &dyn PeerConnector,
        role: Role,
        local: &MediaStream,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = connector.connect(role, local, tx).await?;
        info!(?role, stream = local.id(), "peer channel created");

        Ok(Self {
            role,
            channel: Some(channel),
            events: rx,
            connected: false,
            remote_signal_accepted: false,
            outbound_video: local.video_tracks().into_iter().next(),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn remote_signal_accepted(&self) -> bool {
        self.remote_signal_accepted
    }

    pub fn is_destroyed(&self) -> bool {
        self.channel.is_none()
    }

    /// Track currently routed to the counterpart as video
    pub fn outbound_video(&self) -> Option<&MediaTrack> {
        self.outbound_video.as_ref()
    }

    /// Next event from the primitive. Never resolves once destroyed.
    pub async fn next_event(&mut self) -> Option<PeerEvent> {
        if self.channel.is_none() {
            return pending().await;
        }
        let event = self.events.recv().await?;
        match &event {
            PeerEvent::Connected => self.connected = true,
            PeerEvent::Closed | PeerEvent::Failed(_) => self.connected = false,
            _ => {}
        }
        Some(event)
    }

    pub async fn accept_remote_signal(&mut self, payload: SignalPayload) -> Result<()> {
        if self.remote_signal_accepted {
            return Err(CallError::SignalAlreadyAccepted);
        }
        let channel = self.channel.as_mut().ok_or(CallError::PeerDestroyed)?;
        debug!("accepting remote {:?}", payload);
        channel.accept_remote_signal(payload).await?;
        self.remote_signal_accepted = true;
        Ok(())
    }

    pub async fn send(&mut self, data: Bytes) -> Result<()> {
        let channel = self.channel.as_mut().ok_or(CallError::PeerDestroyed)?;
        if !self.connected {
            return Err(CallError::SendBeforeConnected);
        }
        channel.send(data).await
    }

    pub async fn replace_outbound_video_track(
        &mut self,
        old: &MediaTrack,
        new: &MediaTrack,
        stream: &MediaStream,
    ) -> Result<()> {
        let channel = self.channel.as_mut().ok_or(CallError::PeerDestroyed)?;
        channel.replace_outbound_video_track(old, new, stream).await?;
        debug!(old = old.id(), new = new.id(), "outbound video track replaced");
        self.outbound_video = Some(new.clone());
        Ok(())
    }

    pub async fn destroy(&mut self) -> Result<()> {
        let Some(mut channel) = self.channel.take() else {
            warn!("peer channel already destroyed");
            return Err(CallError::PeerDestroyed);
        };
        self.connected = false;
        info!("destroying peer channel");
        channel.destroy().await
    }
}
