//! Routing a captured display instead of the camera, and back.

use crate::media::{MediaDevices, MediaStream, MediaTrack};
use crate::peer::PeerSession;
use crate::{CallError, Result};
use std::future::pending;
use tracing::{info, warn};

pub struct ScreenShareController {
    camera_stream: MediaStream,
    /// Camera video track as captured at session start; always the revert target
    camera: MediaTrack,
    captured: Option<MediaStream>,
    /// Set once an automatic revert was tried for the current capture
    revert_attempted: bool,
}

impl ScreenShareController {
    pub fn new(camera_stream: &MediaStream) -> Result<Self> {
        let camera = camera_stream
            .video_tracks()
            .into_iter()
            .next()
            .ok_or(CallError::MediaNotReady)?;
        Ok(Self {
            camera_stream: camera_stream.clone(),
            camera,
            captured: None,
            revert_attempted: false,
        })
    }

    pub fn camera_track(&self) -> &MediaTrack {
        &self.camera
    }

    pub fn captured(&self) -> Option<&MediaStream> {
        self.captured.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.captured.is_some()
    }

    /// Captures the display and routes its video track to the peer.
    pub async fn start(
        &mut self,
        devices: &dyn MediaDevices,
        peer: &mut PeerSession,
    ) -> Result<MediaStream> {
        if self.captured.is_some() {
            return Err(CallError::ScreenShareActive);
        }

        let captured = devices.display_media().await?;
        let Some(screen) = captured.video_tracks().into_iter().next() else {
            captured.stop();
            return Err(CallError::CaptureUnavailable(
                "display capture returned no video track".into(),
            ));
        };

        let current = peer
            .outbound_video()
            .cloned()
            .unwrap_or_else(|| self.camera.clone());
        if let Err(e) = peer
            .replace_outbound_video_track(&current, &screen, &self.camera_stream)
            .await
        {
            captured.stop();
            return Err(e);
        }

        info!(track = screen.id(), "screen share started");
        self.captured = Some(captured.clone());
        self.revert_attempted = false;
        Ok(captured)
    }

    /// Resolves when the platform ends the capture on its own (e.g. the
    /// user pressed the system "stop sharing" control). Stays pending after
    /// a failed automatic revert so only `stop` retries it.
    pub async fn capture_ended(&self) {
        if self.revert_attempted {
            return pending().await;
        }
        let track = self
            .captured
            .as_ref()
            .and_then(|s| s.video_tracks().into_iter().next());
        match track {
            Some(track) => track.ended().await,
            None => pending().await,
        }
    }

    /// Stops the capture and routes the camera again.
    pub async fn stop(&mut self, peer: &mut PeerSession) -> Result<()> {
        let Some(captured) = self.captured.as_ref() else {
            return Err(CallError::NotSharing);
        };
        let screen = peer
            .outbound_video()
            .cloned()
            .or_else(|| captured.video_tracks().into_iter().next())
            .ok_or(CallError::NotSharing)?;

        peer.replace_outbound_video_track(&screen, &self.camera, &self.camera_stream)
            .await?;
        if let Some(captured) = self.captured.take() {
            captured.stop();
        }
        info!("screen share stopped");
        Ok(())
    }

    /// Reverts after the capture ended by itself. On failure the share stays
    /// active and `stop` can retry.
    pub async fn revert(&mut self, peer: &mut PeerSession) -> Result<()> {
        let Some(captured) = self.captured.as_ref() else {
            return Ok(());
        };
        self.revert_attempted = true;
        captured.stop();

        let screen = peer
            .outbound_video()
            .cloned()
            .or_else(|| captured.video_tracks().into_iter().next());
        if let Some(screen) = screen {
            info!("capture ended, reverting to camera");
            peer.replace_outbound_video_track(&screen, &self.camera, &self.camera_stream)
                .await?;
        }
        self.captured = None;
        Ok(())
    }

    /// Stops any capture without touching the peer channel (teardown path)
    pub fn release(&mut self) {
        if let Some(captured) = self.captured.take() {
            warn!("releasing active screen capture");
            captured.stop();
        }
    }
}
