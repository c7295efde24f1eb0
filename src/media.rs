//! Local and remote media handles.
//!
//! Capture itself belongs to the platform: a [`MediaDevices`] implementation
//! hands out [`MediaStream`]s and the session only routes, enables and stops
//! the tracks inside them.

use crate::utils::random_id;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackKind {
    Audio,
    Video,
}

struct TrackInner {
    id: String,
    kind: TrackKind,
    label: String,
    enabled: AtomicBool,
    ended: watch::Sender<bool>,
}

/// Live handle to one audio or video track.
///
/// Clones share the same underlying track; use [`MediaTrack::same_track`] to
/// compare identity.
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        Self::with_id(random_id(), kind, label)
    }

    pub fn with_id(id: impl Into<String>, kind: TrackKind, label: impl Into<String>) -> Self {
        let (ended, _) = watch::channel(false);
        Self {
            inner: Arc::new(TrackInner {
                id: id.into(),
                kind,
                label: label.into(),
                enabled: AtomicBool::new(true),
                ended,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Ends the track. Anyone awaiting [`MediaTrack::ended`] is woken.
    pub fn stop(&self) {
        self.inner.ended.send_replace(true);
    }

    pub fn is_ended(&self) -> bool {
        *self.inner.ended.borrow()
    }

    /// Resolves once the track has ended, immediately if it already has.
    pub async fn ended(&self) {
        let mut rx = self.inner.ended.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn same_track(&self, other: &MediaTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("label", &self.inner.label)
            .field("enabled", &self.is_enabled())
            .field("ended", &self.is_ended())
            .finish()
    }
}

struct StreamInner {
    id: String,
    tracks: Mutex<Vec<MediaTrack>>,
}

/// Group of tracks from one source. Remote streams grow as tracks arrive.
#[derive(Clone)]
pub struct MediaStream {
    inner: Arc<StreamInner>,
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self::with_id(random_id(), tracks)
    }

    pub fn with_id(id: impl Into<String>, tracks: Vec<MediaTrack>) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                id: id.into(),
                tracks: Mutex::new(tracks),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    fn lock_tracks(&self) -> MutexGuard<'_, Vec<MediaTrack>> {
        self.inner
            .tracks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn tracks(&self) -> Vec<MediaTrack> {
        self.lock_tracks().clone()
    }

    pub fn audio_tracks(&self) -> Vec<MediaTrack> {
        self.tracks_of(TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> Vec<MediaTrack> {
        self.tracks_of(TrackKind::Video)
    }

    fn tracks_of(&self, kind: TrackKind) -> Vec<MediaTrack> {
        self.lock_tracks()
            .iter()
            .filter(|t| t.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn add_track(&self, track: MediaTrack) {
        let mut tracks = self.lock_tracks();
        if !tracks.iter().any(|t| t.same_track(&track)) {
            tracks.push(track);
        }
    }

    /// Stops every track in the stream
    pub fn stop(&self) {
        for track in self.lock_tracks().iter() {
            track.stop();
        }
    }

    pub fn same_stream(&self, other: &MediaStream) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.inner.id)
            .field("tracks", &*self.lock_tracks())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Platform capture primitives.
///
/// `user_media` fails with `MediaAccessDenied`; `display_media` fails with
/// `UserCancelledCapture` or `CaptureUnavailable`.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn user_media(&self, constraints: MediaConstraints) -> Result<MediaStream>;

    async fn display_media(&self) -> Result<MediaStream>;
}

/// Where the counterpart's media gets rendered. Provided by the presentation layer.
pub trait RemoteStreamSink: Send + Sync {
    fn attach(&self, stream: MediaStream);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn clones_share_identity_and_state() {
        let track = MediaTrack::new(TrackKind::Audio, "mic");
        let clone = track.clone();
        let twin = MediaTrack::with_id(track.id().to_string(), TrackKind::Audio, "mic");

        assert!(track.same_track(&clone));
        assert!(!track.same_track(&twin));

        clone.set_enabled(false);
        assert!(!track.is_enabled());
    }

    #[tokio::test]
    async fn ended_resolves_after_stop() {
        let track = MediaTrack::new(TrackKind::Video, "screen");
        let waiter = {
            let track = track.clone();
            tokio::spawn(async move { track.ended().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        track.stop();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("ended() should resolve")
            .unwrap();
        assert!(track.is_ended());

        // already ended: resolves immediately
        tokio::time::timeout(Duration::from_millis(50), track.ended())
            .await
            .unwrap();
    }

    #[test]
    fn stream_filters_and_stops_tracks() {
        let mic = MediaTrack::new(TrackKind::Audio, "mic");
        let cam = MediaTrack::new(TrackKind::Video, "cam");
        let stream = MediaStream::new(vec![mic.clone(), cam.clone()]);

        assert!(stream.audio_tracks()[0].same_track(&mic));
        assert!(stream.video_tracks()[0].same_track(&cam));

        stream.add_track(cam.clone());
        assert_eq!(stream.tracks().len(), 2);

        stream.stop();
        assert!(mic.is_ended() && cam.is_ended());
    }
}
