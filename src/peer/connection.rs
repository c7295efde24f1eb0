//! WebRTC-backed peer channel.
//!
//! One `RTCPeerConnection` per call carrying the local audio/video tracks and
//! a "chat" data channel. Setup payloads are non-trickle: the local
//! description is only emitted once ICE gathering completes (or times out), so
//! a single payload per side is enough.

use crate::config::CallConfig;
use crate::logger::dump_selected_pair;
use crate::media::{MediaStream, MediaTrack, TrackKind};
use crate::peer::codec;
use crate::peer::data_channel::{attach_dc, DataChannelSlot};
use crate::peer::ice::{analyze_candidates, rtc_config};
use crate::peer::types::{SdpPayload, ServerConfig};
use crate::peer::{PeerChannel, PeerConnector, PeerEvent, PeerEventSender};
use crate::session::Role;
use crate::signaling::SignalPayload;
use crate::utils::random_id;
use crate::{CallError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

const CHAT_CHANNEL: &str = "chat";

fn rtc_err(context: &str) -> impl Fn(webrtc::Error) -> CallError + '_ {
    move |e| CallError::PeerChannelFailure(format!("{}: {}", context, e))
}

type SampleWriters = Arc<StdMutex<HashMap<String, Arc<TrackLocalStaticSample>>>>;

fn lock_writers(
    writers: &SampleWriters,
) -> MutexGuard<'_, HashMap<String, Arc<TrackLocalStaticSample>>> {
    writers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Builds [`RtcPeer`]s from the call configuration.
///
/// Capture pipelines feed encoded samples through [`RtcConnector::sample_writer`],
/// keyed by the id of the [`MediaTrack`] they capture.
pub struct RtcConnector {
    ice_servers: Vec<ServerConfig>,
    gather_timeout: Duration,
    writers: SampleWriters,
}

impl RtcConnector {
    pub fn new(config: &CallConfig) -> Self {
        Self {
            ice_servers: config.ice_servers.clone(),
            gather_timeout: config.gather_timeout(),
            writers: Arc::default(),
        }
    }

    /// Sample sink of the RTP track currently bound to a local media track
    pub fn sample_writer(&self, track_id: &str) -> Option<Arc<TrackLocalStaticSample>> {
        lock_writers(&self.writers).get(track_id).cloned()
    }
}

#[async_trait]
impl PeerConnector for RtcConnector {
    async fn connect(
        &self,
        role: Role,
        local: &MediaStream,
        events: PeerEventSender,
    ) -> Result<Box<dyn PeerChannel>> {
        let peer = RtcPeer::open(
            role,
            local,
            &self.ice_servers,
            self.gather_timeout,
            Arc::clone(&self.writers),
            events,
        )
        .await?;
        Ok(Box::new(peer))
    }
}

pub struct RtcPeer {
    role: Role,
    pc: Arc<RTCPeerConnection>,
    dc: DataChannelSlot,
    /// RTP senders keyed by the id of the media track they currently carry
    senders: HashMap<String, Arc<RTCRtpSender>>,
    writers: SampleWriters,
    /// Ids of the writers this peer registered in the shared map
    owned_writers: HashSet<String>,
    /// Ids of the tracks captured at call start (the camera stays registered)
    local_tracks: HashSet<String>,
    events: PeerEventSender,
    gather_timeout: Duration,
}

impl RtcPeer {
    async fn open(
        role: Role,
        local: &MediaStream,
        ice_servers: &[ServerConfig],
        gather_timeout: Duration,
        writers: SampleWriters,
        events: PeerEventSender,
    ) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(rtc_err("register codecs"))?;
        let registry = register_default_interceptors(Default::default(), &mut media_engine)
            .map_err(rtc_err("register interceptors"))?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(
            api.new_peer_connection(rtc_config(ice_servers))
                .await
                .map_err(rtc_err("create peer connection"))?,
        );

        let mut peer = Self {
            role,
            pc,
            dc: Arc::default(),
            senders: HashMap::new(),
            writers,
            owned_writers: HashSet::new(),
            local_tracks: local.tracks().iter().map(|t| t.id().to_owned()).collect(),
            events,
            gather_timeout,
        };

        for track in local.tracks() {
            peer.add_local_track(&track, local).await?;
        }
        peer.watch_connection_state();
        peer.watch_remote_tracks();

        match role {
            Role::Initiator => {
                let dc = peer
                    .pc
                    .create_data_channel(CHAT_CHANNEL, None)
                    .await
                    .map_err(rtc_err("create data channel"))?;
                attach_dc(&dc, &peer.dc, &peer.events).await;

                let offer = peer
                    .pc
                    .create_offer(None)
                    .await
                    .map_err(rtc_err("create offer"))?;
                peer.publish_local_description(offer).await?;
            }
            Role::Joiner => {
                let slot = Arc::clone(&peer.dc);
                let events = peer.events.clone();
                peer.pc
                    .on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                        let slot = Arc::clone(&slot);
                        let events = events.clone();
                        Box::pin(async move {
                            attach_dc(&dc, &slot, &events).await;
                        })
                    }));
            }
        }

        Ok(peer)
    }

    fn rtp_track(&mut self, track: &MediaTrack, stream: &MediaStream) -> Arc<TrackLocalStaticSample> {
        let mut writers = lock_writers(&self.writers);
        if let Some(existing) = writers.get(track.id()) {
            return Arc::clone(existing);
        }

        let mime_type = match track.kind() {
            TrackKind::Audio => MIME_TYPE_OPUS,
            TrackKind::Video => MIME_TYPE_VP8,
        };
        let rtp = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            track.id().to_owned(),
            stream.id().to_owned(),
        ));
        writers.insert(track.id().to_owned(), Arc::clone(&rtp));
        self.owned_writers.insert(track.id().to_owned());
        rtp
    }

    async fn add_local_track(&mut self, track: &MediaTrack, stream: &MediaStream) -> Result<()> {
        let rtp = self.rtp_track(track, stream);
        let sender = self
            .pc
            .add_track(rtp as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(rtc_err("add track"))?;

        // drain RTCP so the interceptors keep running
        let rtcp = Arc::clone(&sender);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtcp.read(&mut buf).await.is_ok() {}
        });

        debug!(track = track.id(), kind = ?track.kind(), "local track added");
        self.senders.insert(track.id().to_owned(), sender);
        Ok(())
    }

    fn watch_connection_state(&self) {
        let events = self.events.clone();
        let pc = Arc::downgrade(&self.pc);
        self.pc
            .on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
                info!("peer connection state changed to {:?}", st);
                let events = events.clone();
                let pc = pc.clone();
                Box::pin(async move {
                    match st {
                        RTCPeerConnectionState::Failed => {
                            if let Some(pc) = pc.upgrade() {
                                dump_selected_pair(&pc, "BEFORE-FAIL").await;
                            }
                            let _ = events.send(PeerEvent::Failed(
                                "ICE connectivity lost".to_string(),
                            ));
                        }
                        RTCPeerConnectionState::Closed => {
                            let _ = events.send(PeerEvent::Closed);
                        }
                        RTCPeerConnectionState::Disconnected => {
                            warn!("peer connection interrupted, waiting for ICE to recover");
                        }
                        _ => {}
                    }
                })
            }));
    }

    fn watch_remote_tracks(&self) {
        let events = self.events.clone();
        let remote: Arc<StdMutex<Option<MediaStream>>> = Arc::default();
        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    _ => TrackKind::Video,
                };
                let media = MediaTrack::with_id(track.id(), kind, "remote");
                info!(track = media.id(), ?kind, "remote track received");

                let first = {
                    let mut remote = remote.lock().unwrap_or_else(|p| p.into_inner());
                    match remote.as_ref() {
                        Some(stream) => {
                            stream.add_track(media.clone());
                            None
                        }
                        None => {
                            let stream =
                                MediaStream::with_id(track.stream_id(), vec![media.clone()]);
                            *remote = Some(stream.clone());
                            Some(stream)
                        }
                    }
                };
                if let Some(stream) = first {
                    let _ = events.send(PeerEvent::RemoteStream(stream));
                }

                Box::pin(async move {
                    // keep reading so the receive buffer never stalls; the
                    // track ends with the transport
                    tokio::spawn(async move {
                        while track.read_rtp().await.is_ok() {}
                        media.stop();
                    });
                })
            },
        ));
    }

    /// Sets the local description and emits it as a setup payload once
    /// gathering is done.
    async fn publish_local_description(&self, desc: RTCSessionDescription) -> Result<()> {
        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(desc)
            .await
            .map_err(rtc_err("set local description"))?;

        let pc = Arc::clone(&self.pc);
        let events = self.events.clone();
        let wait = self.gather_timeout;
        tokio::spawn(async move {
            if timeout(wait, gathered.recv()).await.is_err() {
                warn!("ICE gathering timed out after {:?}, sending partial candidates", wait);
            }
            let Some(local) = pc.local_description().await else {
                let _ = events.send(PeerEvent::Failed("no local description".into()));
                return;
            };
            analyze_candidates(&local.sdp);

            let payload = SdpPayload {
                sdp: local,
                id: random_id(),
                ts: chrono::Utc::now().timestamp(),
            };
            match codec::encode(&payload) {
                Ok(signal) => {
                    let _ = events.send(PeerEvent::LocalSignal(signal));
                }
                Err(e) => {
                    error!("local description could not be encoded: {}", e);
                    let _ = events.send(PeerEvent::Failed(e.to_string()));
                }
            }
        });
        Ok(())
    }
}

#[async_trait]
impl PeerChannel for RtcPeer {
    async fn accept_remote_signal(&mut self, payload: SignalPayload) -> Result<()> {
        let remote = codec::decode(&payload)?;
        debug!(id = %remote.id, ts = remote.ts, "remote description decoded");
        self.pc
            .set_remote_description(remote.sdp)
            .await
            .map_err(rtc_err("set remote description"))?;

        if self.role == Role::Joiner {
            let answer = self
                .pc
                .create_answer(None)
                .await
                .map_err(rtc_err("create answer"))?;
            self.publish_local_description(answer).await?;
        }
        Ok(())
    }

    async fn send(&mut self, data: Bytes) -> Result<()> {
        let dc = self
            .dc
            .lock()
            .await
            .clone()
            .ok_or(CallError::SendBeforeConnected)?;
        dc.send(&data).await.map_err(rtc_err("data channel send"))?;
        Ok(())
    }

    async fn replace_outbound_video_track(
        &mut self,
        old: &MediaTrack,
        new: &MediaTrack,
        stream: &MediaStream,
    ) -> Result<()> {
        let sender = self.senders.remove(old.id()).ok_or_else(|| {
            CallError::PeerChannelFailure(format!("track {} is not being sent", old.id()))
        })?;

        let rtp = self.rtp_track(new, stream);
        if let Err(e) = sender
            .replace_track(Some(rtp as Arc<dyn TrackLocal + Send + Sync>))
            .await
        {
            self.senders.insert(old.id().to_owned(), sender);
            return Err(rtc_err("replace track")(e));
        }
        self.senders.insert(new.id().to_owned(), sender);

        // a display capture that is no longer routed has no use for its writer
        if !self.local_tracks.contains(old.id()) && self.owned_writers.remove(old.id()) {
            lock_writers(&self.writers).remove(old.id());
        }
        Ok(())
    }

    async fn destroy(&mut self) -> Result<()> {
        if let Some(dc) = self.dc.lock().await.take() {
            if let Err(e) = dc.close().await {
                warn!("data channel close: {}", e);
            }
        }
        {
            let mut writers = lock_writers(&self.writers);
            for id in self.owned_writers.drain() {
                writers.remove(&id);
            }
        }
        self.pc.close().await.map_err(rtc_err("close peer connection"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn local_tracks_get_sample_writers_until_destroyed() {
        let mut config = CallConfig::default();
        config.ice_servers.clear();
        let connector = RtcConnector::new(&config);

        let camera = MediaTrack::new(TrackKind::Video, "camera");
        let mic = MediaTrack::new(TrackKind::Audio, "microphone");
        let local = MediaStream::new(vec![mic.clone(), camera.clone()]);
        let (tx, _rx) = mpsc::unbounded_channel();

        let mut peer = connector.connect(Role::Joiner, &local, tx).await.unwrap();
        assert!(connector.sample_writer(camera.id()).is_some());
        assert!(connector.sample_writer(mic.id()).is_some());
        assert!(matches!(
            peer.send(Bytes::from_static(b"hi")).await,
            Err(CallError::SendBeforeConnected)
        ));

        peer.destroy().await.unwrap();
        assert!(connector.sample_writer(camera.id()).is_none());
    }

    #[tokio::test]
    async fn destroying_one_peer_keeps_the_other_peers_writers() {
        let mut config = CallConfig::default();
        config.ice_servers.clear();
        let connector = RtcConnector::new(&config);

        let first_cam = MediaTrack::new(TrackKind::Video, "camera");
        let second_cam = MediaTrack::new(TrackKind::Video, "camera");
        let (tx, _rx) = mpsc::unbounded_channel();

        let mut first = connector
            .connect(Role::Joiner, &MediaStream::new(vec![first_cam.clone()]), tx.clone())
            .await
            .unwrap();
        let mut second = connector
            .connect(Role::Joiner, &MediaStream::new(vec![second_cam.clone()]), tx)
            .await
            .unwrap();

        first.destroy().await.unwrap();
        assert!(connector.sample_writer(first_cam.id()).is_none());
        assert!(connector.sample_writer(second_cam.id()).is_some());

        second.destroy().await.unwrap();
        assert!(connector.sample_writer(second_cam.id()).is_none());
    }
}
