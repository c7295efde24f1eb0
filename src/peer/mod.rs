pub mod codec;
pub mod connection;
pub mod data_channel;
pub mod ice;
pub mod session;
pub mod types;

use crate::media::{MediaStream, MediaTrack};
use crate::session::Role;
use crate::signaling::SignalPayload;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

pub use connection::{RtcConnector, RtcPeer};
pub use session::PeerSession;
pub use types::{SdpPayload, ServerConfig};

/// Everything the peer-channel primitive can report, in arrival order
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// Local setup data for the counterpart. Initiators emit it right away,
    /// joiners only after the initiator's payload was accepted.
    LocalSignal(SignalPayload),
    /// The data path is usable
    Connected,
    /// One inbound application message
    Data(Bytes),
    /// Counterpart media became available
    RemoteStream(MediaStream),
    /// Channel closed by the counterpart or the transport
    Closed,
    Failed(String),
}

pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;
pub type PeerEventReceiver = mpsc::UnboundedReceiver<PeerEvent>;

/// An established (or establishing) peer channel.
#[async_trait]
pub trait PeerChannel: Send {
    /// Feeds in the counterpart's setup data
    async fn accept_remote_signal(&mut self, payload: SignalPayload) -> Result<()>;

    async fn send(&mut self, data: Bytes) -> Result<()>;

    /// Swaps the routed video track in place, without renegotiation
    async fn replace_outbound_video_track(
        &mut self,
        old: &MediaTrack,
        new: &MediaTrack,
        stream: &MediaStream,
    ) -> Result<()>;

    /// Releases every underlying resource. Not idempotent.
    async fn destroy(&mut self) -> Result<()>;
}

/// Builds peer channels for a role and a local stream.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(
        &self,
        role: Role,
        local: &MediaStream,
        events: PeerEventSender,
    ) -> Result<Box<dyn PeerChannel>>;
}
