//! Two-party call sessions: media acquisition, setup-data exchange through a
//! signaling service, a direct peer channel with chat, screen sharing and
//! incoming-message alerts.
//!
//! A call is started with [`start_call`] and driven through the returned
//! [`CallHandle`].

pub mod alert;
pub mod config;
pub mod error;
pub mod link;
pub mod logger;
pub mod media;
pub mod messages;
pub mod peer;
pub mod screen_share;
pub mod session;
pub mod signaling;
pub mod utils;

pub use alert::AlertState;
pub use config::CallConfig;
pub use error::{CallError, Result};
pub use link::CallLink;
pub use media::{MediaDevices, MediaStream, MediaTrack, RemoteStreamSink, TrackKind};
pub use messages::{Author, Message, MessageLog};
pub use peer::{PeerConnector, PeerEvent, RtcConnector};
pub use session::{
    start_call, CallEnvironment, CallHandle, CallId, CallSnapshot, DisconnectReason, Role,
    SessionState, VideoSource,
};
pub use signaling::{NetworkSignaling, SignalPayload, SignalingClient};
