//! Call session data model and the controller that drives it.

pub mod controller;
pub mod handle;

use crate::alert::AlertState;
use crate::messages::Message;
use crate::{CallError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub use controller::{start_call, CallController, CallEnvironment};
pub use handle::CallHandle;

/// Call identifier shared through the link; also the signaling correlation key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() || id.contains('/') || id.chars().any(char::is_whitespace) {
            return Err(CallError::InvalidLink(format!("bad call id '{}'", id)));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Creates the first setup payload and publishes it
    Initiator,
    /// Looks up the initiator's payload before it can answer
    Joiner,
}

impl Role {
    pub fn is_initiator(self) -> bool {
        matches!(self, Role::Initiator)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DisconnectReason {
    /// Local user hung up
    Hangup,
    /// Counterpart closed the channel
    RemoteHangup,
    MediaAccessDenied(String),
    SignalingFailure(String),
    PeerFailure(String),
}

/// Lifecycle of a call, the single source of truth for UI gating.
///
/// `Idle → AcquiringMedia → [AwaitingSignal] → Negotiating → Connected`, and
/// any state may end in `Disconnected`, which is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    AcquiringMedia,
    AwaitingSignal,
    Negotiating,
    Connected,
    Disconnected(DisconnectReason),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Disconnected(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoSource {
    Camera,
    Display,
}

/// Mutable facts about the call; only the controller writes these.
#[derive(Debug, Clone)]
pub struct CallSession {
    pub call_id: CallId,
    pub role: Role,
    pub state: SessionState,
    pub outbound_video: VideoSource,
    pub audio_enabled: bool,
    pub chat_open: bool,
    pub remote_stream_attached: bool,
}

impl CallSession {
    pub fn new(call_id: CallId, role: Role) -> Self {
        Self {
            call_id,
            role,
            state: SessionState::Idle,
            outbound_video: VideoSource::Camera,
            audio_enabled: true,
            chat_open: false,
            remote_stream_attached: false,
        }
    }
}

/// What the presentation layer renders from
#[derive(Debug, Clone, Serialize)]
pub struct CallSnapshot {
    pub call_id: CallId,
    pub role: Role,
    pub state: SessionState,
    pub outbound_video: VideoSource,
    pub audio_enabled: bool,
    pub chat_open: bool,
    pub remote_stream_attached: bool,
    pub messages: Arc<Vec<Message>>,
    pub alert: AlertState,
}

impl CallSnapshot {
    pub fn is_presenting(&self) -> bool {
        self.outbound_video == VideoSource::Display
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_ids_reject_path_fragments() {
        assert!(CallId::new("a1b2c3").is_ok());
        assert!(CallId::new("").is_err());
        assert!(CallId::new("a/b").is_err());
        assert!(CallId::new("a b").is_err());
    }

    #[test]
    fn only_disconnected_is_terminal() {
        assert!(!SessionState::Connected.is_terminal());
        assert!(SessionState::Disconnected(DisconnectReason::Hangup).is_terminal());
    }
}
