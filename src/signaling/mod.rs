//! Out-of-band exchange of the one-shot connection setup payloads.
//!
//! Two paths are used:
//!
//! - a persisted lookup keyed by call id, so a joiner that opens the link late
//!   still finds the initiator's payload ([`SignalingClient::publish`] /
//!   [`SignalingClient::fetch_published`])
//! - a live channel scoped to the call, for the joiner's reply to the
//!   initiator who is already listening ([`SignalingClient::send_live`] /
//!   [`SignalingClient::subscribe_live`])

pub mod http;
pub mod live;
pub mod memory;
pub mod network;

use crate::session::CallId;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

pub use http::HttpSignalStore;
pub use live::LiveChannel;
pub use memory::{MemorySignaling, MemorySignalingHub};
pub use network::NetworkSignaling;

/// Opaque setup blob produced by the peer-channel primitive.
///
/// Carried verbatim; nothing in signaling looks inside.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalPayload(String);

impl SignalPayload {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SignalPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // payloads are large; the length is what matters in logs
        write!(f, "SignalPayload({} bytes)", self.0.len())
    }
}

pub type LiveReceiver = mpsc::UnboundedReceiver<SignalPayload>;

#[async_trait]
pub trait SignalingClient: Send + Sync {
    /// Stores `payload` under `call_id`. Repeat reads return the same value.
    async fn publish(&self, call_id: &CallId, payload: &SignalPayload) -> Result<()>;

    /// Reads the payload published under `call_id`.
    ///
    /// Transport failures are reported as `None` ("not yet available"), leaving
    /// retry policy to the caller.
    async fn fetch_published(&self, call_id: &CallId) -> Option<SignalPayload>;

    /// Pushes `payload` to the counterpart in the same call room.
    async fn send_live(&self, payload: &SignalPayload) -> Result<()>;

    /// Takes the single receiver of incoming live payloads.
    ///
    /// Payloads that arrive before this call are buffered. A second call fails.
    fn subscribe_live(&self) -> Result<LiveReceiver>;
}
