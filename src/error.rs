//! Error types for the call session core

/// Result type alias using the call error
pub type Result<T> = std::result::Result<T, CallError>;

/// Errors that can occur while running a call session
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// Camera/microphone access was refused or failed
    #[error("Media access denied: {0}")]
    MediaAccessDenied(String),

    /// The counterpart has not published its setup payload yet.
    ///
    /// The call controller never returns this: a missing payload leaves the
    /// session in `AwaitingSignal`. It is for callers doing their own lookups.
    #[error("Signal not yet available")]
    SignalNotYetAvailable,

    /// A chat message was sent before the data path was usable
    #[error("Cannot send before the peer channel is connected")]
    SendBeforeConnected,

    /// The user dismissed the display-capture prompt
    #[error("Screen capture cancelled by user")]
    UserCancelledCapture,

    /// Display capture is not possible on this platform
    #[error("Screen capture unavailable: {0}")]
    CaptureUnavailable(String),

    /// The peer-channel primitive reported an error
    #[error("Peer channel failure: {0}")]
    PeerChannelFailure(String),

    /// Signaling transport error
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// The counterpart's setup payload was already fed in
    #[error("Remote signal already accepted")]
    SignalAlreadyAccepted,

    /// A screen share is already running
    #[error("Screen share already active")]
    ScreenShareActive,

    /// There is no screen share to stop
    #[error("No active screen share")]
    NotSharing,

    /// Local media has not been acquired yet
    #[error("Local media not ready")]
    MediaNotReady,

    /// The peer channel was already torn down
    #[error("Peer channel destroyed")]
    PeerDestroyed,

    /// The session has ended and accepts no further commands
    #[error("Call session closed")]
    SessionClosed,

    /// Setup payload could not be decoded
    #[error("Invalid signal payload: {0}")]
    InvalidPayload(String),

    /// Call link could not be parsed
    #[error("Invalid call link: {0}")]
    InvalidLink(String),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
