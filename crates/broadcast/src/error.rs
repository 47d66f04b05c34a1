//! Error types for the broadcast core.
//!
//! Failures are contained at the smallest scope that can absorb them: a
//! negotiation failure tears down one peer session, a capture failure leaves
//! capture inactive, and transport failures feed the reconnect loop. Nothing
//! in this crate is expected to escape the event loop as an unhandled fault.

use crate::peer::NegotiationState;
use thiserror::Error;

/// Result type alias for broadcast operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the broadcast core
#[derive(Debug, Error)]
pub enum Error {
    /// Signaling transport failure (connect, read, or write)
    #[error("signaling transport error: {0}")]
    Signaling(String),

    /// A send was attempted while the signaling channel is not open
    #[error("signaling channel is not open")]
    SignalingClosed,

    /// An outbound offer was requested without an active capture session
    #[error("no active capture session, cannot negotiate outbound media")]
    NoLocalMedia,

    /// `start()` was called while a capture session is already active
    #[error("a capture session is already active")]
    CaptureActive,

    /// Capture acquisition failed (denied, cancelled, device error)
    #[error("capture failed: {0}")]
    Capture(String),

    /// Session negotiation failed; only the named session is torn down
    #[error("negotiation with {participant_id} failed: {reason}")]
    Negotiation {
        participant_id: String,
        reason: String,
    },

    /// An operation was attempted in a negotiation state that does not allow it
    #[error("cannot {op} from negotiation state {from:?}")]
    InvalidTransition {
        op: &'static str,
        from: NegotiationState,
    },

    /// A directed signaling message referenced a participant with no session
    #[error("no peer session for participant {0}")]
    UnknownSession(String),

    /// An inbound signaling payload could not be interpreted
    #[error("malformed signaling message: {0}")]
    MalformedMessage(String),

    /// A broadcaster-only operation was invoked from a viewer identity
    #[error("operation requires the broadcaster role")]
    NotBroadcaster,

    /// The router event loop was started twice
    #[error("the router event loop is already running")]
    AlreadyRunning,

    /// Error surfaced by the underlying WebRTC stack
    #[error("webrtc: {0}")]
    WebRtc(#[from] webrtc::Error),
}
