//! Peer sessions: per-participant negotiation state and the owning registry.

pub mod registry;
pub mod session;

use crate::media::TrackKind;
use std::sync::Arc;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::track::track_remote::TrackRemote;

pub use registry::SessionRegistry;
pub use session::PeerSession;

/// Which side of the handshake this session plays. The broadcaster is
/// always the initiator; viewers only ever receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Initiator,
    Receiver,
}

/// Explicit negotiation state of one peer session.
///
/// Initiator path: `New → HaveLocalOffer → Connected`.
/// Receiver path: `New → HaveRemoteOffer → HaveLocalAnswer → Connected`.
/// Any state can fall to `Failed` or `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    New,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalAnswer,
    Connected,
    Failed,
    Closed,
}

/// Events emitted by peer-session callbacks.
///
/// Callbacks fired by the WebRTC runtime only enqueue these; every state
/// mutation happens on the router loop, so transitions cannot race.
#[derive(Debug)]
pub enum PeerEvent {
    /// A local network candidate was gathered and should be signaled to
    /// the remote participant
    LocalCandidate {
        participant_id: String,
        candidate: RTCIceCandidateInit,
    },
    /// A remote track started arriving on this session
    TrackAdded {
        participant_id: String,
        track_id: String,
        kind: TrackKind,
        track: Arc<TrackRemote>,
    },
    /// The underlying connection changed state
    StateChanged {
        participant_id: String,
        state: RTCPeerConnectionState,
    },
}
