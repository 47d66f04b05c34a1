//! # Lectern Broadcast
//!
//! Real-time signaling and peer-session lifecycle core for Lectern's
//! one-to-many live lecture broadcast: one broadcaster delivers a capture
//! stream to a dynamically changing set of viewers, with chat, presence, and
//! subtitles riding the same relay connection.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      EventRouter                            │
//! │   one loop task; every transition serialized                │
//! ├────────────────────────────────────────────────────────────┤
//! │                                                            │
//! │  SignalingTransport ──▸ TransportEvent ─┐                   │
//! │   (relay WebSocket,                     │                   │
//! │    fixed-delay reconnect)               ├──▸ dispatch ──▸   │
//! │                                         │     SessionRegistry
//! │  PeerSession callbacks ──▸ PeerEvent ───┤       │          │
//! │   (candidates, tracks,                  │       ▼          │
//! │    connection state)                    │   PeerSession    │
//! │                                         │   (offer/answer, │
//! │  CaptureSession watcher ─▸ CaptureEvent─┘    candidate     │
//! │                                               buffering)   │
//! │                                                            │
//! │  remote tracks ──▸ StreamAggregator (one stream/participant)│
//! │  chat/subtitle/presence ──▸ RoomEvent bridge ──▸ host UI    │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! The broadcaster is always the handshake initiator; viewers answer.
//! Candidates arriving before the remote description buffer in order and
//! apply exactly once after it lands. A transport reconnect invalidates
//! every session and renegotiates from the next roster.
//!
//! Device capture and rendering stay outside this crate: hosts inject a
//! [`media::CaptureSource`] and read aggregate streams plus [`RoomEvent`]s
//! back out.

pub mod config;
pub mod error;
pub mod identity;
pub mod media;
pub mod peer;
pub mod router;
pub mod signaling;

pub use config::{BroadcastConfig, IceServerConfig};
pub use error::{Error, Result};
pub use identity::{LocalIdentity, Role};
pub use media::{CaptureSource, CaptureStream, StreamAggregator, TrackKind};
pub use peer::{NegotiationState, PeerSession, SessionRegistry, SessionRole};
pub use router::{EventRouter, RoomEvent};
pub use signaling::{ConnectionState, Participant, SignalingHandle, SignalingMessage};
