//! Signaling: wire protocol and relay transport.

pub mod protocol;
pub mod transport;

pub use protocol::{Participant, SignalingMessage};
pub use transport::{ConnectionState, SignalingHandle, SignalingTransport, TransportEvent};
