//! Broadcast configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;

/// STUN servers used when no ICE servers are configured
pub const DEFAULT_STUN_SERVERS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// One STUN or TURN server entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServerConfig {
    /// Server URLs, e.g. `stun:stun.l.google.com:19302`
    pub urls: Vec<String>,
    /// TURN username (empty for STUN)
    #[serde(default)]
    pub username: String,
    /// TURN credential (empty for STUN)
    #[serde(default)]
    pub credential: String,
}

impl IceServerConfig {
    /// A STUN entry with no credentials
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: String::new(),
            credential: String::new(),
        }
    }
}

/// Configuration for one signaling connection and its peer sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Signaling endpoint base, e.g. `ws://localhost:8000/ws/lecture`.
    /// The lecture id and identity token are appended at connect time.
    pub signaling_url: String,

    /// ICE servers handed to every peer connection
    pub ice_servers: Vec<IceServerConfig>,

    /// Fixed delay before a reconnect attempt after an abnormal closure.
    /// Retries are unbounded; there is no backoff or jitter (carried over
    /// from the relay protocol as observed, see DESIGN.md).
    pub reconnect_delay_ms: u64,

    /// How long a single connect attempt may take before it is abandoned
    pub connect_timeout_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:8000/ws/lecture".to_string(),
            ice_servers: DEFAULT_STUN_SERVERS
                .into_iter()
                .map(IceServerConfig::stun)
                .collect(),
            reconnect_delay_ms: 3_000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl BroadcastConfig {
    /// Full endpoint for one (lecture, user) connection
    pub fn endpoint(&self, lecture_id: &str, token: &str) -> String {
        format!(
            "{}/{}?token={}",
            self.signaling_url.trim_end_matches('/'),
            lecture_id,
            token
        )
    }

    /// Reconnect delay as a [`Duration`]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Connect timeout as a [`Duration`]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// RTC configuration for a new peer connection
    pub(crate) fn rtc_configuration(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: self
                .ice_servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone(),
                    credential: server.credential.clone(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }
}
