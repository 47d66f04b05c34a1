//! Signaling wire protocol.
//!
//! JSON messages discriminated by `type`, matching the relay contract. The
//! relay forwards directed messages (`offer`, `answer`, `ice-candidate`,
//! `request_connection`) to their target and stamps the sender id on the way
//! through, so the `from*` fields are absent on outbound messages and present
//! on delivery. Session descriptions and ICE candidates use the
//! browser-standard JSON shapes via the `webrtc` serde types.
//!
//! Only the media-signaling messages are interpreted by this crate; chat,
//! subtitle, and presence messages pass through to the UI boundary opaquely.

use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// One roster entry in a `participants_update`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Opaque participant id
    pub id: String,
    /// Display name, if the relay knows one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Participant {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

/// Signaling message, tagged by `type` on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SignalingMessage {
    /// Broadcaster announces an active share; the relay stamps the
    /// broadcaster id when fanning out
    #[serde(rename = "screen_share_started")]
    ScreenShareStarted {
        #[serde(
            rename = "broadcasterId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        broadcaster_id: Option<String>,
        #[serde(rename = "lectureId")]
        lecture_id: String,
    },

    /// Broadcaster stopped sharing; every receiver tears down its sessions
    #[serde(rename = "screen_share_stopped")]
    ScreenShareStopped {
        #[serde(
            rename = "broadcasterId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        broadcaster_id: Option<String>,
        #[serde(rename = "lectureId")]
        lecture_id: String,
    },

    /// Viewer asks the broadcaster for a media session
    #[serde(rename = "request_connection")]
    RequestConnection {
        #[serde(
            rename = "targetBroadcasterId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        target_broadcaster_id: Option<String>,
        #[serde(
            rename = "fromViewerId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        from_viewer_id: Option<String>,
        #[serde(rename = "lectureId")]
        lecture_id: String,
    },

    /// Relay-published roster of everyone on this lecture's channel
    #[serde(rename = "participants_update")]
    ParticipantsUpdate {
        participants: Vec<Participant>,
        /// Advisory only: self-exclusion uses the injected local identity,
        /// never this field
        #[serde(
            rename = "currentUserId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        current_user_id: Option<String>,
    },

    /// Session offer, broadcaster → viewer
    #[serde(rename = "offer")]
    Offer {
        offer: RTCSessionDescription,
        #[serde(rename = "targetPeerId")]
        target_peer_id: String,
        #[serde(
            rename = "fromPeerId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        from_peer_id: Option<String>,
        #[serde(rename = "lectureId")]
        lecture_id: String,
    },

    /// Session answer, viewer → broadcaster
    #[serde(rename = "answer")]
    Answer {
        answer: RTCSessionDescription,
        #[serde(rename = "targetPeerId")]
        target_peer_id: String,
        #[serde(
            rename = "fromPeerId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        from_peer_id: Option<String>,
        #[serde(rename = "lectureId")]
        lecture_id: String,
    },

    /// Network candidate, either direction
    #[serde(rename = "ice-candidate")]
    IceCandidate {
        candidate: RTCIceCandidateInit,
        #[serde(rename = "targetPeerId")]
        target_peer_id: String,
        #[serde(
            rename = "fromPeerId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        from_peer_id: Option<String>,
        #[serde(rename = "lectureId")]
        lecture_id: String,
    },

    /// Chat, opaque to this core
    #[serde(rename = "chat_message")]
    Chat {
        message: String,
        #[serde(default)]
        is_private: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(rename = "user_id", default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },

    /// Live subtitle, opaque to this core
    #[serde(rename = "subtitle")]
    Subtitle {
        text: String,
        #[serde(
            rename = "translatedText",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        translated_text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<f32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },

    /// Legacy boolean share-status broadcast, kept for the UI roster header
    #[serde(rename = "screen_share")]
    ShareStatus {
        #[serde(rename = "is_sharing")]
        is_sharing: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },

    /// Presence join notice, opaque to this core
    #[serde(rename = "user_joined")]
    UserJoined {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },

    /// Presence leave notice, opaque to this core
    #[serde(rename = "user_left")]
    UserLeft {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
}

impl SignalingMessage {
    /// Message type tag, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ScreenShareStarted { .. } => "screen_share_started",
            Self::ScreenShareStopped { .. } => "screen_share_stopped",
            Self::RequestConnection { .. } => "request_connection",
            Self::ParticipantsUpdate { .. } => "participants_update",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::Chat { .. } => "chat_message",
            Self::Subtitle { .. } => "subtitle",
            Self::ShareStatus { .. } => "screen_share",
            Self::UserJoined { .. } => "user_joined",
            Self::UserLeft { .. } => "user_left",
        }
    }
}
