//! One peer session: a wrapped peer connection plus explicit negotiation
//! state and a pending-candidate buffer.
//!
//! Candidates that arrive before the remote description is set are buffered
//! in arrival order and applied exactly once, immediately after the remote
//! description lands. The buffer and the state cell use sync locks; no
//! `.await` is held across either guard.

use crate::config::BroadcastConfig;
use crate::error::{Error, Result};
use crate::media::TrackKind;
use crate::peer::{NegotiationState, PeerEvent, SessionRole};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// State and connection for one negotiated relationship with a single
/// remote participant. Owned exclusively by the registry.
pub struct PeerSession {
    participant_id: String,
    role: SessionRole,
    pc: Arc<RTCPeerConnection>,
    state: Mutex<NegotiationState>,
    pending_candidates: Mutex<Vec<RTCIceCandidateInit>>,
    attached_track_ids: Vec<String>,
}

impl PeerSession {
    /// Build the connection, attach outbound tracks, and wire callbacks.
    ///
    /// Local tracks must be attached before the offer exists so their media
    /// sections land in the negotiation.
    pub(crate) async fn connect(
        participant_id: &str,
        role: SessionRole,
        config: &BroadcastConfig,
        local_tracks: &[Arc<TrackLocalStaticSample>],
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<Self>> {
        let api = build_api()?;
        let pc = Arc::new(api.new_peer_connection(config.rtc_configuration()).await?);

        let mut attached_track_ids = Vec::with_capacity(local_tracks.len());
        for track in local_tracks {
            pc.add_track(Arc::clone(track) as Arc<dyn TrackLocal + Send + Sync>)
                .await?;
            attached_track_ids.push(track.id().to_string());
        }

        let session = Arc::new(Self {
            participant_id: participant_id.to_string(),
            role,
            pc,
            state: Mutex::new(NegotiationState::New),
            pending_candidates: Mutex::new(Vec::new()),
            attached_track_ids,
        });
        session.register_callbacks(events);
        Ok(session)
    }

    /// Callbacks capture only the participant id and the event sender, so a
    /// destroyed session is not kept alive by its own connection.
    fn register_callbacks(&self, events: mpsc::UnboundedSender<PeerEvent>) {
        let participant_id = self.participant_id.clone();
        let candidate_events = events.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let participant_id = participant_id.clone();
                let events = candidate_events.clone();
                Box::pin(async move {
                    let Some(candidate) = candidate else {
                        trace!(participant_id = %participant_id, "local candidate gathering complete");
                        return;
                    };
                    match candidate.to_json() {
                        Ok(init) => {
                            let _ = events.send(PeerEvent::LocalCandidate {
                                participant_id,
                                candidate: init,
                            });
                        }
                        Err(error) => {
                            warn!(participant_id = %participant_id, error = %error, "failed to encode local candidate");
                        }
                    }
                })
            }));

        let participant_id = self.participant_id.clone();
        let track_events = events.clone();
        self.pc
            .on_track(Box::new(move |track, _receiver, _transceiver| {
                let participant_id = participant_id.clone();
                let events = track_events.clone();
                Box::pin(async move {
                    let kind = match track.kind() {
                        RTPCodecType::Audio => TrackKind::Audio,
                        RTPCodecType::Video => TrackKind::Video,
                        other => {
                            warn!(participant_id = %participant_id, kind = ?other, "ignoring track of unknown kind");
                            return;
                        }
                    };
                    let _ = events.send(PeerEvent::TrackAdded {
                        participant_id,
                        track_id: track.id(),
                        kind,
                        track,
                    });
                })
            }));

        let participant_id = self.participant_id.clone();
        self.pc.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                let _ = events.send(PeerEvent::StateChanged {
                    participant_id: participant_id.clone(),
                    state,
                });
                Box::pin(async {})
            },
        ));
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        *self.state.lock()
    }

    /// Ids of the local tracks attached at creation
    pub fn attached_track_ids(&self) -> &[String] {
        &self.attached_track_ids
    }

    pub(crate) fn can_accept_offer(&self) -> bool {
        self.state() == NegotiationState::New
    }

    fn set_state(&self, next: NegotiationState) {
        let mut state = self.state.lock();
        debug!(
            participant_id = %self.participant_id,
            from = ?*state,
            to = ?next,
            "negotiation transition"
        );
        *state = next;
    }

    fn expect_state(&self, expected: NegotiationState, op: &'static str) -> Result<()> {
        let current = self.state();
        if current != expected {
            return Err(Error::InvalidTransition { op, from: current });
        }
        Ok(())
    }

    fn negotiation_error(&self, stage: &str, error: webrtc::Error) -> Error {
        Error::Negotiation {
            participant_id: self.participant_id.clone(),
            reason: format!("{stage}: {error}"),
        }
    }

    /// Produce the local offer (initiator only). Requires tracks attached at
    /// creation; an initiator session cannot exist without them.
    pub async fn create_offer(&self) -> Result<RTCSessionDescription> {
        self.expect_state(NegotiationState::New, "create offer")?;
        if self.attached_track_ids.is_empty() {
            return Err(Error::NoLocalMedia);
        }

        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| self.negotiation_error("create offer", e))?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| self.negotiation_error("set local offer", e))?;

        self.set_state(NegotiationState::HaveLocalOffer);
        Ok(offer)
    }

    /// Apply a remote offer and produce the local answer (receiver side)
    pub async fn accept_offer(&self, offer: RTCSessionDescription) -> Result<RTCSessionDescription> {
        self.expect_state(NegotiationState::New, "accept offer")?;

        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| self.negotiation_error("set remote offer", e))?;
        self.set_state(NegotiationState::HaveRemoteOffer);
        self.apply_pending_candidates().await;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| self.negotiation_error("create answer", e))?;
        self.set_state(NegotiationState::HaveLocalAnswer);
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| self.negotiation_error("set local answer", e))?;

        self.set_state(NegotiationState::Connected);
        Ok(answer)
    }

    /// Apply the remote answer to a sent offer. Valid only from
    /// `HaveLocalOffer`: no session reaches `Connected` via an answer
    /// without a prior local offer.
    pub async fn apply_answer(&self, answer: RTCSessionDescription) -> Result<()> {
        self.expect_state(NegotiationState::HaveLocalOffer, "apply answer")?;

        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| self.negotiation_error("set remote answer", e))?;
        self.apply_pending_candidates().await;

        self.set_state(NegotiationState::Connected);
        Ok(())
    }

    /// Apply a remote candidate immediately when the remote description is
    /// set, otherwise buffer it for the drain that follows the description.
    pub async fn add_remote_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        if matches!(
            self.state(),
            NegotiationState::Failed | NegotiationState::Closed
        ) {
            debug!(
                participant_id = %self.participant_id,
                "dropping candidate for torn-down session"
            );
            return Ok(());
        }

        if self.pc.remote_description().await.is_some() {
            self.pc
                .add_ice_candidate(candidate)
                .await
                .map_err(|e| self.negotiation_error("add candidate", e))?;
        } else {
            debug!(
                participant_id = %self.participant_id,
                "remote description not set, queueing candidate"
            );
            self.pending_candidates.lock().push(candidate);
        }
        Ok(())
    }

    /// Drain the buffer in arrival order. Individual failures are logged and
    /// skipped; the rest of the buffer still applies.
    async fn apply_pending_candidates(&self) {
        let pending = std::mem::take(&mut *self.pending_candidates.lock());
        if pending.is_empty() {
            return;
        }
        debug!(
            participant_id = %self.participant_id,
            count = pending.len(),
            "applying buffered candidates"
        );
        for candidate in pending {
            if let Err(error) = self.pc.add_ice_candidate(candidate).await {
                warn!(
                    participant_id = %self.participant_id,
                    error = %error,
                    "failed to apply buffered candidate"
                );
            }
        }
    }

    /// Number of candidates waiting for the remote description
    pub fn pending_candidate_count(&self) -> usize {
        self.pending_candidates.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn pending_candidate_strings(&self) -> Vec<String> {
        self.pending_candidates
            .lock()
            .iter()
            .map(|c| c.candidate.clone())
            .collect()
    }

    /// Tear down this session's connection
    pub(crate) async fn close(&self) {
        self.set_state(NegotiationState::Closed);
        if let Err(error) = self.pc.close().await {
            debug!(
                participant_id = %self.participant_id,
                error = %error,
                "error closing peer connection"
            );
        }
    }
}

fn build_api() -> Result<API> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;
    let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}
