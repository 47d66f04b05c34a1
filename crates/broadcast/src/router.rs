//! Signaling event router.
//!
//! The top-level orchestrator: one loop task consumes transport events,
//! peer-session callbacks, and capture termination, and drives the registry
//! accordingly. Running every transition through a single loop serializes
//! them: a callback firing mid-negotiation can only enqueue, never mutate.
//!
//! Media-signaling messages are interpreted here; chat, subtitle, and
//! presence traffic passes through to the host UI on an optional bounded
//! bridge channel of [`RoomEvent`]s.

use crate::config::BroadcastConfig;
use crate::error::{Error, Result};
use crate::identity::{LocalIdentity, Role};
use crate::media::{
    CaptureEvent, CaptureSession, CaptureSource, StreamAggregator, TrackHandle,
};
use crate::peer::{PeerEvent, SessionRegistry, SessionRole};
use crate::signaling::protocol::{Participant, SignalingMessage};
use crate::signaling::transport::{
    ConnectionState, SignalingHandle, SignalingTransport, TransportEvent,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::track::track_remote::TrackRemote;

/// Events forwarded to the host UI boundary
#[derive(Debug, Clone)]
pub enum RoomEvent {
    /// Signaling connection status, for the connection indicator
    SignalingState(ConnectionState),
    /// The broadcaster started sharing
    ShareStarted { broadcaster_id: String },
    /// The share ended (locally or remotely)
    ShareStopped,
    /// A participant's aggregate stream became available for rendering
    RemoteStreamAdded { participant_id: String },
    /// A participant's aggregate stream went away
    RemoteStreamRemoved { participant_id: String },
    /// Current roster
    Roster(Vec<Participant>),
    /// Chat line, opaque pass-through
    Chat {
        username: Option<String>,
        user_id: Option<String>,
        message: String,
        is_private: bool,
    },
    /// Live subtitle, opaque pass-through
    Subtitle {
        username: Option<String>,
        text: String,
        translated_text: Option<String>,
        language: Option<String>,
        confidence: Option<f32>,
    },
    /// Legacy share-status broadcast
    ShareStatus {
        username: Option<String>,
        is_sharing: bool,
    },
    /// Presence join/leave notice
    Presence {
        username: Option<String>,
        joined: bool,
    },
}

/// Top-level orchestrator for one (lecture, user) connection
pub struct EventRouter {
    identity: LocalIdentity,
    signaling: SignalingHandle,
    sessions: Arc<SessionRegistry>,
    streams: Arc<StreamAggregator<TrackRemote>>,
    capture: Arc<CaptureSession>,
    bridge_tx: Option<mpsc::Sender<RoomEvent>>,
    transport_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    peer_rx: Mutex<Option<mpsc::UnboundedReceiver<PeerEvent>>>,
    capture_rx: Mutex<Option<mpsc::UnboundedReceiver<CaptureEvent>>>,
}

impl EventRouter {
    /// Connect the signaling transport and assemble the core
    pub fn new(config: BroadcastConfig, identity: LocalIdentity) -> Self {
        Self::new_with_events(config, identity, None)
    }

    /// Like [`EventRouter::new`], with a bridge channel for UI events.
    /// Bridge sends are best-effort: a full or closed channel drops the
    /// event rather than stalling the loop.
    pub fn new_with_events(
        config: BroadcastConfig,
        identity: LocalIdentity,
        bridge_tx: Option<mpsc::Sender<RoomEvent>>,
    ) -> Self {
        let config = Arc::new(config);
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let signaling = SignalingTransport::spawn(Arc::clone(&config), &identity, transport_tx);
        Self::assemble(config, identity, signaling, transport_rx, bridge_tx)
    }

    pub(crate) fn assemble(
        config: Arc<BroadcastConfig>,
        identity: LocalIdentity,
        signaling: SignalingHandle,
        transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
        bridge_tx: Option<mpsc::Sender<RoomEvent>>,
    ) -> Self {
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (capture_tx, capture_rx) = mpsc::unbounded_channel();
        let streams = Arc::new(StreamAggregator::new());
        let sessions = Arc::new(SessionRegistry::new(
            config,
            Arc::clone(&streams),
            peer_tx,
        ));
        let capture = Arc::new(CaptureSession::new(capture_tx));

        Self {
            identity,
            signaling,
            sessions,
            streams,
            capture,
            bridge_tx,
            transport_rx: Mutex::new(Some(transport_rx)),
            peer_rx: Mutex::new(Some(peer_rx)),
            capture_rx: Mutex::new(Some(capture_rx)),
        }
    }

    /// Handle to the signaling channel, e.g. for sending chat
    pub fn signaling(&self) -> &SignalingHandle {
        &self.signaling
    }

    /// Live peer sessions
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Aggregate remote streams, read by the rendering boundary
    pub fn streams(&self) -> &StreamAggregator<TrackRemote> {
        &self.streams
    }

    /// Local capture session
    pub fn capture(&self) -> &CaptureSession {
        &self.capture
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    /// Run the event loop until the signaling channel closes normally.
    ///
    /// ```ignore
    /// let router = Arc::new(EventRouter::new(config, identity));
    /// tokio::spawn(Arc::clone(&router).run());
    /// ```
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut transport_rx = self
            .transport_rx
            .lock()
            .take()
            .ok_or(Error::AlreadyRunning)?;
        let mut peer_rx = self.peer_rx.lock().take().ok_or(Error::AlreadyRunning)?;
        let mut capture_rx = self
            .capture_rx
            .lock()
            .take()
            .ok_or(Error::AlreadyRunning)?;

        info!(
            user_id = %self.identity.user_id,
            lecture_id = %self.identity.lecture_id,
            role = ?self.identity.role,
            "event router running"
        );

        loop {
            tokio::select! {
                Some(event) = transport_rx.recv() => {
                    let terminal =
                        matches!(event, TransportEvent::Disconnected { abnormal: false });
                    self.on_transport_event(event).await;
                    if terminal {
                        break;
                    }
                }
                Some(event) = peer_rx.recv() => self.on_peer_event(event).await,
                Some(event) = capture_rx.recv() => self.on_capture_event(event).await,
                else => break,
            }
        }

        info!("event router stopped");
        Ok(())
    }

    /// Start broadcasting: acquire capture and announce the share.
    /// Viewers learn of the share and request connections; offers follow.
    pub async fn start_share(&self, source: &dyn CaptureSource) -> Result<()> {
        if self.identity.role != Role::Broadcaster {
            return Err(Error::NotBroadcaster);
        }
        self.capture.start(source).await?;

        let message = SignalingMessage::ScreenShareStarted {
            broadcaster_id: None,
            lecture_id: self.identity.lecture_id.clone(),
        };
        if let Err(error) = self.signaling.send(message) {
            warn!(error = %error, "failed to announce share start");
        }
        Ok(())
    }

    /// Stop broadcasting: detach every peer session, release the device,
    /// and announce the stop. Returns false when no share was active.
    pub async fn stop_share(&self) -> Result<bool> {
        let Some(stream) = self.capture.stop().await else {
            return Ok(false);
        };

        // every session detaches before the capture device is released
        self.sessions.destroy_all().await;
        stream.shutdown().await;

        let message = SignalingMessage::ScreenShareStopped {
            broadcaster_id: None,
            lecture_id: self.identity.lecture_id.clone(),
        };
        if let Err(error) = self.signaling.send(message) {
            warn!(error = %error, "failed to announce share stop");
        }
        self.bridge(RoomEvent::ShareStopped);
        Ok(true)
    }

    fn bridge(&self, event: RoomEvent) {
        if let Some(tx) = &self.bridge_tx {
            if tx.try_send(event).is_err() {
                debug!("room event dropped, bridge full or closed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Event handling
    // ------------------------------------------------------------------

    pub(crate) async fn on_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                self.bridge(RoomEvent::SignalingState(ConnectionState::Connected));
            }
            TransportEvent::Message(message) => self.on_message(message).await,
            TransportEvent::Malformed { raw, error } => {
                warn!(
                    error = %error,
                    bytes = raw.len(),
                    "dropping malformed signaling message"
                );
            }
            TransportEvent::Disconnected { abnormal } => {
                self.on_disconnected(abnormal).await;
            }
        }
    }

    /// Participant-id correlation does not survive a transport drop, so
    /// every session is invalidated; an abnormal drop renegotiates from the
    /// fresh roster after reconnect.
    async fn on_disconnected(&self, abnormal: bool) {
        if !self.sessions.is_empty().await {
            info!(abnormal, "signaling channel lost, tearing down all sessions");
        }
        self.sessions.destroy_all().await;

        if abnormal {
            self.bridge(RoomEvent::SignalingState(ConnectionState::Reconnecting));
        } else {
            // clean end of the connection: release the capture device too
            if let Some(stream) = self.capture.stop().await {
                stream.shutdown().await;
                self.bridge(RoomEvent::ShareStopped);
            }
            self.bridge(RoomEvent::SignalingState(ConnectionState::Disconnected));
        }
    }

    async fn on_message(&self, message: SignalingMessage) {
        match message {
            SignalingMessage::ScreenShareStarted { broadcaster_id, .. } => {
                self.on_share_started(broadcaster_id).await;
            }
            SignalingMessage::ScreenShareStopped { broadcaster_id, .. } => {
                self.on_share_stopped(broadcaster_id).await;
            }
            SignalingMessage::RequestConnection { from_viewer_id, .. } => {
                self.on_connection_request(from_viewer_id).await;
            }
            SignalingMessage::ParticipantsUpdate { participants, .. } => {
                self.on_roster(participants).await;
            }
            SignalingMessage::Offer {
                offer, from_peer_id, ..
            } => {
                self.on_offer(from_peer_id, offer).await;
            }
            SignalingMessage::Answer {
                answer,
                from_peer_id,
                ..
            } => {
                self.on_answer(from_peer_id, answer).await;
            }
            SignalingMessage::IceCandidate {
                candidate,
                from_peer_id,
                ..
            } => {
                self.on_candidate(from_peer_id, candidate).await;
            }
            SignalingMessage::Chat {
                message,
                is_private,
                username,
                user_id,
            } => {
                self.bridge(RoomEvent::Chat {
                    username,
                    user_id,
                    message,
                    is_private,
                });
            }
            SignalingMessage::Subtitle {
                text,
                translated_text,
                language,
                confidence,
                username,
            } => {
                self.bridge(RoomEvent::Subtitle {
                    username,
                    text,
                    translated_text,
                    language,
                    confidence,
                });
            }
            SignalingMessage::ShareStatus {
                is_sharing,
                username,
            } => {
                self.bridge(RoomEvent::ShareStatus {
                    username,
                    is_sharing,
                });
            }
            SignalingMessage::UserJoined { username } => {
                self.bridge(RoomEvent::Presence {
                    username,
                    joined: true,
                });
            }
            SignalingMessage::UserLeft { username } => {
                self.bridge(RoomEvent::Presence {
                    username,
                    joined: false,
                });
            }
        }
    }

    async fn on_share_started(&self, broadcaster_id: Option<String>) {
        if broadcaster_id.as_deref() == Some(self.identity.user_id.as_str()) {
            // the relay echoes our own announcement back
            return;
        }
        if self.identity.role != Role::Viewer {
            debug!("ignoring share announcement from another broadcaster");
            return;
        }
        let Some(broadcaster_id) = broadcaster_id else {
            warn!("screen_share_started without a broadcaster id, dropping");
            return;
        };

        info!(broadcaster_id = %broadcaster_id, "share started, requesting connection");
        self.bridge(RoomEvent::ShareStarted {
            broadcaster_id: broadcaster_id.clone(),
        });

        let message = SignalingMessage::RequestConnection {
            target_broadcaster_id: Some(broadcaster_id),
            from_viewer_id: None,
            lecture_id: self.identity.lecture_id.clone(),
        };
        if let Err(error) = self.signaling.send(message) {
            warn!(error = %error, "failed to request connection");
        }
    }

    async fn on_share_stopped(&self, broadcaster_id: Option<String>) {
        if broadcaster_id.as_deref() == Some(self.identity.user_id.as_str()) {
            // our own stop already ran the teardown
            return;
        }
        info!("share stopped remotely, tearing down all sessions");
        self.sessions.destroy_all().await;
        self.bridge(RoomEvent::ShareStopped);
    }

    async fn on_connection_request(&self, from_viewer_id: Option<String>) {
        if self.identity.role != Role::Broadcaster {
            warn!("viewer received a connection request, dropping");
            return;
        }
        let Some(viewer_id) = from_viewer_id else {
            warn!("request_connection without a viewer id, dropping");
            return;
        };
        if !self.capture.is_active().await {
            debug!(viewer_id = %viewer_id, "ignoring connection request while not sharing");
            return;
        }
        self.offer_to(&viewer_id).await;
    }

    /// Converge the registry onto the roster: offer to every non-self
    /// participant without a session, drop sessions for participants that
    /// left. Self-exclusion uses the injected identity.
    async fn on_roster(&self, participants: Vec<Participant>) {
        self.bridge(RoomEvent::Roster(participants.clone()));

        if self.identity.role != Role::Broadcaster || !self.capture.is_active().await {
            return;
        }

        let present: HashSet<&str> = participants
            .iter()
            .map(|p| p.id.as_str())
            .filter(|id| *id != self.identity.user_id)
            .collect();

        for participant_id in self.sessions.participant_ids().await {
            if !present.contains(participant_id.as_str()) {
                info!(participant_id = %participant_id, "participant left, destroying session");
                self.sessions.destroy(&participant_id).await;
            }
        }

        for participant in &participants {
            if participant.id == self.identity.user_id {
                continue;
            }
            if !self.sessions.contains(&participant.id).await {
                self.offer_to(&participant.id).await;
            }
        }
    }

    async fn offer_to(&self, participant_id: &str) {
        let tracks = self.capture.tracks().await;
        if tracks.is_empty() {
            warn!(participant_id, "cannot offer without an active capture session");
            return;
        }

        let (session, created) = match self
            .sessions
            .create(participant_id, SessionRole::Initiator, &tracks)
            .await
        {
            Ok(pair) => pair,
            Err(error) => {
                warn!(participant_id, error = %error, "failed to create initiator session");
                return;
            }
        };
        if !created {
            debug!(participant_id, "session already exists, not re-offering");
            return;
        }

        match session.create_offer().await {
            Ok(offer) => {
                let message = SignalingMessage::Offer {
                    offer,
                    target_peer_id: participant_id.to_string(),
                    from_peer_id: None,
                    lecture_id: self.identity.lecture_id.clone(),
                };
                if let Err(error) = self.signaling.send(message) {
                    warn!(participant_id, error = %error, "failed to send offer");
                }
            }
            Err(error) => {
                // negotiation failures stay local to this session
                warn!(participant_id, error = %error, "offer failed, tearing down session");
                self.sessions.destroy(participant_id).await;
            }
        }
    }

    async fn on_offer(&self, from_peer_id: Option<String>, offer: RTCSessionDescription) {
        if self.identity.role != Role::Viewer {
            warn!("broadcaster received an offer, dropping");
            return;
        }
        let Some(broadcaster_id) = from_peer_id else {
            warn!("offer without a sender id, dropping");
            return;
        };

        // a fresh offer for an id mid- or post-negotiation replaces the
        // stale session
        if let Some(existing) = self.sessions.get(&broadcaster_id).await {
            if !existing.can_accept_offer() {
                debug!(
                    broadcaster_id = %broadcaster_id,
                    "replacing stale session for renewed offer"
                );
                self.sessions.destroy(&broadcaster_id).await;
            }
        }

        let (session, _created) = match self.sessions.ensure_receiver(&broadcaster_id).await {
            Ok(pair) => pair,
            Err(error) => {
                warn!(broadcaster_id = %broadcaster_id, error = %error, "failed to create receiver session");
                return;
            }
        };

        match session.accept_offer(offer).await {
            Ok(answer) => {
                let message = SignalingMessage::Answer {
                    answer,
                    target_peer_id: broadcaster_id.clone(),
                    from_peer_id: None,
                    lecture_id: self.identity.lecture_id.clone(),
                };
                if let Err(error) = self.signaling.send(message) {
                    warn!(broadcaster_id = %broadcaster_id, error = %error, "failed to send answer");
                }
            }
            Err(error) => {
                warn!(broadcaster_id = %broadcaster_id, error = %error, "answer failed, tearing down session");
                self.sessions.destroy(&broadcaster_id).await;
            }
        }
    }

    async fn on_answer(&self, from_peer_id: Option<String>, answer: RTCSessionDescription) {
        if self.identity.role != Role::Broadcaster {
            warn!("viewer received an answer, dropping");
            return;
        }
        let Some(viewer_id) = from_peer_id else {
            warn!("answer without a sender id, dropping");
            return;
        };
        let Some(session) = self.sessions.get(&viewer_id).await else {
            warn!(viewer_id = %viewer_id, "answer for unknown session, dropping");
            return;
        };

        if let Err(error) = session.apply_answer(answer).await {
            warn!(viewer_id = %viewer_id, error = %error, "failed to apply answer, tearing down session");
            self.sessions.destroy(&viewer_id).await;
        }
    }

    async fn on_candidate(&self, from_peer_id: Option<String>, candidate: RTCIceCandidateInit) {
        let Some(sender_id) = from_peer_id else {
            warn!("candidate without a sender id, dropping");
            return;
        };
        let Some(session) = self.sessions.get(&sender_id).await else {
            // candidates routinely race session teardown
            debug!(sender_id = %sender_id, "candidate for unknown session, dropping");
            return;
        };

        if let Err(error) = session.add_remote_candidate(candidate).await {
            warn!(sender_id = %sender_id, error = %error, "failed to apply candidate");
        }
    }

    pub(crate) async fn on_peer_event(&self, event: PeerEvent) {
        match event {
            PeerEvent::LocalCandidate {
                participant_id,
                candidate,
            } => {
                if !self.sessions.contains(&participant_id).await {
                    debug!(participant_id = %participant_id, "candidate from removed session, dropping");
                    return;
                }
                let message = SignalingMessage::IceCandidate {
                    candidate,
                    target_peer_id: participant_id.clone(),
                    from_peer_id: None,
                    lecture_id: self.identity.lecture_id.clone(),
                };
                if let Err(error) = self.signaling.send(message) {
                    debug!(participant_id = %participant_id, error = %error, "failed to send candidate");
                }
            }

            PeerEvent::TrackAdded {
                participant_id,
                track_id,
                kind,
                track,
            } => {
                if !self.sessions.contains(&participant_id).await {
                    debug!(participant_id = %participant_id, "track from removed session, dropping");
                    return;
                }
                let outcome = self
                    .streams
                    .add_track(&participant_id, TrackHandle::new(track_id, kind, track))
                    .await;
                if outcome.created_stream {
                    self.bridge(RoomEvent::RemoteStreamAdded {
                        participant_id: participant_id.clone(),
                    });
                }
            }

            PeerEvent::StateChanged {
                participant_id,
                state,
            } => match state {
                RTCPeerConnectionState::Failed | RTCPeerConnectionState::Disconnected => {
                    // peer-local failure: tear down only this session
                    if self.sessions.destroy(&participant_id).await {
                        warn!(participant_id = %participant_id, ?state, "connection lost, session torn down");
                        self.bridge(RoomEvent::RemoteStreamRemoved { participant_id });
                    }
                }
                RTCPeerConnectionState::Connected => {
                    debug!(participant_id = %participant_id, "peer connection established");
                }
                _ => {}
            },
        }
    }

    pub(crate) async fn on_capture_event(&self, event: CaptureEvent) {
        match event {
            CaptureEvent::Ended => {
                info!("capture ended externally, stopping share");
                if let Err(error) = self.stop_share().await {
                    warn!(error = %error, "failed to stop share after capture ended");
                }
            }
        }
    }
}
