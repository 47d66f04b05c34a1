//! Peer session registry.
//!
//! An arena of live sessions indexed by participant id. At most one session
//! exists per participant; creation is idempotent, and removal invalidates
//! the index entry before any resource is released so no late callback can
//! act on a removed session through the registry.

use crate::config::BroadcastConfig;
use crate::error::{Error, Result};
use crate::media::StreamAggregator;
use crate::peer::{PeerEvent, PeerSession, SessionRole};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

/// Owner of every live peer session, keyed by participant id
pub struct SessionRegistry {
    config: Arc<BroadcastConfig>,
    sessions: RwLock<HashMap<String, Arc<PeerSession>>>,
    aggregator: Arc<StreamAggregator<TrackRemote>>,
    peer_events: mpsc::UnboundedSender<PeerEvent>,
}

impl SessionRegistry {
    pub(crate) fn new(
        config: Arc<BroadcastConfig>,
        aggregator: Arc<StreamAggregator<TrackRemote>>,
        peer_events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            aggregator,
            peer_events,
        }
    }

    /// Create a session for a participant, or return the existing one.
    ///
    /// Returns the session and whether it was newly created. Initiator
    /// sessions require the capture session's tracks; creating one without
    /// them fails with [`Error::NoLocalMedia`].
    pub async fn create(
        &self,
        participant_id: &str,
        role: SessionRole,
        local_tracks: &[Arc<TrackLocalStaticSample>],
    ) -> Result<(Arc<PeerSession>, bool)> {
        if let Some(existing) = self.get(participant_id).await {
            debug!(participant_id, "session already exists, create is a no-op");
            return Ok((existing, false));
        }
        if role == SessionRole::Initiator && local_tracks.is_empty() {
            return Err(Error::NoLocalMedia);
        }

        let session = PeerSession::connect(
            participant_id,
            role,
            &self.config,
            local_tracks,
            self.peer_events.clone(),
        )
        .await?;

        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(participant_id) {
            // a racing event created the session first; keep theirs
            let existing = Arc::clone(existing);
            drop(sessions);
            session.close().await;
            return Ok((existing, false));
        }
        sessions.insert(participant_id.to_string(), Arc::clone(&session));
        let total = sessions.len();
        drop(sessions);

        info!(participant_id, ?role, total, "created peer session");
        Ok((session, true))
    }

    /// Create-on-demand for an inbound offer
    pub async fn ensure_receiver(&self, participant_id: &str) -> Result<(Arc<PeerSession>, bool)> {
        self.create(participant_id, SessionRole::Receiver, &[]).await
    }

    pub async fn get(&self, participant_id: &str) -> Option<Arc<PeerSession>> {
        self.sessions.read().await.get(participant_id).cloned()
    }

    pub async fn contains(&self, participant_id: &str) -> bool {
        self.sessions.read().await.contains_key(participant_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn participant_ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Destroy one session: invalidate the index entry, drop the aggregate
    /// stream, then close the connection.
    pub async fn destroy(&self, participant_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(participant_id);
        let Some(session) = removed else {
            return false;
        };
        self.aggregator.remove(participant_id).await;
        session.close().await;
        info!(participant_id, "destroyed peer session");
        true
    }

    /// Destroy every session. Used on capture stop and transport reconnect.
    pub async fn destroy_all(&self) {
        let drained: Vec<(String, Arc<PeerSession>)> =
            self.sessions.write().await.drain().collect();
        if drained.is_empty() {
            return;
        }
        self.aggregator.clear().await;
        let count = drained.len();
        for (_, session) in drained {
            session.close().await;
        }
        info!(count, "destroyed all peer sessions");
    }
}
