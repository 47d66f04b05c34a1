//! Remote stream aggregation.
//!
//! A participant's audio and video tracks arrive separately on the peer
//! connection; the aggregator unions them into one playable stream per
//! participant, keyed by participant id and deduplicated by track id. The
//! map is written only from the router loop and read by the rendering
//! boundary.
//!
//! Generic over the track handle so the logic is testable without live RTP;
//! production instantiates it with `webrtc`'s `TrackRemote`.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Media kind of a remote track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// One remote track plus the identity used for idempotent merging
#[derive(Debug, Clone)]
pub struct TrackHandle<T> {
    /// Track id, unique within the sending peer
    pub id: String,
    pub kind: TrackKind,
    pub track: Arc<T>,
}

impl<T> TrackHandle<T> {
    pub fn new(id: impl Into<String>, kind: TrackKind, track: Arc<T>) -> Self {
        Self {
            id: id.into(),
            kind,
            track,
        }
    }
}

/// The aggregate stream for one participant
#[derive(Debug)]
pub struct RemoteStream<T> {
    participant_id: String,
    tracks: Vec<TrackHandle<T>>,
}

impl<T> RemoteStream<T> {
    fn new(participant_id: &str) -> Self {
        Self {
            participant_id: participant_id.to_string(),
            tracks: Vec::new(),
        }
    }

    /// Add a track unless one with the same id is already merged
    fn insert(&mut self, handle: TrackHandle<T>) -> bool {
        if self.tracks.iter().any(|t| t.id == handle.id) {
            debug!(
                participant_id = %self.participant_id,
                track_id = %handle.id,
                "track already merged, ignoring"
            );
            return false;
        }
        self.tracks.push(handle);
        true
    }

    fn count_kind(&self, kind: TrackKind) -> usize {
        self.tracks.iter().filter(|t| t.kind == kind).count()
    }
}

/// Outcome of one [`StreamAggregator::add_track`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddOutcome {
    /// A new aggregate entry was created for the participant
    pub created_stream: bool,
    /// The track was newly merged (false when its id was already present)
    pub added: bool,
}

/// Map of participant id → aggregate stream
pub struct StreamAggregator<T> {
    streams: RwLock<HashMap<String, RemoteStream<T>>>,
}

impl<T> Default for StreamAggregator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> StreamAggregator<T> {
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
        }
    }

    /// Merge a track into the participant's aggregate stream, creating the
    /// entry on first arrival. Idempotent by track id.
    pub async fn add_track(&self, participant_id: &str, handle: TrackHandle<T>) -> AddOutcome {
        let mut streams = self.streams.write().await;

        let created_stream = !streams.contains_key(participant_id);
        let stream = streams
            .entry(participant_id.to_string())
            .or_insert_with(|| RemoteStream::new(participant_id));

        let track_id = handle.id.clone();
        let kind = handle.kind;
        let added = stream.insert(handle);

        if added {
            info!(
                participant_id,
                track_id = %track_id,
                kind = ?kind,
                total = stream.tracks.len(),
                "merged remote track"
            );
        }

        AddOutcome {
            created_stream,
            added,
        }
    }

    /// Drop the whole aggregate entry for a participant
    pub async fn remove(&self, participant_id: &str) -> bool {
        let removed = self.streams.write().await.remove(participant_id).is_some();
        if removed {
            debug!(participant_id, "dropped aggregate stream");
        }
        removed
    }

    /// Drop every aggregate entry
    pub async fn clear(&self) {
        let mut streams = self.streams.write().await;
        if !streams.is_empty() {
            info!(count = streams.len(), "clearing aggregate streams");
        }
        streams.clear();
    }

    /// Number of participants with an aggregate stream
    pub async fn len(&self) -> usize {
        self.streams.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.streams.read().await.is_empty()
    }

    /// Participants that currently have an aggregate stream
    pub async fn participant_ids(&self) -> Vec<String> {
        self.streams.read().await.keys().cloned().collect()
    }

    /// Cloned track handles for one participant's aggregate stream
    pub async fn tracks(&self, participant_id: &str) -> Vec<Arc<T>> {
        self.streams
            .read()
            .await
            .get(participant_id)
            .map(|s| s.tracks.iter().map(|t| Arc::clone(&t.track)).collect())
            .unwrap_or_default()
    }

    /// Number of merged tracks of the given kind for one participant
    pub async fn track_count(&self, participant_id: &str, kind: TrackKind) -> usize {
        self.streams
            .read()
            .await
            .get(participant_id)
            .map(|s| s.count_kind(kind))
            .unwrap_or(0)
    }
}
