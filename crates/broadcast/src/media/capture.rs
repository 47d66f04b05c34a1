//! Local capture session.
//!
//! Owns the broadcaster's outbound capture for the duration of one share.
//! Device acquisition is a host concern (screen/window pickers, OS capture
//! APIs), so the session works against the [`CaptureSource`] seam: the host
//! opens a [`CaptureStream`] that exposes local tracks and resolves its
//! `ended()` future when the capture terminates externally (for example the
//! user revoking sharing at the OS level). At most one capture session is
//! active per core.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Host-provided capture device
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Acquire the capture stream. Denial or cancellation surfaces as
    /// [`Error::Capture`] and leaves the session inactive.
    async fn open(&self) -> Result<Box<dyn CaptureStream>>;
}

/// One acquired capture stream
#[async_trait]
pub trait CaptureStream: Send + Sync {
    /// Local tracks fed by this capture, attached to every initiator session
    /// created while the share is active
    fn tracks(&self) -> Vec<Arc<TrackLocalStaticSample>>;

    /// Resolves when the capture ends externally; the watcher turns this
    /// into a stop of the whole share
    async fn ended(&self);

    /// Release the underlying device. Called after every peer session has
    /// been detached.
    async fn shutdown(&self);
}

/// Event emitted by the capture watcher task
#[derive(Debug)]
pub enum CaptureEvent {
    /// The capture terminated externally
    Ended,
}

struct ActiveCapture {
    stream: Arc<dyn CaptureStream>,
    watcher: JoinHandle<()>,
}

/// Lifecycle owner for the broadcaster's outbound capture
pub struct CaptureSession {
    active: Mutex<Option<ActiveCapture>>,
    events: mpsc::UnboundedSender<CaptureEvent>,
}

impl CaptureSession {
    pub(crate) fn new(events: mpsc::UnboundedSender<CaptureEvent>) -> Self {
        Self {
            active: Mutex::new(None),
            events,
        }
    }

    /// Acquire a capture stream and arm the termination watcher.
    /// Rejected while a session is already active.
    pub(crate) async fn start(&self, source: &dyn CaptureSource) -> Result<()> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Err(Error::CaptureActive);
        }

        let stream: Arc<dyn CaptureStream> = Arc::from(source.open().await?);
        info!(tracks = stream.tracks().len(), "capture session started");

        let watcher = tokio::spawn({
            let stream = Arc::clone(&stream);
            let events = self.events.clone();
            async move {
                stream.ended().await;
                debug!("capture terminated externally");
                let _ = events.send(CaptureEvent::Ended);
            }
        });

        *active = Some(ActiveCapture { stream, watcher });
        Ok(())
    }

    /// Deactivate and hand the stream back for device release.
    /// Returns `None` when no capture was active.
    ///
    /// The caller detaches every peer session before calling
    /// [`CaptureStream::shutdown`] on the returned stream, so no session ever
    /// reads from a released device.
    pub(crate) async fn stop(&self) -> Option<Arc<dyn CaptureStream>> {
        let taken = self.active.lock().await.take()?;
        taken.watcher.abort();
        info!("capture session stopped");
        Some(taken.stream)
    }

    /// Whether a capture session is active
    pub async fn is_active(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Local tracks of the active capture; empty when inactive
    pub async fn tracks(&self) -> Vec<Arc<TrackLocalStaticSample>> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|a| a.stream.tracks())
            .unwrap_or_default()
    }
}

/// A VP8 video track for an outbound capture
pub fn video_track(track_id: &str) -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_string(),
            ..Default::default()
        },
        track_id.to_string(),
        "lectern-capture".to_string(),
    ))
}

/// An Opus audio track for an outbound capture
pub fn audio_track(track_id: &str) -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_string(),
            ..Default::default()
        },
        track_id.to_string(),
        "lectern-capture".to_string(),
    ))
}
