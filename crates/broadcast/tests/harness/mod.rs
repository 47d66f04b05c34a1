//! In-process lecture relay stub.
//!
//! Reproduces the relay contract the core is written against: clients are
//! identified by the `token` query parameter, the roster is broadcast on
//! every join and leave, share announcements fan out with the broadcaster id
//! stamped on, and directed messages (`request_connection`, `offer`,
//! `answer`, `ice-candidate`) are forwarded to their target with the sender
//! id stamped on. For tests the token IS the user id.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::handshake::server::{
    Request, Response,
};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::accept_hdr_async;

use lectern_broadcast::error::Result as BroadcastResult;
use lectern_broadcast::media::{CaptureSource, CaptureStream};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .try_init();
}

struct PeerHandle {
    out: mpsc::UnboundedSender<String>,
    kill: Option<oneshot::Sender<()>>,
}

#[derive(Default)]
struct RelayState {
    peers: Mutex<HashMap<String, PeerHandle>>,
}

/// Handle to a spawned relay stub
pub struct Relay {
    pub addr: SocketAddr,
    state: Arc<RelayState>,
}

impl Relay {
    pub async fn spawn() -> Relay {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(RelayState::default());

        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle_client(stream, Arc::clone(&accept_state)));
            }
        });

        Relay { addr, state }
    }

    /// Signaling endpoint base for this relay
    pub fn signaling_url(&self) -> String {
        format!("ws://{}/ws/lecture", self.addr)
    }

    /// Drop a client's socket abruptly, with no close frame
    pub async fn kill(&self, user_id: &str) {
        let kill = self
            .state
            .peers
            .lock()
            .await
            .get_mut(user_id)
            .and_then(|peer| peer.kill.take());
        if let Some(kill) = kill {
            let _ = kill.send(());
        }
    }

    pub async fn connected_count(&self) -> usize {
        self.state.peers.lock().await.len()
    }
}

enum SessionEnd {
    Killed,
    Gone,
}

async fn handle_client(stream: TcpStream, state: Arc<RelayState>) {
    let token: Arc<std::sync::Mutex<Option<String>>> = Arc::default();
    let token_capture = Arc::clone(&token);

    let callback = move |request: &Request, response: Response| {
        let query = request.uri().query().unwrap_or("");
        let value = query
            .split('&')
            .find_map(|pair| pair.strip_prefix("token="))
            .map(str::to_string);
        *token_capture.lock().unwrap() = value;
        Ok(response)
    };

    let Ok(ws) = accept_hdr_async(stream, callback).await else {
        return;
    };
    let Some(user_id) = token.lock().unwrap().clone() else {
        return;
    };

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let (kill_tx, mut kill_rx) = oneshot::channel::<()>();
    state.peers.lock().await.insert(
        user_id.clone(),
        PeerHandle {
            out: out_tx,
            kill: Some(kill_tx),
        },
    );
    broadcast_roster(&state, &user_id).await;

    let (mut sink, mut reader) = ws.split();
    let _end = loop {
        tokio::select! {
            _ = &mut kill_rx => break SessionEnd::Killed,
            Some(text) = out_rx.recv() => {
                if sink.send(Message::Text(text)).await.is_err() {
                    break SessionEnd::Gone;
                }
            }
            frame = reader.next() => match frame {
                Some(Ok(Message::Text(text))) => route(&state, &user_id, &text).await,
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break SessionEnd::Gone,
                Some(Ok(_)) => {}
            },
        }
    };

    // on a kill the socket drops with no close frame, which the client
    // must treat as an abnormal closure
    drop(sink);
    drop(reader);

    state.peers.lock().await.remove(&user_id);
    broadcast_roster(&state, &user_id).await;
}

async fn route(state: &Arc<RelayState>, from: &str, text: &str) {
    let Ok(mut value) = serde_json::from_str::<Value>(text) else {
        return;
    };
    let Some(kind) = value.get("type").and_then(Value::as_str).map(str::to_string) else {
        return;
    };

    match kind.as_str() {
        "screen_share_started" | "screen_share_stopped" => {
            if let Some(message) = value.as_object_mut() {
                message.insert("broadcasterId".to_string(), json!(from));
            }
            broadcast(state, &value.to_string()).await;
        }
        "request_connection" => {
            let target = value
                .get("targetBroadcasterId")
                .and_then(Value::as_str)
                .map(str::to_string);
            if let Some(message) = value.as_object_mut() {
                message.insert("fromViewerId".to_string(), json!(from));
            }
            if let Some(target) = target {
                send_to(state, &target, &value.to_string()).await;
            }
        }
        "offer" | "answer" | "ice-candidate" => {
            let target = value
                .get("targetPeerId")
                .and_then(Value::as_str)
                .map(str::to_string);
            if let Some(message) = value.as_object_mut() {
                message.insert("fromPeerId".to_string(), json!(from));
            }
            if let Some(target) = target {
                send_to(state, &target, &value.to_string()).await;
            }
        }
        _ => broadcast(state, text).await,
    }
}

async fn broadcast(state: &Arc<RelayState>, text: &str) {
    for peer in state.peers.lock().await.values() {
        let _ = peer.out.send(text.to_string());
    }
}

async fn send_to(state: &Arc<RelayState>, target: &str, text: &str) {
    if let Some(peer) = state.peers.lock().await.get(target) {
        let _ = peer.out.send(text.to_string());
    }
}

async fn broadcast_roster(state: &Arc<RelayState>, current: &str) {
    let roster = {
        let peers = state.peers.lock().await;
        json!({
            "type": "participants_update",
            "participants": peers
                .keys()
                .map(|id| json!({"id": id}))
                .collect::<Vec<_>>(),
            "currentUserId": current,
        })
    };
    broadcast(state, &roster.to_string()).await;
}

// ---------------------------------------------------------------------
// Capture stub
// ---------------------------------------------------------------------

#[derive(Default)]
pub struct StubCaptureState {
    pub ended: Notify,
    pub released: AtomicBool,
}

pub struct StubStream {
    tracks: Vec<Arc<TrackLocalStaticSample>>,
    state: Arc<StubCaptureState>,
}

#[async_trait::async_trait]
impl CaptureStream for StubStream {
    fn tracks(&self) -> Vec<Arc<TrackLocalStaticSample>> {
        self.tracks.clone()
    }

    async fn ended(&self) {
        self.state.ended.notified().await;
    }

    async fn shutdown(&self) {
        self.state.released.store(true, Ordering::SeqCst);
    }
}

pub struct StubSource {
    pub state: Arc<StubCaptureState>,
}

impl StubSource {
    pub fn new() -> Self {
        Self {
            state: Arc::new(StubCaptureState::default()),
        }
    }
}

#[async_trait::async_trait]
impl CaptureSource for StubSource {
    async fn open(&self) -> BroadcastResult<Box<dyn CaptureStream>> {
        Ok(Box::new(StubStream {
            tracks: vec![
                lectern_broadcast::media::video_track("screen-video"),
                lectern_broadcast::media::audio_track("screen-audio"),
            ],
            state: Arc::clone(&self.state),
        }))
    }
}
