//! Signaling transport.
//!
//! Owns one long-lived WebSocket connection to the lecture relay. The
//! transport task serializes outbound [`SignalingMessage`]s, parses inbound
//! frames, and publishes its connection state on a watch channel. An abnormal
//! closure schedules a reconnect after a fixed delay with unbounded retries;
//! a normal closure ends the task until a new transport is spawned.
//!
//! Everything the rest of the core needs from the wire arrives as a
//! [`TransportEvent`]; the raw channel is never exposed.

use crate::config::BroadcastConfig;
use crate::error::{Error, Result};
use crate::identity::LocalIdentity;
use crate::signaling::protocol::SignalingMessage;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

/// Connection lifecycle of the signaling transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and none pending
    Disconnected,
    /// A connect attempt is in flight
    Connecting,
    /// The channel is open
    Connected,
    /// An abnormal closure occurred; a retry is scheduled
    Reconnecting,
}

/// Events emitted by the transport task
#[derive(Debug)]
pub enum TransportEvent {
    /// The channel opened
    Connected,
    /// A well-formed signaling message arrived
    Message(SignalingMessage),
    /// An inbound frame could not be parsed; dropped without state change
    Malformed { raw: String, error: String },
    /// The channel closed. `abnormal` closures reconnect after the
    /// configured delay; normal closures are terminal.
    Disconnected { abnormal: bool },
}

/// Commands accepted by the transport task
#[derive(Debug)]
pub(crate) enum TransportCommand {
    Send(SignalingMessage),
    Shutdown,
}

/// Cloneable handle to a spawned transport
#[derive(Clone)]
pub struct SignalingHandle {
    pub(crate) commands: mpsc::UnboundedSender<TransportCommand>,
    pub(crate) state: watch::Receiver<ConnectionState>,
}

impl SignalingHandle {
    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch receiver for connection-state changes (UI status indicator)
    pub fn state_stream(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Send a message over the signaling channel.
    ///
    /// Fails with [`Error::SignalingClosed`] when the channel is not open;
    /// nothing is queued for later delivery.
    pub fn send(&self, message: SignalingMessage) -> Result<()> {
        if self.state() != ConnectionState::Connected {
            return Err(Error::SignalingClosed);
        }
        self.commands
            .send(TransportCommand::Send(message))
            .map_err(|_| Error::SignalingClosed)
    }

    /// Close the channel normally and end the transport task
    pub fn shutdown(&self) {
        let _ = self.commands.send(TransportCommand::Shutdown);
    }
}

/// How one connection ended
enum CloseKind {
    Normal,
    Abnormal,
    Shutdown,
}

/// Signaling transport spawner
pub struct SignalingTransport;

impl SignalingTransport {
    /// Spawn the transport task for one (lecture, user) connection.
    ///
    /// The identity token is attached as a query parameter; reconnects reuse
    /// the same endpoint and token.
    pub fn spawn(
        config: Arc<BroadcastConfig>,
        identity: &LocalIdentity,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> SignalingHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let url = config.endpoint(&identity.lecture_id, &identity.token);

        tokio::spawn(run(config, url, events, command_rx, state_tx));

        SignalingHandle {
            commands: command_tx,
            state: state_rx,
        }
    }
}

async fn run(
    config: Arc<BroadcastConfig>,
    url: String,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut commands: mpsc::UnboundedReceiver<TransportCommand>,
    state: watch::Sender<ConnectionState>,
) {
    loop {
        state.send_replace(ConnectionState::Connecting);

        match timeout(config.connect_timeout(), connect_async(url.as_str())).await {
            Ok(Ok((stream, _response))) => {
                debug!(url = %url, "signaling channel open");
                state.send_replace(ConnectionState::Connected);
                let _ = events.send(TransportEvent::Connected);

                match drive(stream, &events, &mut commands).await {
                    CloseKind::Normal | CloseKind::Shutdown => {
                        state.send_replace(ConnectionState::Disconnected);
                        let _ = events.send(TransportEvent::Disconnected { abnormal: false });
                        return;
                    }
                    CloseKind::Abnormal => {
                        let _ = events.send(TransportEvent::Disconnected { abnormal: true });
                    }
                }
            }
            Ok(Err(error)) => {
                warn!(url = %url, error = %error, "signaling connect failed");
            }
            Err(_) => {
                warn!(url = %url, "signaling connect timed out");
            }
        }

        // Fixed delay, unbounded retries: the relay protocol has no
        // backoff/jitter story, so none is invented here.
        state.send_replace(ConnectionState::Reconnecting);
        if wait_for_retry(&mut commands, &config).await {
            state.send_replace(ConnectionState::Disconnected);
            let _ = events.send(TransportEvent::Disconnected { abnormal: false });
            return;
        }
    }
}

/// Sleep out the reconnect delay while still honoring shutdown.
/// Returns true when the task should end instead of retrying.
async fn wait_for_retry(
    commands: &mut mpsc::UnboundedReceiver<TransportCommand>,
    config: &BroadcastConfig,
) -> bool {
    let delay = sleep(config.reconnect_delay());
    tokio::pin!(delay);

    loop {
        tokio::select! {
            _ = &mut delay => return false,
            command = commands.recv() => match command {
                Some(TransportCommand::Shutdown) | None => return true,
                Some(TransportCommand::Send(message)) => {
                    debug!(kind = message.kind(), "dropping message while disconnected");
                }
            },
        }
    }
}

/// Pump one open connection until it closes
async fn drive(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    events: &mpsc::UnboundedSender<TransportEvent>,
    commands: &mut mpsc::UnboundedReceiver<TransportCommand>,
) -> CloseKind {
    let (mut sink, mut reader) = stream.split();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(TransportCommand::Send(message)) => {
                    let text = match serde_json::to_string(&message) {
                        Ok(text) => text,
                        Err(error) => {
                            warn!(kind = message.kind(), error = %error, "failed to encode signaling message");
                            continue;
                        }
                    };
                    trace!(kind = message.kind(), "sending signaling message");
                    if let Err(error) = sink.send(Message::Text(text)).await {
                        warn!(error = %error, "signaling write failed");
                        return CloseKind::Abnormal;
                    }
                }
                Some(TransportCommand::Shutdown) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    return CloseKind::Shutdown;
                }
            },

            frame = reader.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str(&text) {
                    Ok(message) => {
                        let _ = events.send(TransportEvent::Message(message));
                    }
                    Err(error) => {
                        let _ = events.send(TransportEvent::Malformed {
                            raw: text,
                            error: error.to_string(),
                        });
                    }
                },
                Some(Ok(Message::Ping(payload))) => {
                    let _ = sink.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    let abnormal = frame
                        .map(|f| f.code != CloseCode::Normal && f.code != CloseCode::Away)
                        .unwrap_or(true);
                    debug!(abnormal, "signaling channel closed by relay");
                    return if abnormal {
                        CloseKind::Abnormal
                    } else {
                        CloseKind::Normal
                    };
                }
                Some(Ok(_)) => {
                    // binary/pong frames carry nothing for this core
                }
                Some(Err(error)) => {
                    warn!(error = %error, "signaling read failed");
                    return CloseKind::Abnormal;
                }
                None => {
                    warn!("signaling channel ended without a close frame");
                    return CloseKind::Abnormal;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn test_config(addr: std::net::SocketAddr) -> Arc<BroadcastConfig> {
        Arc::new(BroadcastConfig {
            signaling_url: format!("ws://{addr}/ws/lecture"),
            reconnect_delay_ms: 50,
            connect_timeout_ms: 2_000,
            ..Default::default()
        })
    }

    fn viewer() -> LocalIdentity {
        LocalIdentity::viewer("v1", "42", "tok")
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for transport event")
            .expect("transport event channel closed")
    }

    #[tokio::test]
    async fn connects_sends_and_closes_normally() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            // first frame from the client is the chat message
            let frame = ws.next().await.unwrap().unwrap();
            let text = match frame {
                Message::Text(text) => text,
                other => panic!("expected text frame, got {other:?}"),
            };

            // push one message back, then wait for the client's close
            ws.send(Message::Text(
                r#"{"type": "user_joined", "username": "Ada"}"#.to_string(),
            ))
            .await
            .unwrap();

            while let Some(Ok(frame)) = ws.next().await {
                if matches!(frame, Message::Close(_)) {
                    break;
                }
            }
            text
        });

        let (event_tx, mut events) = mpsc::unbounded_channel();
        let handle = SignalingTransport::spawn(test_config(addr), &viewer(), event_tx);

        assert!(matches!(
            next_event(&mut events).await,
            TransportEvent::Connected
        ));
        assert_eq!(handle.state(), ConnectionState::Connected);

        handle
            .send(SignalingMessage::Chat {
                message: "hello".to_string(),
                is_private: false,
                username: None,
                user_id: None,
            })
            .unwrap();

        assert!(matches!(
            next_event(&mut events).await,
            TransportEvent::Message(SignalingMessage::UserJoined { .. })
        ));

        handle.shutdown();
        assert!(matches!(
            next_event(&mut events).await,
            TransportEvent::Disconnected { abnormal: false }
        ));

        let sent = server.await.unwrap();
        assert!(sent.contains(r#""type":"chat_message""#));
    }

    #[tokio::test]
    async fn abnormal_drop_triggers_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            // first connection: drop the socket with no close frame
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            drop(ws);

            // second connection: stay up
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            while ws.next().await.is_some() {}
        });

        let (event_tx, mut events) = mpsc::unbounded_channel();
        let _handle = SignalingTransport::spawn(test_config(addr), &viewer(), event_tx);

        assert!(matches!(
            next_event(&mut events).await,
            TransportEvent::Connected
        ));
        assert!(matches!(
            next_event(&mut events).await,
            TransportEvent::Disconnected { abnormal: true }
        ));
        // reconnects on its own after the fixed delay
        assert!(matches!(
            next_event(&mut events).await,
            TransportEvent::Connected
        ));
    }

    #[tokio::test]
    async fn malformed_frames_are_reported_and_skipped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            ws.send(Message::Text("{\"type\": \"offer\", \"off".to_string()))
                .await
                .unwrap();
            ws.send(Message::Text(
                r#"{"type": "user_left", "username": "Ada"}"#.to_string(),
            ))
            .await
            .unwrap();
            while ws.next().await.is_some() {}
        });

        let (event_tx, mut events) = mpsc::unbounded_channel();
        let _handle = SignalingTransport::spawn(test_config(addr), &viewer(), event_tx);

        assert!(matches!(
            next_event(&mut events).await,
            TransportEvent::Connected
        ));
        assert!(matches!(
            next_event(&mut events).await,
            TransportEvent::Malformed { .. }
        ));
        // the next valid message is processed normally
        assert!(matches!(
            next_event(&mut events).await,
            TransportEvent::Message(SignalingMessage::UserLeft { .. })
        ));
    }

    #[tokio::test]
    async fn send_fails_while_not_connected() {
        // bind then drop so the port refuses connections
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (event_tx, _events) = mpsc::unbounded_channel();
        let handle = SignalingTransport::spawn(test_config(addr), &viewer(), event_tx);

        let result = handle.send(SignalingMessage::Chat {
            message: "nobody home".to_string(),
            is_private: false,
            username: None,
            user_id: None,
        });
        assert!(matches!(result, Err(Error::SignalingClosed)));

        handle.shutdown();
    }
}
