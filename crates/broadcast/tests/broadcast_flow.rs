//! End-to-end signaling flows over an in-process relay.
//!
//! These tests assert signaling-level outcomes only (negotiation states,
//! registry contents, emitted messages). Live ICE/media connectivity is
//! environment-dependent and is never waited on.

mod harness;

use harness::{Relay, StubSource};
use lectern_broadcast::{
    BroadcastConfig, ConnectionState, EventRouter, LocalIdentity, NegotiationState,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

fn config(relay: &Relay) -> BroadcastConfig {
    BroadcastConfig {
        signaling_url: relay.signaling_url(),
        // host candidates only: tests never touch the network
        ice_servers: vec![],
        reconnect_delay_ms: 100,
        connect_timeout_ms: 5_000,
    }
}

const WAIT: Duration = Duration::from_secs(10);
const POLL: Duration = Duration::from_millis(25);

async fn wait_signaling_connected(router: &EventRouter, what: &str) {
    let deadline = Instant::now() + WAIT;
    while router.signaling().state() != ConnectionState::Connected {
        if Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        sleep(POLL).await;
    }
}

async fn wait_session_state(
    router: &EventRouter,
    participant: &str,
    expected: NegotiationState,
    what: &str,
) {
    let deadline = Instant::now() + WAIT;
    loop {
        let state = router
            .sessions()
            .get(participant)
            .await
            .map(|session| session.state());
        if state == Some(expected) {
            return;
        }
        if Instant::now() > deadline {
            panic!("timed out waiting for {what} (last state: {state:?})");
        }
        sleep(POLL).await;
    }
}

async fn wait_sessions_empty(router: &EventRouter, what: &str) {
    let deadline = Instant::now() + WAIT;
    while !router.sessions().is_empty().await {
        if Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        sleep(POLL).await;
    }
}

/// The first-viewer scenario: a share starts, the viewer requests a
/// connection, the offer/answer handshake completes on both sides, and a
/// stop leaves nothing behind.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn broadcaster_and_viewer_negotiate_over_the_relay() {
    harness::init_tracing();
    let relay = Relay::spawn().await;

    let broadcaster = Arc::new(EventRouter::new(
        config(&relay),
        LocalIdentity::broadcaster("b1", "42", "b1"),
    ));
    let viewer = Arc::new(EventRouter::new(
        config(&relay),
        LocalIdentity::viewer("v1", "42", "v1"),
    ));
    tokio::spawn(Arc::clone(&broadcaster).run());
    tokio::spawn(Arc::clone(&viewer).run());

    wait_signaling_connected(&broadcaster, "broadcaster to connect").await;
    wait_signaling_connected(&viewer, "viewer to connect").await;
    assert_eq!(relay.connected_count().await, 2);

    // sharing begins with zero sessions; the viewer's request drives the
    // first offer
    let source = StubSource::new();
    broadcaster.start_share(&source).await.unwrap();

    wait_session_state(
        &broadcaster,
        "v1",
        NegotiationState::Connected,
        "broadcaster-side handshake",
    )
    .await;
    wait_session_state(
        &viewer,
        "b1",
        NegotiationState::Connected,
        "viewer-side handshake",
    )
    .await;
    assert_eq!(broadcaster.sessions().len().await, 1);
    assert_eq!(viewer.sessions().len().await, 1);

    // stop: zero sessions on both ends, capture released
    assert!(broadcaster.stop_share().await.unwrap());
    wait_sessions_empty(&viewer, "viewer teardown after stop").await;
    assert!(broadcaster.sessions().is_empty().await);
    assert!(broadcaster.streams().is_empty().await);
    assert!(viewer.streams().is_empty().await);
    assert!(!broadcaster.capture().is_active().await);
}

/// A late joiner is picked up from the roster, not from a connection
/// request.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn late_joiner_is_offered_from_the_roster() {
    harness::init_tracing();
    let relay = Relay::spawn().await;

    let broadcaster = Arc::new(EventRouter::new(
        config(&relay),
        LocalIdentity::broadcaster("b1", "42", "b1"),
    ));
    tokio::spawn(Arc::clone(&broadcaster).run());
    wait_signaling_connected(&broadcaster, "broadcaster to connect").await;

    let source = StubSource::new();
    broadcaster.start_share(&source).await.unwrap();
    assert!(broadcaster.sessions().is_empty().await);

    // viewer joins after the share began; the roster update drives the offer
    let viewer = Arc::new(EventRouter::new(
        config(&relay),
        LocalIdentity::viewer("v1", "42", "v1"),
    ));
    tokio::spawn(Arc::clone(&viewer).run());

    wait_session_state(
        &broadcaster,
        "v1",
        NegotiationState::Connected,
        "broadcaster-side handshake",
    )
    .await;
    wait_session_state(
        &viewer,
        "b1",
        NegotiationState::Connected,
        "viewer-side handshake",
    )
    .await;
}

/// An abnormal transport drop invalidates every session; after the
/// automatic reconnect the roster drives a full renegotiation.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abnormal_drop_renegotiates_after_reconnect() {
    harness::init_tracing();
    let relay = Relay::spawn().await;

    let broadcaster = Arc::new(EventRouter::new(
        config(&relay),
        LocalIdentity::broadcaster("b1", "42", "b1"),
    ));
    let viewer = Arc::new(EventRouter::new(
        config(&relay),
        LocalIdentity::viewer("v1", "42", "v1"),
    ));
    tokio::spawn(Arc::clone(&broadcaster).run());
    tokio::spawn(Arc::clone(&viewer).run());

    wait_signaling_connected(&broadcaster, "broadcaster to connect").await;
    wait_signaling_connected(&viewer, "viewer to connect").await;

    let source = StubSource::new();
    broadcaster.start_share(&source).await.unwrap();
    wait_session_state(
        &broadcaster,
        "v1",
        NegotiationState::Connected,
        "initial broadcaster-side handshake",
    )
    .await;
    wait_session_state(
        &viewer,
        "b1",
        NegotiationState::Connected,
        "initial viewer-side handshake",
    )
    .await;

    let first = viewer.sessions().get("b1").await.unwrap();

    // the relay drops the viewer's socket with no close frame
    relay.kill("v1").await;

    wait_sessions_empty(&viewer, "viewer teardown after the drop").await;

    // the viewer reconnects on its own; the fresh roster renegotiates both
    // sides from scratch, so no stale session survives the reconnect
    wait_session_state(
        &broadcaster,
        "v1",
        NegotiationState::Connected,
        "renegotiated broadcaster-side handshake",
    )
    .await;
    wait_session_state(
        &viewer,
        "b1",
        NegotiationState::Connected,
        "renegotiated viewer-side handshake",
    )
    .await;

    let second = viewer.sessions().get("b1").await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(viewer.sessions().len().await, 1);
    assert_eq!(broadcaster.sessions().len().await, 1);
}
