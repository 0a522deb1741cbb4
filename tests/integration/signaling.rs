//! Integration tests for two-peer room signaling over real WebSockets.
//!
//! Each test starts a server on `127.0.0.1:0`, connects `tokio-tungstenite`
//! clients to `/ws` and drives the join / relay / disconnect flow.
//!
//! Verification command: `cargo test --test signaling`

use std::sync::Arc;
use std::time::Duration;

use duet_proto::codec;
use duet_proto::message::{ClientMessage, Payload, PayloadField, RoomId, ServerMessage, SignalKind};
use duet_server::router::RoomState;
use duet_server::server::{ServerState, start_server_with_state};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::tungstenite;

// =============================================================================
// Type aliases and helpers
// =============================================================================

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// How long to wait for an expected message.
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait before concluding that nothing was sent.
const SILENCE: Duration = Duration::from_millis(200);

/// Starts a room-mode server on a random port, keeping a handle to its state.
async fn start() -> (std::net::SocketAddr, Arc<ServerState>) {
    let state = Arc::new(ServerState::new());
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start test server");
    (addr, state)
}

async fn connect(addr: std::net::SocketAddr) -> WsStream {
    let url = format!("ws://{addr}/ws");
    let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    ws
}

async fn send_raw(ws: &mut WsStream, text: &str) {
    ws.send(tungstenite::Message::text(text.to_string()))
        .await
        .unwrap();
}

async fn send(ws: &mut WsStream, msg: &ClientMessage) {
    send_raw(ws, &codec::encode_client(msg).unwrap()).await;
}

async fn join(ws: &mut WsStream, room: &str) {
    send(ws, &ClientMessage::Join { room: room.into() }).await;
}

/// Receives the next text unit as a raw string.
async fn recv_raw(ws: &mut WsStream) -> String {
    let msg = tokio::time::timeout(RECV_TIMEOUT, ws.next())
        .await
        .expect("timed out waiting for message")
        .expect("stream ended")
        .expect("websocket error");
    msg.to_text().unwrap().to_string()
}

async fn recv(ws: &mut WsStream) -> ServerMessage {
    codec::decode_server(&recv_raw(ws).await).unwrap()
}

/// Asserts that no data frame arrives within [`SILENCE`].
async fn assert_silent(ws: &mut WsStream) {
    if let Ok(Some(Ok(msg))) = tokio::time::timeout(SILENCE, ws.next()).await {
        panic!("expected no message, got {msg:?}");
    }
}

/// Polls `cond` until it holds; inbound units are processed asynchronously.
async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn ready(room: &str) -> ServerMessage {
    ServerMessage::Ready { room: room.into() }
}

/// Connects two clients and puts them both in `room`, consuming the
/// `ready` notifications.
async fn ready_pair(
    addr: std::net::SocketAddr,
    state: &ServerState,
    room: &str,
) -> (WsStream, WsStream) {
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    join(&mut a, room).await;
    let id = RoomId::from(room);
    wait_until(|| state.router.room_members(&id).len() == 1).await;
    join(&mut b, room).await;
    assert_eq!(recv(&mut a).await, ready(room));
    assert_eq!(recv(&mut b).await, ready(room));
    (a, b)
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn end_to_end_scenario() {
    let (addr, state) = start().await;
    let r1 = RoomId::from("r1");

    // A joins: Waiting, no notification.
    let mut a = connect(addr).await;
    join(&mut a, "r1").await;
    wait_until(|| state.router.room_state(&r1) == Some(RoomState::Waiting)).await;
    assert_silent(&mut a).await;

    // B joins: Ready, both notified.
    let mut b = connect(addr).await;
    join(&mut b, "r1").await;
    assert_eq!(recv(&mut a).await, ready("r1"));
    assert_eq!(recv(&mut b).await, ready("r1"));
    assert_eq!(state.router.room_state(&r1), Some(RoomState::Ready));

    // A offers: only B receives it.
    send_raw(&mut a, r#"{"type":"offer","sdp":"X"}"#).await;
    assert_eq!(recv_raw(&mut b).await, r#"{"type":"offer","sdp":"X"}"#);
    assert_silent(&mut a).await;

    // B disconnects: A is told.
    b.close(None).await.unwrap();
    assert_eq!(recv(&mut a).await, ServerMessage::PeerDisconnected);
    wait_until(|| state.router.room_members(&r1).len() == 1).await;

    // A disconnects: room deleted.
    a.close(None).await.unwrap();
    wait_until(|| state.router.room_state(&r1).is_none()).await;
    assert_eq!(state.router.room_count(), 0);

    // C joins: fresh Waiting room.
    let mut c = connect(addr).await;
    join(&mut c, "r1").await;
    wait_until(|| state.router.room_state(&r1) == Some(RoomState::Waiting)).await;
    assert_eq!(state.router.room_members(&r1).len(), 1);
    assert_silent(&mut c).await;
}

#[tokio::test]
async fn full_room_rejects_third_peer() {
    let (addr, state) = start().await;
    let (mut a, mut b) = ready_pair(addr, &state, "r1").await;

    let mut c = connect(addr).await;
    join(&mut c, "r1").await;
    assert_eq!(
        recv(&mut c).await,
        ServerMessage::RoomFull {
            room: RoomId::from("r1")
        }
    );

    assert_silent(&mut a).await;
    assert_silent(&mut b).await;
    assert_eq!(state.router.room_members(&RoomId::from("r1")).len(), 2);

    // The rejected connection stays usable.
    join(&mut c, "r2").await;
    wait_until(|| state.router.room_state(&RoomId::from("r2")) == Some(RoomState::Waiting))
        .await;
}

#[tokio::test]
async fn answer_and_candidates_flow_back() {
    let (addr, state) = start().await;
    let (mut a, mut b) = ready_pair(addr, &state, "r1").await;

    let answer = ClientMessage::Signal {
        kind: SignalKind::Answer,
        room: Some(RoomId::from("r1")),
        payload: Payload::new(PayloadField::Sdp, json!({"type": "answer", "sdp": "v=0"})),
    };
    send(&mut b, &answer).await;
    let candidate = ClientMessage::Signal {
        kind: SignalKind::IceCandidate,
        room: None,
        payload: Payload::new(
            PayloadField::Candidate,
            json!({"candidate": "candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host", "sdpMid": "0"}),
        ),
    };
    send(&mut b, &candidate).await;

    assert_eq!(
        recv(&mut a).await,
        ServerMessage::Signal {
            kind: SignalKind::Answer,
            payload: Payload::new(PayloadField::Sdp, json!({"type": "answer", "sdp": "v=0"})),
        }
    );
    let ServerMessage::Signal { kind, payload } = recv(&mut a).await else {
        panic!("expected relayed candidate");
    };
    assert_eq!(kind, SignalKind::IceCandidate);
    assert_eq!(payload.field, PayloadField::Candidate);
    assert_silent(&mut b).await;
}

#[tokio::test]
async fn relay_before_partner_is_dropped() {
    let (addr, state) = start().await;
    let mut a = connect(addr).await;
    join(&mut a, "solo").await;
    wait_until(|| state.router.room_state(&RoomId::from("solo")).is_some()).await;

    send_raw(&mut a, r#"{"type":"offer","payload":"early"}"#).await;
    assert_silent(&mut a).await;

    // Once a partner arrives only fresh messages flow.
    let mut b = connect(addr).await;
    join(&mut b, "solo").await;
    assert_eq!(recv(&mut a).await, ready("solo"));
    assert_eq!(recv(&mut b).await, ready("solo"));
    assert_silent(&mut b).await;
}

#[tokio::test]
async fn abrupt_disconnect_notifies_partner() {
    let (addr, state) = start().await;
    let (mut a, b) = ready_pair(addr, &state, "r1").await;

    // Dropping the stream closes the TCP connection without a close frame.
    drop(b);

    assert_eq!(recv(&mut a).await, ServerMessage::PeerDisconnected);
    wait_until(|| state.router.room_members(&RoomId::from("r1")).len() == 1).await;
    wait_until(|| state.registry().len() == 1).await;
}

#[tokio::test]
async fn malformed_messages_keep_connection_open() {
    let (addr, state) = start().await;
    let mut a = connect(addr).await;

    send_raw(&mut a, "not json").await;
    send_raw(&mut a, r#"{"type":"chat","room":"r1"}"#).await;
    send_raw(&mut a, r#"{"type":"join"}"#).await;
    send_raw(&mut a, r#"{"type":"offer"}"#).await;
    assert_silent(&mut a).await;

    join(&mut a, "r1").await;
    wait_until(|| state.router.room_state(&RoomId::from("r1")).is_some()).await;
    let mut b = connect(addr).await;
    join(&mut b, "r1").await;
    assert_eq!(recv(&mut a).await, ready("r1"));
}

#[tokio::test]
async fn binary_frames_are_accepted() {
    let (addr, state) = start().await;
    let mut a = connect(addr).await;

    a.send(tungstenite::Message::Binary(
        br#"{"type":"join","room":"bin"}"#.to_vec().into(),
    ))
    .await
    .unwrap();

    wait_until(|| state.router.room_state(&RoomId::from("bin")).is_some()).await;
}

#[tokio::test]
async fn rejoin_moves_peer_between_rooms() {
    let (addr, state) = start().await;
    let (mut a, mut b) = ready_pair(addr, &state, "r1").await;

    join(&mut a, "r2").await;

    assert_eq!(recv(&mut b).await, ServerMessage::PeerDisconnected);
    wait_until(|| state.router.room_state(&RoomId::from("r2")) == Some(RoomState::Waiting))
        .await;
    assert_eq!(state.router.room_members(&RoomId::from("r1")).len(), 1);
    assert_silent(&mut a).await;
}

#[tokio::test]
async fn rooms_are_independent() {
    let (addr, state) = start().await;
    let (mut a1, mut b1) = ready_pair(addr, &state, "left").await;
    let (mut a2, mut b2) = ready_pair(addr, &state, "right").await;

    send_raw(&mut a1, r#"{"type":"offer","sdp":"L"}"#).await;
    send_raw(&mut a2, r#"{"type":"offer","sdp":"R"}"#).await;

    assert_eq!(recv_raw(&mut b1).await, r#"{"type":"offer","sdp":"L"}"#);
    assert_eq!(recv_raw(&mut b2).await, r#"{"type":"offer","sdp":"R"}"#);
    assert_silent(&mut a1).await;
    assert_silent(&mut a2).await;
}

#[tokio::test]
async fn health_endpoint_answers_ok() {
    let (addr, _state) = start().await;

    let response = tokio::task::spawn_blocking(move || {
        use std::io::{Read, Write};
        let mut stream = std::net::TcpStream::connect(addr).unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    })
    .await
    .unwrap();

    assert!(response.starts_with("HTTP/1.1 200"), "got: {response}");
    assert!(response.ends_with("OK"), "got: {response}");
}
