//! End-to-end tests for the signaling relay over real websockets.
//!
//! Covers:
//! - Device registration and the `registered` notification
//! - Offer delivery to the device only
//! - Routing miss reporting when no device is registered
//! - Answer/candidate broadcast back to the viewer
//! - Registry cleanup on disconnect
//! - Binary and oversized frames closing the connection
//! - `/health` and CORS preflight over HTTP

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rovelink_common::{
    CandidateComponent, ErrorCode, IceCandidate, Role, SessionDescription, SignalMessage,
};
use rovelink_signal::{serve, Relay};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_relay() -> (SocketAddr, Relay) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind relay listener");
    let addr = listener.local_addr().expect("relay addr");
    let relay = Relay::new();
    tokio::spawn(serve(listener, relay.clone()));
    (addr, relay)
}

async fn connect(addr: SocketAddr, relay: &Relay) -> Ws {
    let expected = relay.connection_count().await + 1;
    let (ws, _) = connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("websocket connect");
    for _ in 0..200 {
        if relay.connection_count().await >= expected {
            return ws;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("relay never saw the connection");
}

async fn wait_for_device(relay: &Relay, registered: bool) {
    for _ in 0..200 {
        if relay.lookup(Role::Device).await.is_some() == registered {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("device registration never became {registered}");
}

async fn send(ws: &mut Ws, message: &SignalMessage) {
    ws.send(Message::Text(message.to_json().expect("encode")))
        .await
        .expect("send");
}

async fn recv(ws: &mut Ws) -> SignalMessage {
    loop {
        let frame = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for signaling message")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = frame {
            return SignalMessage::from_json(&text).expect("decode");
        }
    }
}

async fn assert_silent(ws: &mut Ws) {
    let result = timeout(Duration::from_millis(200), ws.next()).await;
    assert!(result.is_err(), "expected no message, got {result:?}");
}

fn candidate() -> SignalMessage {
    SignalMessage::Candidate(IceCandidate {
        component: CandidateComponent::Rtp,
        foundation: "4234997325".into(),
        priority: 2122260223,
        protocol: "udp".into(),
        ip: "192.168.1.50".into(),
        port: 54400,
        kind: "host".into(),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
    })
}

#[tokio::test]
async fn test_full_handshake_between_device_and_viewer() {
    let (addr, relay) = spawn_relay().await;
    let mut viewer = connect(addr, &relay).await;
    let mut device = connect(addr, &relay).await;

    send(&mut device, &SignalMessage::register(Role::Device)).await;
    assert_eq!(recv(&mut viewer).await, SignalMessage::registered(Role::Device));
    assert_silent(&mut device).await;

    let offer = SignalMessage::Offer(SessionDescription::offer("v=0 offer"));
    send(&mut viewer, &offer).await;
    assert_eq!(recv(&mut device).await, offer);

    let answer = SignalMessage::Answer(SessionDescription::answer("v=0 answer"));
    send(&mut device, &answer).await;
    assert_eq!(recv(&mut viewer).await, answer);

    send(&mut device, &candidate()).await;
    assert_eq!(recv(&mut viewer).await, candidate());
    send(&mut viewer, &candidate()).await;
    assert_eq!(recv(&mut device).await, candidate());
}

#[tokio::test]
async fn test_offer_without_device_reports_routing_miss() {
    let (addr, relay) = spawn_relay().await;
    let mut viewer = connect(addr, &relay).await;
    let mut bystander = connect(addr, &relay).await;

    send(
        &mut viewer,
        &SignalMessage::Offer(SessionDescription::offer("v=0")),
    )
    .await;

    match recv(&mut viewer).await {
        SignalMessage::Error(notice) => assert_eq!(notice.code, ErrorCode::RoutingMiss),
        other => panic!("expected routing miss, got {other:?}"),
    }
    assert_silent(&mut bystander).await;
}

#[tokio::test]
async fn test_offer_is_not_seen_by_other_viewers() {
    let (addr, relay) = spawn_relay().await;
    let mut device = connect(addr, &relay).await;
    let mut viewer = connect(addr, &relay).await;
    let mut other = connect(addr, &relay).await;

    send(&mut device, &SignalMessage::register(Role::Device)).await;
    recv(&mut viewer).await;
    recv(&mut other).await;

    let offer = SignalMessage::Offer(SessionDescription::offer("v=0"));
    send(&mut viewer, &offer).await;

    assert_eq!(recv(&mut device).await, offer);
    assert_silent(&mut other).await;
    assert_silent(&mut viewer).await;
}

#[tokio::test]
async fn test_device_disconnect_releases_registration() {
    let (addr, relay) = spawn_relay().await;
    let mut device = connect(addr, &relay).await;
    let mut viewer = connect(addr, &relay).await;

    send(&mut device, &SignalMessage::register(Role::Device)).await;
    recv(&mut viewer).await;
    assert!(relay.lookup(Role::Device).await.is_some());

    device.close(None).await.expect("close device");
    wait_for_device(&relay, false).await;

    send(
        &mut viewer,
        &SignalMessage::Offer(SessionDescription::offer("v=0")),
    )
    .await;
    match recv(&mut viewer).await {
        SignalMessage::Error(notice) => assert_eq!(notice.code, ErrorCode::RoutingMiss),
        other => panic!("expected routing miss, got {other:?}"),
    }
}

#[tokio::test]
async fn test_invalid_frame_gets_notice_and_connection_survives() {
    let (addr, relay) = spawn_relay().await;
    let mut viewer = connect(addr, &relay).await;

    viewer
        .send(Message::Text("{\"type\":\"bogus\"}".into()))
        .await
        .expect("send garbage");
    match recv(&mut viewer).await {
        SignalMessage::Error(notice) => assert_eq!(notice.code, ErrorCode::InvalidMessage),
        other => panic!("expected invalid message notice, got {other:?}"),
    }

    send(&mut viewer, &SignalMessage::registered(Role::Device)).await;
    match recv(&mut viewer).await {
        SignalMessage::Error(notice) => assert_eq!(notice.code, ErrorCode::Unsupported),
        other => panic!("expected unsupported notice, got {other:?}"),
    }
}

#[tokio::test]
async fn test_health_reports_registration() {
    let (addr, relay) = spawn_relay().await;
    let mut device = connect(addr, &relay).await;
    send(&mut device, &SignalMessage::register(Role::Device)).await;
    wait_for_device(&relay, true).await;

    let response = reqwest::get(format!("http://{addr}/health"))
        .await
        .expect("health request");
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let body: serde_json::Value = response.json().await.expect("health body");
    assert_eq!(body["device_registered"], serde_json::Value::Bool(true));
    assert_eq!(body["active_connections"], serde_json::json!(1));
}

#[tokio::test]
async fn test_cors_preflight_allows_any_origin() {
    let (addr, _relay) = spawn_relay().await;

    let response = reqwest::Client::new()
        .request(reqwest::Method::OPTIONS, format!("http://{addr}/ws"))
        .header("Origin", "http://viewer.example")
        .header("Access-Control-Request-Method", "GET")
        .send()
        .await
        .expect("preflight request");

    assert!(response.status().is_success());
    let allowed = response
        .headers()
        .get("access-control-allow-origin")
        .expect("allow-origin header");
    assert_eq!(allowed, "*");
}

/// Waits for the relay side to drop the socket: only non-text frames, then end or error.
async fn assert_closed(ws: &mut Ws) {
    loop {
        let frame = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for close");
        match frame {
            None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
            Some(Ok(Message::Text(text))) => panic!("unexpected message {text}"),
            Some(Ok(_)) => continue,
        }
    }
}

async fn wait_for_connections(relay: &Relay, expected: usize) {
    for _ in 0..200 {
        if relay.connection_count().await == expected {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("relay never reached {expected} connection(s)");
}

#[tokio::test]
async fn test_binary_frame_is_rejected_and_closes_connection() {
    let (addr, relay) = spawn_relay().await;
    let mut viewer = connect(addr, &relay).await;

    viewer
        .send(Message::Binary(vec![0x01, 0x02, 0x03]))
        .await
        .expect("send binary");

    match recv(&mut viewer).await {
        SignalMessage::Error(notice) => assert_eq!(notice.code, ErrorCode::Rejected),
        other => panic!("expected rejection notice, got {other:?}"),
    }
    assert_closed(&mut viewer).await;
    wait_for_connections(&relay, 0).await;
}

#[tokio::test]
async fn test_oversized_text_frame_closes_connection_without_routing() {
    let (addr, relay) = spawn_relay().await;
    let mut device = connect(addr, &relay).await;
    let mut viewer = connect(addr, &relay).await;

    send(&mut device, &SignalMessage::register(Role::Device)).await;
    recv(&mut viewer).await;

    let sdp = format!("v=0\r\n{}", "a".repeat(70_000));
    let offer = SignalMessage::Offer(SessionDescription::offer(sdp));
    let text = offer.to_json().expect("encode");
    assert!(text.len() > 64 * 1024);
    let _ = viewer.send(Message::Text(text)).await;

    assert_closed(&mut viewer).await;
    wait_for_connections(&relay, 1).await;
    assert_silent(&mut device).await;
    assert!(relay.lookup(Role::Device).await.is_some());
}

#[tokio::test]
async fn test_late_viewer_learns_about_registered_device() {
    let (addr, relay) = spawn_relay().await;
    let mut device = connect(addr, &relay).await;
    send(&mut device, &SignalMessage::register(Role::Device)).await;
    wait_for_device(&relay, true).await;

    let mut viewer = connect(addr, &relay).await;
    assert_eq!(recv(&mut viewer).await, SignalMessage::registered(Role::Device));
    assert_silent(&mut device).await;
}
