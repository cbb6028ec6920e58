//! End-to-end tests against a live rendezvous server on loopback

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use watchsync_core::{RoomId, SignalingMessage};
use watchsync_signaling::{ServerConfig, ServerHandle, SignalingServer};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,watchsync_signaling=debug")
        .with_test_writer()
        .try_init();
}

async fn start_server() -> ServerHandle {
    init_logging();
    SignalingServer::bind(ServerConfig::local())
        .await
        .unwrap()
        .start()
}

async fn connect(server: &ServerHandle) -> Client {
    let (ws, _) = connect_async(server.url()).await.unwrap();
    ws
}

async fn send_raw(ws: &mut Client, text: &str) {
    ws.send(Message::Text(text.to_string())).await.unwrap();
}

async fn send(ws: &mut Client, message: &SignalingMessage) {
    send_raw(ws, &message.to_json().unwrap()).await;
}

async fn recv_raw(ws: &mut Client) -> String {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return text;
        }
    }
}

async fn recv(ws: &mut Client) -> SignalingMessage {
    SignalingMessage::from_json(&recv_raw(ws).await).unwrap()
}

async fn assert_silent(ws: &mut Client) {
    let next = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(next.is_err(), "unexpected frame: {:?}", next);
}

fn room(id: &str) -> RoomId {
    RoomId::parse(id).unwrap()
}

fn error(text: &str) -> SignalingMessage {
    SignalingMessage::Error {
        error: text.to_string(),
    }
}

/// Host and guest connected to the same room, acks consumed
async fn paired(server: &ServerHandle, id: &str) -> (Client, Client) {
    let mut host = connect(server).await;
    send(&mut host, &SignalingMessage::CreateRoom { room_id: room(id) }).await;
    assert_eq!(recv(&mut host).await, SignalingMessage::RoomCreated { room_id: room(id) });

    let mut guest = connect(server).await;
    send(&mut guest, &SignalingMessage::JoinRoom { room_id: room(id) }).await;
    assert_eq!(recv(&mut guest).await, SignalingMessage::RoomJoined { room_id: room(id) });
    assert_eq!(recv(&mut host).await, SignalingMessage::GuestJoined);

    (host, guest)
}

#[tokio::test]
async fn test_create_and_duplicate_room() {
    let server = start_server().await;

    let mut host = connect(&server).await;
    send(&mut host, &SignalingMessage::CreateRoom { room_id: room("ABC234") }).await;
    assert_eq!(
        recv(&mut host).await,
        SignalingMessage::RoomCreated { room_id: room("ABC234") }
    );

    let mut other = connect(&server).await;
    send(&mut other, &SignalingMessage::CreateRoom { room_id: room("ABC234") }).await;
    assert_eq!(recv(&mut other).await, error("Room already exists"));
    assert_eq!(server.room_count(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_join_notifies_both_sides_and_rejects_third() {
    let server = start_server().await;
    let (_host, _guest) = paired(&server, "KQ7M2X").await;

    let mut third = connect(&server).await;
    send(&mut third, &SignalingMessage::JoinRoom { room_id: room("KQ7M2X") }).await;
    assert_eq!(recv(&mut third).await, error("Room is full"));

    send(&mut third, &SignalingMessage::JoinRoom { room_id: room("ZZZZZZ") }).await;
    assert_eq!(recv(&mut third).await, error("Room not found"));

    server.shutdown().await;
}

#[tokio::test]
async fn test_join_accepts_lowercase_code() {
    let server = start_server().await;

    let mut host = connect(&server).await;
    send(&mut host, &SignalingMessage::CreateRoom { room_id: room("HXST22") }).await;
    recv(&mut host).await;

    let mut guest = connect(&server).await;
    send_raw(&mut guest, r#"{"type":"join-room","roomId":" hxst22 "}"#).await;
    assert_eq!(
        recv(&mut guest).await,
        SignalingMessage::RoomJoined { room_id: room("HXST22") }
    );
    assert_eq!(recv(&mut host).await, SignalingMessage::GuestJoined);

    server.shutdown().await;
}

#[tokio::test]
async fn test_relay_is_verbatim_in_both_directions() {
    let server = start_server().await;
    let (mut host, mut guest) = paired(&server, "PL4N8R").await;

    // Unknown fields survive the trip untouched
    let offer = r#"{"type":"offer","roomId":"PL4N8R","offer":{"type":"offer","sdp":"v=0\r\n"},"note":"x"}"#;
    send_raw(&mut host, offer).await;
    assert_eq!(recv_raw(&mut guest).await, offer);

    let candidate = r#"{"type":"ice-candidate","roomId":"PL4N8R","candidate":{"candidate":"candidate:1 1 udp 1 127.0.0.1 5000 typ host","sdpMid":"0","sdpMLineIndex":0}}"#;
    send_raw(&mut guest, candidate).await;
    assert_eq!(recv_raw(&mut host).await, candidate);

    // Relay frames are never echoed back to the sender
    assert_silent(&mut host).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_relay_before_guest_is_dropped() {
    let server = start_server().await;

    let mut host = connect(&server).await;
    send(&mut host, &SignalingMessage::CreateRoom { room_id: room("DRQPPD") }).await;
    recv(&mut host).await;

    send_raw(&mut host, r#"{"type":"answer","roomId":"DRQPPD","answer":{"type":"answer","sdp":"v=0"}}"#).await;
    assert_silent(&mut host).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_invalid_frames_get_error_replies() {
    let server = start_server().await;
    let mut ws = connect(&server).await;

    send_raw(&mut ws, "not json at all").await;
    match recv(&mut ws).await {
        SignalingMessage::Error { error } => assert!(error.starts_with("Invalid message: ")),
        other => panic!("unexpected reply: {:?}", other),
    }

    send_raw(&mut ws, r#"{"type":"chat","text":"hi"}"#).await;
    assert_eq!(
        recv(&mut ws).await,
        error("Invalid message: unknown message type 'chat'")
    );

    send_raw(&mut ws, r#"{"type":"create-room","roomId":"bad"}"#).await;
    match recv(&mut ws).await {
        SignalingMessage::Error { error } => assert!(error.contains("room id must be 6 characters")),
        other => panic!("unexpected reply: {:?}", other),
    }
    assert_eq!(server.room_count(), 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_host_leaving_notifies_guest_and_deletes_room() {
    let server = start_server().await;
    let (host, mut guest) = paired(&server, "M3TRV9").await;

    drop(host);
    assert_eq!(recv(&mut guest).await, SignalingMessage::HostLeft);

    // The room is gone, so the code can be reused
    let mut again = connect(&server).await;
    send(&mut again, &SignalingMessage::CreateRoom { room_id: room("M3TRV9") }).await;
    assert_eq!(
        recv(&mut again).await,
        SignalingMessage::RoomCreated { room_id: room("M3TRV9") }
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_guest_leaving_frees_the_slot() {
    let server = start_server().await;
    let (mut host, guest) = paired(&server, "W8YUEN").await;

    drop(guest);
    assert_eq!(recv(&mut host).await, SignalingMessage::GuestLeft);

    let mut next_guest = connect(&server).await;
    send(&mut next_guest, &SignalingMessage::JoinRoom { room_id: room("W8YUEN") }).await;
    assert_eq!(
        recv(&mut next_guest).await,
        SignalingMessage::RoomJoined { room_id: room("W8YUEN") }
    );
    assert_eq!(recv(&mut host).await, SignalingMessage::GuestJoined);
    assert_eq!(server.room_count(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_ping_is_answered() {
    let server = start_server().await;
    let mut ws = connect(&server).await;

    ws.send(Message::Ping(vec![7, 7])).await.unwrap();
    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(frame, Message::Pong(vec![7, 7]));

    server.shutdown().await;
}
