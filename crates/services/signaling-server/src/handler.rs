//! WebSocket connection handler
//!
//! One task per client. Frames are routed by their `type`; relay frames
//! (`offer`, `answer`, `ice-candidate`) are forwarded as the original text.

use crate::rooms::{ConnId, RoomRegistry};
use crate::Result;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use watchsync_core::{Error as SyncError, RoomId, SignalingMessage};

/// Shared state across all connections
#[derive(Debug, Default)]
pub struct SharedState {
    pub rooms: RoomRegistry,
    next_conn: AtomicU64,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_conn_id(&self) -> ConnId {
        self.next_conn.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Just enough of a frame to route it
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "roomId", default)]
    room_id: Option<String>,
}

/// Per-connection view of room membership
struct Connection<'a> {
    id: ConnId,
    tx: &'a mpsc::UnboundedSender<String>,
    state: &'a SharedState,
    room: Option<RoomId>,
}

impl Connection<'_> {
    fn reply_error(&self, err: &SyncError) {
        match SignalingMessage::error(err).to_json() {
            Ok(text) => {
                let _ = self.tx.send(text);
            }
            Err(e) => error!("Failed to serialize error reply: {}", e),
        }
    }

    fn leave_current(&mut self) {
        if let Some(room_id) = self.room.take() {
            if let Some(role) = self.state.rooms.leave(&room_id, self.id) {
                debug!(conn = self.id, %room_id, ?role, "Left room");
            }
        }
    }

    fn handle_message(&mut self, text: &str) {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(conn = self.id, "Unparseable frame: {}", e);
                self.reply_error(&SyncError::InvalidMessage(e.to_string()));
                return;
            }
        };

        debug!(conn = self.id, kind = %envelope.kind, room_id = ?envelope.room_id, "Received");

        match envelope.kind.as_str() {
            kind @ ("create-room" | "join-room") => {
                let room_id = match parse_room(envelope.room_id.as_deref()) {
                    Ok(room_id) => room_id,
                    Err(e) => {
                        self.reply_error(&e);
                        return;
                    }
                };

                self.leave_current();
                let result = if kind == "create-room" {
                    self.state
                        .rooms
                        .create(room_id.clone(), self.id, self.tx.clone(), Instant::now())
                } else {
                    self.state.rooms.join(&room_id, self.id, self.tx.clone())
                };

                match result {
                    Ok(()) => self.room = Some(room_id),
                    Err(e) => {
                        info!(conn = self.id, %room_id, "{} rejected: {}", kind, e);
                        self.reply_error(&e);
                    }
                }
            }
            kind @ ("offer" | "answer" | "ice-candidate") => {
                let room_id = match parse_room(envelope.room_id.as_deref()) {
                    Ok(room_id) => room_id,
                    Err(e) => {
                        warn!(conn = self.id, "Cannot relay {}: {}", kind, e);
                        return;
                    }
                };
                match self.state.rooms.relay(&room_id, self.id, text.to_string()) {
                    Ok(true) => debug!(conn = self.id, %room_id, "Relayed {}", kind),
                    Ok(false) => debug!(conn = self.id, %room_id, "No peer to relay {} to", kind),
                    Err(e) => warn!(conn = self.id, %room_id, "Cannot relay {}: {}", kind, e),
                }
            }
            other => {
                warn!(conn = self.id, "Unknown message type: {}", other);
                self.reply_error(&SyncError::InvalidMessage(format!(
                    "unknown message type '{}'",
                    other
                )));
            }
        }
    }
}

fn parse_room(room_id: Option<&str>) -> std::result::Result<RoomId, SyncError> {
    match room_id {
        Some(room_id) => RoomId::parse(room_id),
        None => Err(SyncError::InvalidMessage("missing roomId".to_string())),
    }
}

/// Handle a single WebSocket connection until it closes or the server
/// shuts down
pub async fn handle_connection(
    stream: TcpStream,
    state: Arc<SharedState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = stream.peer_addr()?;
    let ws_stream = accept_async(stream).await?;
    let conn_id = state.next_conn_id();
    info!(conn = conn_id, "New WebSocket connection from: {}", addr);

    let (ws_tx, mut ws_rx) = ws_stream.split();

    // Channel for sending messages back to this connection
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // Task to forward messages from channel to WebSocket
    let ws_tx = Arc::new(Mutex::new(ws_tx));
    let ws_tx_clone = Arc::clone(&ws_tx);
    let forward_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let mut ws_tx = ws_tx_clone.lock().await;
            if let Err(e) = ws_tx.send(Message::Text(msg)).await {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }
        }
    });

    let mut connection = Connection {
        id: conn_id,
        tx: &tx,
        state: &state,
        room: None,
    };

    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            _ = shutdown.recv() => {
                debug!(conn = conn_id, "Server shutting down, closing connection");
                let _ = ws_tx.lock().await.send(Message::Close(None)).await;
                break;
            }
        };

        match msg {
            Some(Ok(Message::Text(text))) => connection.handle_message(&text),
            Some(Ok(Message::Close(_))) | None => {
                info!(conn = conn_id, "WebSocket connection closed by client: {}", addr);
                break;
            }
            Some(Ok(Message::Ping(data))) => {
                let mut ws_tx = ws_tx.lock().await;
                let _ = ws_tx.send(Message::Pong(data)).await;
            }
            Some(Err(e)) => {
                error!(conn = conn_id, "WebSocket error: {}", e);
                break;
            }
            Some(Ok(_)) => {}
        }
    }

    // Cleanup on disconnect
    connection.leave_current();
    forward_task.abort();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection<'a>(
        state: &'a SharedState,
        tx: &'a mpsc::UnboundedSender<String>,
    ) -> Connection<'a> {
        Connection {
            id: state.next_conn_id(),
            tx,
            state,
            room: None,
        }
    }

    fn reply(rx: &mut mpsc::UnboundedReceiver<String>) -> SignalingMessage {
        SignalingMessage::from_json(&rx.try_recv().unwrap()).unwrap()
    }

    #[test]
    fn test_malformed_and_unknown_frames_get_errors() {
        let state = SharedState::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut conn = connection(&state, &tx);

        conn.handle_message("{not json");
        match reply(&mut rx) {
            SignalingMessage::Error { error } => assert!(error.starts_with("Invalid message: ")),
            other => panic!("unexpected {:?}", other),
        }

        conn.handle_message(r#"{"type":"dance"}"#);
        assert_eq!(
            reply(&mut rx),
            SignalingMessage::Error {
                error: "Invalid message: unknown message type 'dance'".to_string()
            }
        );

        conn.handle_message(r#"{"type":"create-room"}"#);
        assert_eq!(
            reply(&mut rx),
            SignalingMessage::Error {
                error: "Invalid message: missing roomId".to_string()
            }
        );
    }

    #[test]
    fn test_second_create_leaves_first_room() {
        let state = SharedState::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut conn = connection(&state, &tx);

        conn.handle_message(r#"{"type":"create-room","roomId":"AAAAAA"}"#);
        assert_eq!(reply(&mut rx).kind(), "room-created");

        conn.handle_message(r#"{"type":"create-room","roomId":"BBBBBB"}"#);
        assert_eq!(reply(&mut rx).kind(), "room-created");

        assert!(!state.rooms.contains(&RoomId::parse("AAAAAA").unwrap()));
        assert!(state.rooms.contains(&RoomId::parse("BBBBBB").unwrap()));
        assert_eq!(conn.room, Some(RoomId::parse("BBBBBB").unwrap()));
    }

    #[test]
    fn test_relay_forwards_original_text() {
        let state = SharedState::new();
        let (host_tx, mut host_rx) = mpsc::unbounded_channel();
        let (guest_tx, mut guest_rx) = mpsc::unbounded_channel();
        let mut host = connection(&state, &host_tx);
        let mut guest = connection(&state, &guest_tx);

        host.handle_message(r#"{"type":"create-room","roomId":"ABC234"}"#);
        guest.handle_message(r#"{"type":"join-room","roomId":"abc234"}"#);
        reply(&mut host_rx);
        reply(&mut host_rx);
        reply(&mut guest_rx);

        let offer = r#"{"type":"offer","roomId":"ABC234","offer":{"type":"offer","sdp":"v=0"},"extra":1}"#;
        host.handle_message(offer);
        assert_eq!(guest_rx.try_recv().unwrap(), offer);
    }
}
