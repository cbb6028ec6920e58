//! WebSocket signaling client for room rendezvous and SDP exchange

use crate::{Error, Result};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use watchsync_core::SignalingMessage;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// What the receiver task observed on the socket
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    Message(SignalingMessage),
    /// The socket closed or failed; no further events follow
    Closed,
}

/// Cloneable, non-blocking handle for outgoing signaling messages
#[derive(Debug, Clone)]
pub struct SignalingSender {
    tx: mpsc::UnboundedSender<Message>,
}

impl SignalingSender {
    /// Queue a message. Fails only once the socket is gone.
    pub fn send(&self, message: &SignalingMessage) -> Result<()> {
        let text = serde_json::to_string(message)?;
        debug!(kind = message.kind(), "Sending signaling message");
        self.tx
            .send(Message::Text(text))
            .map_err(|_| Error::SignalingError("signaling socket closed".to_string()))
    }
}

/// WebSocket signaling client speaking the rendezvous protocol
pub struct SignalingClient {
    url: String,
    sender: SignalingSender,

    receiver_task: JoinHandle<()>,
}

impl SignalingClient {
    /// Open the socket and start the writer and reader tasks. Inbound
    /// messages arrive on the returned channel, ending with
    /// [`SignalingEvent::Closed`].
    pub async fn connect(url: &str) -> Result<(Self, mpsc::UnboundedReceiver<SignalingEvent>)> {
        info!(%url, "Opening rendezvous socket");

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::WebSocketError(format!("cannot reach {}: {}", url, e)))?;

        debug!(%url, "Rendezvous socket open");

        let (write, read) = ws_stream.split();

        let (tx, rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::sender_task(write, rx));
        let receiver_task = tokio::spawn(Self::receiver_task(read, events_tx));

        Ok((
            Self {
                url: url.to_string(),
                sender: SignalingSender { tx },
                receiver_task,
            },
            events_rx,
        ))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn sender(&self) -> SignalingSender {
        self.sender.clone()
    }

    pub fn send(&self, message: &SignalingMessage) -> Result<()> {
        self.sender.send(message)
    }

    /// Close the socket. Safe to call more than once.
    pub fn close(&self) {
        if self.sender.tx.send(Message::Close(None)).is_err() {
            debug!("Signaling socket already closed");
        }
        self.receiver_task.abort();
    }

    /// Drain queued frames into the socket; stops after a close frame
    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = write.send(msg).await {
                error!("Rendezvous write failed: {}", e);
                break;
            }
            if closing {
                break;
            }
        }

        debug!("Rendezvous writer stopped");
    }

    /// Parse inbound frames into events; unparseable frames are skipped
    async fn receiver_task(
        mut read: futures::stream::SplitStream<WsStream>,
        events: mpsc::UnboundedSender<SignalingEvent>,
    ) {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => match SignalingMessage::from_json(&text) {
                    Ok(message) => {
                        debug!(kind = message.kind(), "Received signaling message");
                        if events.send(SignalingEvent::Message(message)).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Skipping unparseable signaling frame: {}", e),
                },
                Ok(Message::Close(_)) => {
                    info!("Rendezvous service closed the socket");
                    break;
                }
                Err(e) => {
                    warn!("Rendezvous socket error: {}", e);
                    break;
                }
                _ => {}
            }
        }

        let _ = events.send(SignalingEvent::Closed);
        debug!("Rendezvous reader stopped");
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.receiver_task.abort();
    }
}
