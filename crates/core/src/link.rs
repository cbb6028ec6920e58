//! Peer link seam between the remote coordinator and a transport

use crate::signaling::{PeerMessage, RoomId};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Connectivity of a peer link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    /// `disconnected -> connecting -> connected`, and any state may drop to
    /// `disconnected`. Everything else is rejected.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting) | (Connecting, Connected) | (_, Disconnected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Something a link observed asynchronously
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    StateChanged(ConnectionState),
    PeerMessage(PeerMessage),
}

/// Where a link reports its events
#[derive(Debug, Clone)]
pub struct LinkEventSink {
    tx: mpsc::UnboundedSender<LinkEvent>,
}

impl LinkEventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: LinkEvent) {
        if self.tx.send(event).is_err() {
            debug!("Link event receiver dropped");
        }
    }
}

/// One direct peer link: signaling handshake plus a message channel.
///
/// `disconnect` must be idempotent and safe from any state.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Register as host under a freshly generated room id
    async fn create_room(&self, signaling_url: &str) -> Result<RoomId>;

    /// Register as guest in an existing room
    async fn join_room(&self, room_id: &RoomId, signaling_url: &str) -> Result<()>;

    /// Send without blocking or buffering; false if the channel is not open
    async fn send_sync_message(&self, message: &PeerMessage) -> bool;

    fn connection_state(&self) -> ConnectionState;

    async fn disconnect(&self);
}

/// Lets one link be shared between a handshake and whoever may cancel it
#[async_trait]
impl<L: PeerLink + ?Sized> PeerLink for Arc<L> {
    async fn create_room(&self, signaling_url: &str) -> Result<RoomId> {
        (**self).create_room(signaling_url).await
    }

    async fn join_room(&self, room_id: &RoomId, signaling_url: &str) -> Result<()> {
        (**self).join_room(room_id, signaling_url).await
    }

    async fn send_sync_message(&self, message: &PeerMessage) -> bool {
        (**self).send_sync_message(message).await
    }

    fn connection_state(&self) -> ConnectionState {
        (**self).connection_state()
    }

    async fn disconnect(&self) {
        (**self).disconnect().await
    }
}

/// Builds links for the session router
pub trait PeerLinkFactory: Send + Sync {
    fn create_link(&self, events: LinkEventSink) -> Box<dyn PeerLink>;
}
