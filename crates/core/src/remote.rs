//! Remote sync coordinator: one local player paired with a player in
//! another process through a [`PeerLink`].

use crate::action::PlaybackAction;
use crate::error::DeliveryError;
use crate::link::{ConnectionState, PeerLink};
use crate::player::{PlayerCommand, PlayerId, PlayerRegistry};
use crate::signaling::{PeerMessage, RoomId};
use crate::Result;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSyncState {
    pub local: PlayerId,
    pub room_id: Option<RoomId>,
    pub is_host: bool,
    pub connection_state: ConnectionState,
    pub signaling_url: String,
}

pub struct RemoteSyncCoordinator {
    state: RemoteSyncState,
    link: Box<dyn PeerLink>,
}

impl std::fmt::Debug for RemoteSyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSyncCoordinator")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl RemoteSyncCoordinator {
    /// Host a new room. On failure the link is torn down before the error
    /// is returned.
    #[instrument(skip_all, fields(local = %local, url = signaling_url))]
    pub async fn create_room(
        local: PlayerId,
        signaling_url: &str,
        link: Box<dyn PeerLink>,
    ) -> Result<Self> {
        match link.create_room(signaling_url).await {
            Ok(room_id) => {
                info!(%room_id, "Room created, waiting for guest");
                Ok(Self {
                    state: RemoteSyncState {
                        local,
                        room_id: Some(room_id),
                        is_host: true,
                        connection_state: ConnectionState::Connecting,
                        signaling_url: signaling_url.to_string(),
                    },
                    link,
                })
            }
            Err(e) => {
                warn!("Create room failed: {}", e);
                link.disconnect().await;
                Err(e)
            }
        }
    }

    /// Join an existing room as guest, with the same rollback rule as
    /// [`Self::create_room`].
    #[instrument(skip_all, fields(local = %local, room_id = %room_id, url = signaling_url))]
    pub async fn join_room(
        local: PlayerId,
        room_id: RoomId,
        signaling_url: &str,
        link: Box<dyn PeerLink>,
    ) -> Result<Self> {
        match link.join_room(&room_id, signaling_url).await {
            Ok(()) => {
                info!("Joined room, negotiating peer link");
                Ok(Self {
                    state: RemoteSyncState {
                        local,
                        room_id: Some(room_id),
                        is_host: false,
                        connection_state: ConnectionState::Connecting,
                        signaling_url: signaling_url.to_string(),
                    },
                    link,
                })
            }
            Err(e) => {
                warn!("Join room failed: {}", e);
                link.disconnect().await;
                Err(e)
            }
        }
    }

    pub fn state(&self) -> &RemoteSyncState {
        &self.state
    }

    pub fn local(&self) -> PlayerId {
        self.state.local
    }

    pub fn is_host(&self) -> bool {
        self.state.is_host
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.connection_state
    }

    /// Send a local action to the peer. Actions produced while not
    /// connected are dropped.
    pub async fn relay_action(
        &self,
        sender: PlayerId,
        action: PlaybackAction,
    ) -> std::result::Result<(), DeliveryError> {
        if sender != self.state.local {
            return Err(DeliveryError::NotLocalPlayer(sender));
        }
        if self.state.connection_state != ConnectionState::Connected {
            return Err(DeliveryError::NotConnected);
        }

        let kind = action.kind();
        let seq = action.seq;
        if self.link.send_sync_message(&PeerMessage::sync_action(action)).await {
            debug!(kind, seq, "Sent action to peer");
            Ok(())
        } else {
            Err(DeliveryError::ChannelClosed("peer data channel".to_string()))
        }
    }

    /// Deliver a peer's action to the local player
    pub fn on_peer_message(
        &self,
        message: PeerMessage,
        players: &PlayerRegistry,
    ) -> std::result::Result<(), DeliveryError> {
        match message {
            PeerMessage::SyncAction { action, timestamp } => {
                debug!(kind = action.kind(), seq = action.seq, sent = timestamp, "Peer action");
                players.deliver(self.state.local, PlayerCommand::Apply(action.received_now()))
            }
        }
    }

    /// Apply a link state change; returns true if the state moved
    pub fn on_state_change(&mut self, next: ConnectionState) -> bool {
        let current = self.state.connection_state;
        if current == next {
            return false;
        }
        if !current.can_transition_to(next) {
            debug!(%current, %next, "Ignoring out-of-order link state");
            return false;
        }
        info!(%current, %next, "Peer link state changed");
        self.state.connection_state = next;
        true
    }

    /// Tear down the link
    pub async fn stop(mut self) -> RemoteSyncState {
        self.link.disconnect().await;
        self.state.connection_state = ConnectionState::Disconnected;
        info!(room_id = ?self.state.room_id, "Remote sync stopped");
        self.state
    }
}
