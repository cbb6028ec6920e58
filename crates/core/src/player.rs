//! Local player capability and the handles used to reach a player

use crate::action::PlaybackAction;
use crate::error::DeliveryError;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Opaque handle of a player-owning process (a browser tab)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "player-{}", self.0)
    }
}

/// Snapshot of a media element
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub current_time: f64,
    pub paused: bool,
    pub rate: f64,
}

/// What the player is showing
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfo {
    pub title: String,
    pub url: String,
    pub has_player: bool,
}

/// Direct control over one media element.
///
/// Implementations are site specific (they locate the element and drive it);
/// the adapter layered on top owns all sync protocol behavior.
#[async_trait]
pub trait LocalPlayerControl: Send + Sync + 'static {
    async fn play(&self) -> Result<()>;

    async fn pause(&self) -> Result<()>;

    async fn seek(&self, time: f64) -> Result<()>;

    async fn set_rate(&self, rate: f64) -> Result<()>;

    /// Current state, or `None` if no media element is available
    async fn state(&self) -> Option<PlayerState>;

    async fn video_info(&self) -> VideoInfo;
}

/// Something the user did on the player, reported by the site integration
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UserEvent {
    Played,
    Paused,
    Seeked(f64),
    RateChanged(f64),
}

/// Messages accepted by a player adapter
#[derive(Debug)]
pub enum PlayerCommand {
    EnableSync { is_primary: bool },
    DisableSync,
    Apply(PlaybackAction),
    GetVideoInfo(oneshot::Sender<VideoInfo>),
}

impl PlayerCommand {
    fn name(&self) -> &'static str {
        match self {
            PlayerCommand::EnableSync { .. } => "enable-sync",
            PlayerCommand::DisableSync => "disable-sync",
            PlayerCommand::Apply(_) => "apply",
            PlayerCommand::GetVideoInfo(_) => "get-video-info",
        }
    }
}

/// Sending side of a player adapter's command channel.
///
/// Liveness of the player is the liveness of this channel: delivery never
/// blocks and a closed channel surfaces as [`DeliveryError::ChannelClosed`].
#[derive(Debug, Clone)]
pub struct PlayerHandle {
    id: PlayerId,
    tx: mpsc::Sender<PlayerCommand>,
}

impl PlayerHandle {
    pub fn new(id: PlayerId, tx: mpsc::Sender<PlayerCommand>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> PlayerId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Fire-and-forget delivery
    pub fn deliver(&self, command: PlayerCommand) -> std::result::Result<(), DeliveryError> {
        let name = command.name();
        self.tx.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Closed(_) => DeliveryError::ChannelClosed(self.id.to_string()),
            mpsc::error::TrySendError::Full(_) => {
                DeliveryError::PeerUnreachable(format!("{} queue full, dropped {}", self.id, name))
            }
        })
    }

    /// Ask the player what it is showing
    pub async fn video_info(&self, timeout: Duration) -> Result<VideoInfo> {
        let (reply, rx) = oneshot::channel();
        self.deliver(PlayerCommand::GetVideoInfo(reply))?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(info)) => Ok(info),
            Ok(Err(_)) => Err(Error::ChannelClosed(self.id.to_string())),
            Err(_) => Err(Error::PeerUnreachable(format!(
                "{} did not answer within {:?}",
                self.id, timeout
            ))),
        }
    }
}

/// Players currently known to the router
#[derive(Debug, Default)]
pub struct PlayerRegistry {
    players: HashMap<PlayerId, PlayerHandle>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handle: PlayerHandle) -> Option<PlayerHandle> {
        self.players.insert(handle.id(), handle)
    }

    pub fn remove(&mut self, id: PlayerId) -> Option<PlayerHandle> {
        self.players.remove(&id)
    }

    pub fn get(&self, id: PlayerId) -> Option<&PlayerHandle> {
        self.players.get(&id)
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.players.contains_key(&id)
    }

    /// Sorted ids of players whose channel is still open
    pub fn live_ids(&self) -> Vec<PlayerId> {
        let mut ids: Vec<PlayerId> = self
            .players
            .values()
            .filter(|h| !h.is_closed())
            .map(|h| h.id())
            .collect();
        ids.sort();
        ids
    }

    /// Deliver to `id`, treating an unknown id as unreachable
    pub fn deliver(
        &self,
        id: PlayerId,
        command: PlayerCommand,
    ) -> std::result::Result<(), DeliveryError> {
        match self.players.get(&id) {
            Some(handle) => handle.deliver(command),
            None => Err(DeliveryError::PeerUnreachable(format!(
                "{} is not registered",
                id
            ))),
        }
    }
}
