//! Sync session router
//!
//! A single actor per host process. Every inbound event (player
//! registration, player actions, time reports, control commands and peer
//! link events) goes through one queue, so the active session is never
//! mutated concurrently. At most one session, local or remote, exists at a
//! time; starting one tears down the other.

use crate::action::PlaybackAction;
use crate::config::{normalize_signaling_url, SyncConfig};
use crate::error::DeliveryError;
use crate::link::{ConnectionState, LinkEvent, LinkEventSink, PeerLink, PeerLinkFactory};
use crate::local::LocalSyncCoordinator;
use crate::player::{PlayerCommand, PlayerHandle, PlayerId, PlayerRegistry, VideoInfo};
use crate::remote::RemoteSyncCoordinator;
use crate::signaling::RoomId;
use crate::{Error, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const VIDEO_INFO_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    #[default]
    None,
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalSnapshot {
    pub primary: PlayerId,
    pub secondary: PlayerId,
    pub time_offset_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSnapshot {
    pub local: PlayerId,
    pub room_id: Option<RoomId>,
    pub is_host: bool,
    pub connection_state: ConnectionState,
}

/// Read-only view of the router, republished after every event
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub mode: SessionMode,
    pub local: Option<LocalSnapshot>,
    pub remote: Option<RemoteSnapshot>,
}

/// A create or join whose signaling handshake is still running
struct PendingRemote {
    local: PlayerId,
    room_id: Option<RoomId>,
    is_host: bool,
    /// Dropping this cancels the handshake task
    _cancel: oneshot::Sender<()>,
    /// Latest state the link reported before the handshake finished
    link_state: Option<ConnectionState>,
}

enum SyncSession {
    None,
    Local(LocalSyncCoordinator),
    Connecting(PendingRemote),
    Remote(RemoteSyncCoordinator),
}

impl SyncSession {
    fn involves(&self, player: PlayerId) -> bool {
        match self {
            SyncSession::None => false,
            SyncSession::Local(c) => c.involves(player),
            SyncSession::Connecting(p) => p.local == player,
            SyncSession::Remote(c) => c.local() == player,
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        match self {
            SyncSession::None => SessionSnapshot::default(),
            SyncSession::Local(c) => SessionSnapshot {
                mode: SessionMode::Local,
                local: c.state().map(|s| LocalSnapshot {
                    primary: s.primary,
                    secondary: s.secondary,
                    time_offset_secs: s.time_offset_secs,
                }),
                remote: None,
            },
            SyncSession::Connecting(p) => SessionSnapshot {
                mode: SessionMode::Remote,
                local: None,
                remote: Some(RemoteSnapshot {
                    local: p.local,
                    room_id: p.room_id.clone(),
                    is_host: p.is_host,
                    connection_state: ConnectionState::Connecting,
                }),
            },
            SyncSession::Remote(c) => {
                let s = c.state();
                SessionSnapshot {
                    mode: SessionMode::Remote,
                    local: None,
                    remote: Some(RemoteSnapshot {
                        local: s.local,
                        room_id: s.room_id.clone(),
                        is_host: s.is_host,
                        connection_state: s.connection_state,
                    }),
                }
            }
        }
    }
}

/// Where the outcome of a create or join handshake goes
#[derive(Debug)]
pub enum HandshakeReply {
    Create(oneshot::Sender<Result<RoomId>>),
    Join(oneshot::Sender<Result<()>>),
}

impl HandshakeReply {
    fn send(self, result: Result<RoomId>) {
        let delivered = match self {
            HandshakeReply::Create(tx) => tx.send(result).is_ok(),
            HandshakeReply::Join(tx) => tx.send(result.map(|_| ())).is_ok(),
        };
        if !delivered {
            debug!("Handshake caller went away");
        }
    }
}

/// Everything the router reacts to
#[derive(Debug)]
pub enum RouterEvent {
    RegisterPlayer(PlayerHandle),
    PlayerClosed(PlayerId),
    PlayerAction {
        sender: PlayerId,
        action: PlaybackAction,
    },
    ReportTime {
        sender: PlayerId,
        current_time: f64,
    },
    StartLocal {
        primary: PlayerId,
        secondary: PlayerId,
        reply: oneshot::Sender<Result<()>>,
    },
    CreateRoom {
        local: PlayerId,
        signaling_url: String,
        reply: oneshot::Sender<Result<RoomId>>,
    },
    JoinRoom {
        local: PlayerId,
        room_id: String,
        signaling_url: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Stop {
        reply: Option<oneshot::Sender<()>>,
    },
    ListPlayers(oneshot::Sender<Vec<PlayerId>>),
    VideoInfo {
        player: PlayerId,
        reply: oneshot::Sender<Result<VideoInfo>>,
    },
    /// Event from the link created under `generation`
    Link {
        generation: u64,
        event: LinkEvent,
    },
    /// A handshake started under `generation` finished
    HandshakeDone {
        generation: u64,
        outcome: Result<RemoteSyncCoordinator>,
        reply: HandshakeReply,
    },
}

/// Cloneable front door to the router actor
#[derive(Debug, Clone)]
pub struct RouterHandle {
    tx: mpsc::UnboundedSender<RouterEvent>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl RouterHandle {
    /// Handle over a bare event channel, with a snapshot that never changes
    pub(crate) fn from_sender(tx: mpsc::UnboundedSender<RouterEvent>) -> Self {
        let (_, snapshot) = watch::channel(SessionSnapshot::default());
        Self { tx, snapshot }
    }

    fn send(&self, event: RouterEvent) {
        if self.tx.send(event).is_err() {
            debug!("Session router stopped, dropping event");
        }
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> RouterEvent) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .map_err(|_| Error::ChannelClosed("session router".to_string()))?;
        rx.await
            .map_err(|_| Error::ChannelClosed("session router".to_string()))
    }

    pub fn register_player(&self, handle: PlayerHandle) {
        self.send(RouterEvent::RegisterPlayer(handle));
    }

    pub fn player_closed(&self, player: PlayerId) {
        self.send(RouterEvent::PlayerClosed(player));
    }

    pub fn player_action(&self, sender: PlayerId, action: PlaybackAction) {
        self.send(RouterEvent::PlayerAction { sender, action });
    }

    pub fn report_time(&self, sender: PlayerId, current_time: f64) {
        self.send(RouterEvent::ReportTime {
            sender,
            current_time,
        });
    }

    /// Pair two players in this process
    pub async fn start_local(&self, primary: PlayerId, secondary: PlayerId) -> Result<()> {
        self.request(|reply| RouterEvent::StartLocal {
            primary,
            secondary,
            reply,
        })
        .await?
    }

    /// Host a remote session; returns the room id to share with the guest
    pub async fn create_room(&self, local: PlayerId, signaling_url: &str) -> Result<RoomId> {
        self.request(|reply| RouterEvent::CreateRoom {
            local,
            signaling_url: signaling_url.to_string(),
            reply,
        })
        .await?
    }

    /// Join a remote session hosted elsewhere
    pub async fn join_room(&self, local: PlayerId, room_id: &str, signaling_url: &str) -> Result<()> {
        self.request(|reply| RouterEvent::JoinRoom {
            local,
            room_id: room_id.to_string(),
            signaling_url: signaling_url.to_string(),
            reply,
        })
        .await?
    }

    /// Stop whatever session is active. Safe to call at any time.
    pub async fn stop(&self) {
        if self
            .request(|reply| RouterEvent::Stop { reply: Some(reply) })
            .await
            .is_err()
        {
            debug!("Session router already stopped");
        }
    }

    pub async fn list_players(&self) -> Result<Vec<PlayerId>> {
        self.request(RouterEvent::ListPlayers).await
    }

    pub async fn video_info(&self, player: PlayerId) -> Result<VideoInfo> {
        self.request(|reply| RouterEvent::VideoInfo { player, reply })
            .await?
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Poll until the remote link is connected.
    ///
    /// On timeout, or if the link drops back to disconnected, the session is
    /// stopped and `NegotiationFailed` returned.
    pub async fn wait_for_connection(&self, timeout: Duration, poll: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut ticker = tokio::time::interval(poll);

        loop {
            ticker.tick().await;

            match self.snapshot().remote.map(|r| r.connection_state) {
                Some(ConnectionState::Connected) => return Ok(()),
                Some(ConnectionState::Connecting) => {}
                Some(ConnectionState::Disconnected) => {
                    self.stop().await;
                    return Err(Error::NegotiationFailed(
                        "peer link disconnected before connecting".to_string(),
                    ));
                }
                None => {
                    return Err(Error::NegotiationFailed(
                        "no remote session is active".to_string(),
                    ))
                }
            }

            if Instant::now() >= deadline {
                warn!(?timeout, "Peer link did not connect in time, tearing down");
                self.stop().await;
                return Err(Error::NegotiationFailed(format!(
                    "not connected after {:?}",
                    timeout
                )));
            }
        }
    }
}

pub struct SyncSessionRouter {
    config: SyncConfig,
    link_factory: Arc<dyn PeerLinkFactory>,
    players: PlayerRegistry,
    session: SyncSession,
    generation: u64,
    events: mpsc::WeakUnboundedSender<RouterEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl SyncSessionRouter {
    /// Start the router actor. It runs until every [`RouterHandle`] is dropped.
    pub fn spawn(config: SyncConfig, link_factory: Arc<dyn PeerLinkFactory>) -> Result<RouterHandle> {
        config.validate()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());

        let router = Self {
            config,
            link_factory,
            players: PlayerRegistry::new(),
            session: SyncSession::None,
            generation: 0,
            events: tx.downgrade(),
            snapshot: snapshot_tx,
        };
        tokio::spawn(router.run(rx));

        Ok(RouterHandle {
            tx,
            snapshot: snapshot_rx,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RouterEvent>) {
        info!("Session router started");

        while let Some(event) = rx.recv().await {
            self.handle(event).await;
            self.publish();
        }

        self.stop_session().await;
        info!("Session router stopped");
    }

    /// Republish the snapshot if the session changed
    fn publish(&self) {
        let snapshot = self.session.snapshot();
        self.snapshot.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    async fn handle(&mut self, event: RouterEvent) {
        match event {
            RouterEvent::RegisterPlayer(handle) => {
                debug!(player = %handle.id(), "Player registered");
                if self.players.register(handle).is_some() {
                    debug!("Replaced existing player handle");
                }
            }
            RouterEvent::PlayerClosed(player) => {
                self.players.remove(player);
                if self.session.involves(player) {
                    info!(%player, "Session participant closed, stopping session");
                    self.stop_session().await;
                }
            }
            RouterEvent::PlayerAction { sender, action } => {
                let (result, to_local_player) = match &mut self.session {
                    SyncSession::None => (Err(DeliveryError::Inactive), false),
                    SyncSession::Local(c) => (c.relay_action(sender, action, &self.players), true),
                    SyncSession::Connecting(_) => (Err(DeliveryError::NotConnected), false),
                    // A dead data channel is reported by the link as a state change.
                    SyncSession::Remote(c) => (c.relay_action(sender, action).await, false),
                };
                self.on_delivery(result, to_local_player, "relay").await;
            }
            RouterEvent::ReportTime {
                sender,
                current_time,
            } => match &mut self.session {
                SyncSession::Local(c) => {
                    c.report_time(sender, current_time);
                }
                _ => debug!(%sender, current_time, "Time report outside local session"),
            },
            RouterEvent::StartLocal {
                primary,
                secondary,
                reply,
            } => {
                let result = self.start_local(primary, secondary).await;
                self.publish();
                let _ = reply.send(result);
            }
            RouterEvent::CreateRoom {
                local,
                signaling_url,
                reply,
            } => {
                self.start_remote(local, None, &signaling_url, HandshakeReply::Create(reply))
                    .await;
            }
            RouterEvent::JoinRoom {
                local,
                room_id,
                signaling_url,
                reply,
            } => match RoomId::parse(&room_id) {
                Ok(room_id) => {
                    let reply = HandshakeReply::Join(reply);
                    self.start_remote(local, Some(room_id), &signaling_url, reply).await;
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            RouterEvent::Stop { reply } => {
                self.stop_session().await;
                self.publish();
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
            }
            RouterEvent::ListPlayers(reply) => {
                let _ = reply.send(self.players.live_ids());
            }
            RouterEvent::VideoInfo { player, reply } => match self.players.get(player).cloned() {
                Some(handle) => {
                    tokio::spawn(async move {
                        let _ = reply.send(handle.video_info(VIDEO_INFO_TIMEOUT).await);
                    });
                }
                None => {
                    let _ = reply.send(Err(Error::PeerUnreachable(format!(
                        "{} is not registered",
                        player
                    ))));
                }
            },
            RouterEvent::Link { generation, event } => {
                if generation != self.generation {
                    debug!(generation, current = self.generation, "Dropping event from stale link");
                    return;
                }
                match event {
                    LinkEvent::StateChanged(state) => match &mut self.session {
                        SyncSession::Remote(remote) => {
                            remote.on_state_change(state);
                        }
                        SyncSession::Connecting(pending) => pending.link_state = Some(state),
                        _ => debug!(%state, "Link state with no remote session"),
                    },
                    LinkEvent::PeerMessage(message) => {
                        let SyncSession::Remote(remote) = &self.session else {
                            debug!("Peer message before the session was ready");
                            return;
                        };
                        let result = remote.on_peer_message(message, &self.players);
                        self.on_delivery(result, true, "peer message").await;
                    }
                }
            }
            RouterEvent::HandshakeDone {
                generation,
                outcome,
                reply,
            } => self.finish_remote(generation, outcome, reply).await,
        }
    }

    /// Log a delivery outcome. A closed channel to a local participant means
    /// the participant is gone, which ends the session.
    async fn on_delivery(
        &mut self,
        result: std::result::Result<(), DeliveryError>,
        to_local_player: bool,
        what: &str,
    ) {
        match result {
            Ok(()) => {}
            Err(e) if e.is_ignored() => debug!("{} dropped: {}", what, e),
            Err(DeliveryError::ChannelClosed(target)) if to_local_player => {
                warn!(%target, "{} target closed, stopping session", what);
                self.stop_session().await;
            }
            Err(e) => warn!("{} failed: {}", what, e),
        }
    }

    async fn start_local(&mut self, primary: PlayerId, secondary: PlayerId) -> Result<()> {
        self.stop_session().await;

        let mut coordinator = LocalSyncCoordinator::new();
        coordinator.start(primary, secondary)?;

        let primary_ok = self.enable(primary, true);
        let secondary_ok = self.enable(secondary, false);
        if !primary_ok && !secondary_ok {
            return Err(Error::PeerUnreachable(format!(
                "neither {} nor {} could be reached",
                primary, secondary
            )));
        }

        self.session = SyncSession::Local(coordinator);
        Ok(())
    }

    /// Validate a create or join and run its handshake off the actor, so a
    /// `Stop` queued behind it can cancel it. The caller is answered from
    /// [`Self::finish_remote`], or right away if the request is invalid.
    async fn start_remote(
        &mut self,
        local: PlayerId,
        room_id: Option<RoomId>,
        signaling_url: &str,
        reply: HandshakeReply,
    ) {
        let checked = normalize_signaling_url(signaling_url)
            .and_then(|url| self.require_player(local).map(|()| url));
        let url = match checked {
            Ok(url) => url,
            Err(e) => {
                debug!(%local, "Rejecting remote session: {}", e);
                reply.send(Err(e));
                return;
            }
        };
        self.stop_session().await;

        let link: Arc<dyn PeerLink> = Arc::from(self.new_link());
        let generation = self.generation;
        let (cancel, cancelled) = oneshot::channel();
        self.session = SyncSession::Connecting(PendingRemote {
            local,
            room_id: room_id.clone(),
            is_host: room_id.is_none(),
            _cancel: cancel,
            link_state: None,
        });

        let events = self.events.clone();
        tokio::spawn(async move {
            let shared: Box<dyn PeerLink> = Box::new(Arc::clone(&link));
            let handshake = async move {
                match room_id {
                    None => RemoteSyncCoordinator::create_room(local, &url, shared).await,
                    Some(room_id) => RemoteSyncCoordinator::join_room(local, room_id, &url, shared).await,
                }
            };
            let outcome = tokio::select! {
                outcome = handshake => outcome,
                _ = cancelled => {
                    info!(generation, "Session stopped during handshake, dropping link");
                    link.disconnect().await;
                    Err(Error::NegotiationFailed("session stopped during handshake".to_string()))
                }
            };

            let done = RouterEvent::HandshakeDone {
                generation,
                outcome,
                reply,
            };
            let undelivered = match events.upgrade() {
                Some(tx) => tx.send(done).err().map(|e| e.0),
                None => Some(done),
            };
            if let Some(RouterEvent::HandshakeDone {
                outcome: Ok(remote), ..
            }) = undelivered
            {
                remote.stop().await;
            }
        });
    }

    /// Install a finished handshake, unless the session moved on meanwhile
    async fn finish_remote(
        &mut self,
        generation: u64,
        outcome: Result<RemoteSyncCoordinator>,
        reply: HandshakeReply,
    ) {
        let pending = match std::mem::replace(&mut self.session, SyncSession::None) {
            SyncSession::Connecting(pending) if generation == self.generation => pending,
            other => {
                self.session = other;
                debug!(generation, current = self.generation, "Dropping superseded handshake");
                if let Ok(remote) = outcome {
                    remote.stop().await;
                }
                reply.send(Err(Error::NegotiationFailed(
                    "session stopped during handshake".to_string(),
                )));
                return;
            }
        };

        let mut remote = match outcome {
            Ok(remote) => remote,
            Err(e) => {
                self.publish();
                reply.send(Err(e));
                return;
            }
        };
        let Some(room_id) = remote.state().room_id.clone() else {
            remote.stop().await;
            self.publish();
            reply.send(Err(Error::NegotiationFailed("link returned no room id".to_string())));
            return;
        };
        if let Some(state) = pending.link_state {
            remote.on_state_change(state);
        }

        // Host drives playback, guest follows
        self.enable(pending.local, remote.is_host());
        self.session = SyncSession::Remote(remote);
        self.publish();
        reply.send(Ok(room_id));
    }

    fn require_player(&self, player: PlayerId) -> Result<()> {
        match self.players.get(player) {
            Some(handle) if !handle.is_closed() => Ok(()),
            _ => Err(Error::PeerUnreachable(format!("{} is not registered", player))),
        }
    }

    /// Build a link whose events are tagged with a fresh generation
    fn new_link(&mut self) -> Box<dyn PeerLink> {
        self.generation += 1;
        let generation = self.generation;

        let (sink, mut link_rx) = LinkEventSink::channel();
        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some(event) = link_rx.recv().await {
                let Some(tx) = events.upgrade() else { break };
                if tx.send(RouterEvent::Link { generation, event }).is_err() {
                    break;
                }
            }
        });

        self.link_factory.create_link(sink)
    }

    fn enable(&self, player: PlayerId, is_primary: bool) -> bool {
        match self
            .players
            .deliver(player, PlayerCommand::EnableSync { is_primary })
        {
            Ok(()) => true,
            Err(e) => {
                warn!(%player, "Could not enable sync: {}", e);
                false
            }
        }
    }

    fn disable(&self, player: PlayerId) {
        if let Err(e) = self.players.deliver(player, PlayerCommand::DisableSync) {
            debug!(%player, "Could not disable sync: {}", e);
        }
    }

    async fn stop_session(&mut self) {
        match std::mem::replace(&mut self.session, SyncSession::None) {
            SyncSession::None => return,
            SyncSession::Local(mut local) => {
                if let Some(state) = local.stop() {
                    self.disable(state.primary);
                    self.disable(state.secondary);
                }
            }
            SyncSession::Connecting(pending) => {
                debug!(player = %pending.local, "Cancelling handshake");
            }
            SyncSession::Remote(remote) => {
                let player = remote.local();
                remote.stop().await;
                self.disable(player);
            }
        }
        self.generation += 1;
    }
}
