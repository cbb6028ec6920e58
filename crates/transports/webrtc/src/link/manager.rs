//! [`PeerLink`] over a WebRTC data channel
//!
//! The host generates the room id, opens signaling, builds its peer
//! connection with the `sync` data channel and registers the room. The
//! guest joins by id. Once the rendezvous service reports `guest-joined`
//! the host offers, the guest answers, and both trickle ICE candidates
//! through the same socket until the data channel opens.

use crate::channels::{ChannelEvent, SyncDataChannel};
use crate::config::PeerLinkConfig;
use crate::peer::{candidate_to_wire, PeerConnection};
use crate::signaling::{SignalingClient, SignalingEvent, SignalingSender};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use watchsync_core::link::{ConnectionState, LinkEvent, LinkEventSink, PeerLink, PeerLinkFactory};
use watchsync_core::signaling::{PeerMessage, RoomId, SignalingMessage};
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    /// Creates the room, the data channel and the offer
    Host,
    /// Joins by id and answers
    Guest,
}

impl Role {
    fn request(self, room_id: RoomId) -> SignalingMessage {
        match self {
            Role::Host => SignalingMessage::CreateRoom { room_id },
            Role::Guest => SignalingMessage::JoinRoom { room_id },
        }
    }

    fn is_ack(self, message: &SignalingMessage) -> bool {
        matches!(
            (self, message),
            (Role::Host, SignalingMessage::RoomCreated { .. })
                | (Role::Guest, SignalingMessage::RoomJoined { .. })
        )
    }
}

/// State shared with webrtc callbacks. Callbacks hold it weakly so a
/// dropped link does not stay alive through its own connection.
struct LinkShared {
    link_id: String,
    channel_label: String,
    events: LinkEventSink,
    state: Mutex<ConnectionState>,
    channel: Mutex<Option<Arc<SyncDataChannel>>>,
}

impl LinkShared {
    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Move to `next` if the state machine allows it, and report it
    fn transition(&self, next: ConnectionState) -> bool {
        let current = {
            let mut state = self.state.lock();
            let current = *state;
            if current == next || !current.can_transition_to(next) {
                return false;
            }
            *state = next;
            current
        };

        info!(link_id = %self.link_id, %current, %next, "Link state changed");
        self.events.emit(LinkEvent::StateChanged(next));
        true
    }

    fn install_channel(self: &Arc<Self>, channel: SyncDataChannel) {
        if channel.label() != self.channel_label {
            warn!(link_id = %self.link_id, label = channel.label(), "Ignoring unexpected data channel");
            return;
        }

        let weak = Arc::downgrade(self);
        channel.on_event(Arc::new(move |event| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            match event {
                ChannelEvent::Open => {
                    shared.transition(ConnectionState::Connected);
                }
                ChannelEvent::Closed => {
                    shared.transition(ConnectionState::Disconnected);
                }
                ChannelEvent::Message(message) => {
                    shared.events.emit(LinkEvent::PeerMessage(message));
                }
            }
        }));

        let open = channel.is_open();
        *self.channel.lock() = Some(Arc::new(channel));
        if open {
            self.transition(ConnectionState::Connected);
        }
    }

    /// Hook connection state, local candidates and remote data channels
    fn watch_peer(self: &Arc<Self>, peer: &PeerConnection, sender: SignalingSender, room_id: RoomId) {
        let weak = Arc::downgrade(self);
        peer.rtc()
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let weak = weak.clone();
                Box::pin(async move {
                    let Some(shared) = weak.upgrade() else {
                        return;
                    };
                    debug!(link_id = %shared.link_id, state = %s, "Peer connection state");
                    match s {
                        RTCPeerConnectionState::Connected => {
                            shared.transition(ConnectionState::Connected);
                        }
                        RTCPeerConnectionState::Disconnected
                        | RTCPeerConnectionState::Failed
                        | RTCPeerConnectionState::Closed => {
                            shared.transition(ConnectionState::Disconnected);
                        }
                        _ => {}
                    }
                })
            }));

        peer.rtc()
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let sender = sender.clone();
                let room_id = room_id.clone();
                Box::pin(async move {
                    // None marks the end of gathering
                    let Some(candidate) = candidate else {
                        return;
                    };
                    match candidate.to_json() {
                        Ok(init) => {
                            let message = SignalingMessage::IceCandidate {
                                room_id,
                                candidate: candidate_to_wire(init),
                            };
                            if let Err(e) = sender.send(&message) {
                                debug!("Dropping local ICE candidate: {}", e);
                            }
                        }
                        Err(e) => warn!("Failed to serialize ICE candidate: {}", e),
                    }
                })
            }));

        let weak = Arc::downgrade(self);
        peer.rtc()
            .on_data_channel(Box::new(move |rtc_channel: Arc<RTCDataChannel>| {
                let weak = weak.clone();
                Box::pin(async move {
                    let Some(shared) = weak.upgrade() else {
                        return;
                    };
                    info!(link_id = %shared.link_id, label = rtc_channel.label(), "Remote data channel announced");
                    shared.install_channel(SyncDataChannel::from_rtc_channel(rtc_channel));
                })
            }));
    }
}

/// Resources owned by one create/join attempt
struct LinkSession {
    signaling: SignalingClient,
    peer: Option<Arc<PeerConnection>>,
    event_loop: Option<JoinHandle<()>>,
}

impl Drop for LinkSession {
    fn drop(&mut self) {
        if let Some(task) = self.event_loop.take() {
            task.abort();
        }
    }
}

/// WebRTC implementation of [`PeerLink`]
pub struct PeerLinkManager {
    config: PeerLinkConfig,
    shared: Arc<LinkShared>,
    session: Mutex<Option<LinkSession>>,
}

impl PeerLinkManager {
    pub fn new(config: PeerLinkConfig, events: LinkEventSink) -> Self {
        let link_id = uuid::Uuid::new_v4().to_string();
        debug!(%link_id, "Created peer link");

        Self {
            shared: Arc::new(LinkShared {
                link_id,
                channel_label: config.channel_label.clone(),
                events,
                state: Mutex::new(ConnectionState::Disconnected),
                channel: Mutex::new(None),
            }),
            config,
            session: Mutex::new(None),
        }
    }

    pub fn link_id(&self) -> &str {
        &self.shared.link_id
    }

    /// Open signaling, build the peer connection and register in the room.
    /// Returns once the rendezvous service acknowledged the request.
    async fn open(&self, signaling_url: &str, room_id: &RoomId, role: Role) -> Result<()> {
        self.teardown().await;
        self.shared.transition(ConnectionState::Connecting);

        let timeout = self.config.signaling_timeout();
        let (signaling, mut events) = tokio::time::timeout(timeout, SignalingClient::connect(signaling_url))
            .await
            .map_err(|_| {
                Error::OperationTimeout(format!("connecting to {} took over {:?}", signaling_url, timeout))
            })??;
        let sender = signaling.sender();
        *self.session.lock() = Some(LinkSession {
            signaling,
            peer: None,
            event_loop: None,
        });

        let peer = Arc::new(PeerConnection::new(self.shared.link_id.clone(), &self.config).await?);
        if let Some(session) = self.session.lock().as_mut() {
            session.peer = Some(Arc::clone(&peer));
        }
        self.shared.watch_peer(&peer, sender.clone(), room_id.clone());

        // The offer only carries an application section if the channel exists first
        if role == Role::Host {
            let channel = SyncDataChannel::create(peer.rtc(), &self.config.channel_label).await?;
            self.shared.install_channel(channel);
        }

        sender.send(&role.request(room_id.clone()))?;
        wait_for_ack(&mut events, role, timeout).await?;

        let event_loop = tokio::spawn(run_signaling(
            Arc::clone(&self.shared),
            events,
            peer,
            sender,
            room_id.clone(),
            role,
        ));
        if let Some(session) = self.session.lock().as_mut() {
            session.event_loop = Some(event_loop);
        }
        Ok(())
    }

    /// Release data channel, peer connection and signaling socket, in
    /// that order
    async fn teardown(&self) {
        let session = self.session.lock().take();
        let channel = self.shared.channel.lock().take();

        if let Some(task) = session.as_ref().and_then(|s| s.event_loop.as_ref()) {
            task.abort();
        }
        if let Some(channel) = channel {
            if let Err(e) = channel.close().await {
                debug!("Closing data channel: {}", e);
            }
        }
        if let Some(session) = session {
            if let Some(peer) = &session.peer {
                if let Err(e) = peer.close().await {
                    debug!("Closing peer connection: {}", e);
                }
            }
            session.signaling.close();
        }

        self.shared.transition(ConnectionState::Disconnected);
    }
}

#[async_trait]
impl PeerLink for PeerLinkManager {
    #[instrument(skip_all, fields(link_id = %self.shared.link_id, url = signaling_url))]
    async fn create_room(&self, signaling_url: &str) -> watchsync_core::Result<RoomId> {
        let room_id = RoomId::generate();
        match self.open(signaling_url, &room_id, Role::Host).await {
            Ok(()) => {
                info!(%room_id, "Room registered");
                Ok(room_id)
            }
            Err(e) => {
                warn!("Create room failed: {}", e);
                self.teardown().await;
                Err(e.into())
            }
        }
    }

    #[instrument(skip_all, fields(link_id = %self.shared.link_id, room_id = %room_id, url = signaling_url))]
    async fn join_room(&self, room_id: &RoomId, signaling_url: &str) -> watchsync_core::Result<()> {
        match self.open(signaling_url, room_id, Role::Guest).await {
            Ok(()) => {
                info!("Joined room");
                Ok(())
            }
            Err(e) => {
                warn!("Join room failed: {}", e);
                self.teardown().await;
                Err(e.into())
            }
        }
    }

    async fn send_sync_message(&self, message: &PeerMessage) -> bool {
        let channel = self.shared.channel.lock().clone();
        match channel {
            Some(channel) if channel.is_open() => match channel.send(message).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(link_id = %self.shared.link_id, "Failed to send sync message: {}", e);
                    false
                }
            },
            _ => {
                debug!(link_id = %self.shared.link_id, "Data channel not ready");
                false
            }
        }
    }

    fn connection_state(&self) -> ConnectionState {
        self.shared.state()
    }

    async fn disconnect(&self) {
        debug!(link_id = %self.shared.link_id, "Disconnecting peer link");
        self.teardown().await;
    }
}

async fn wait_for_ack(
    events: &mut mpsc::UnboundedReceiver<SignalingEvent>,
    role: Role,
    timeout: Duration,
) -> Result<()> {
    let ack = async {
        while let Some(event) = events.recv().await {
            match event {
                SignalingEvent::Message(message) if role.is_ack(&message) => return Ok(()),
                SignalingEvent::Message(SignalingMessage::Error { error }) => {
                    return Err(Error::Rejected(error))
                }
                SignalingEvent::Message(other) => {
                    debug!(kind = other.kind(), "Ignoring message before acknowledgement")
                }
                SignalingEvent::Closed => break,
            }
        }
        Err(Error::SignalingError(
            "socket closed before acknowledgement".to_string(),
        ))
    };

    tokio::time::timeout(timeout, ack)
        .await
        .map_err(|_| Error::OperationTimeout(format!("no acknowledgement within {:?}", timeout)))?
}

/// Drive the offer/answer exchange after the room was acknowledged
async fn run_signaling(
    shared: Arc<LinkShared>,
    mut events: mpsc::UnboundedReceiver<SignalingEvent>,
    peer: Arc<PeerConnection>,
    sender: SignalingSender,
    room_id: RoomId,
    role: Role,
) {
    while let Some(event) = events.recv().await {
        let message = match event {
            SignalingEvent::Message(message) => message,
            SignalingEvent::Closed => {
                if shared.state() == ConnectionState::Connecting {
                    warn!(link_id = %shared.link_id, "Signaling closed before the peer link came up");
                    shared.transition(ConnectionState::Disconnected);
                } else {
                    debug!(link_id = %shared.link_id, "Signaling socket closed");
                }
                break;
            }
        };

        if let Err(e) = handle_signaling(&shared, &peer, &sender, &room_id, role, message).await {
            warn!(link_id = %shared.link_id, "Negotiation step failed: {}", e);
            // A bad candidate is survivable, a bad description is not
            if matches!(e, Error::SdpError(_)) {
                shared.transition(ConnectionState::Disconnected);
            }
        }
    }

    debug!(link_id = %shared.link_id, "Signaling loop terminated");
}

async fn handle_signaling(
    shared: &LinkShared,
    peer: &PeerConnection,
    sender: &SignalingSender,
    room_id: &RoomId,
    role: Role,
    message: SignalingMessage,
) -> Result<()> {
    match message {
        SignalingMessage::GuestJoined if role == Role::Host => {
            info!(link_id = %shared.link_id, "Guest joined, sending offer");
            let offer = peer.create_offer().await?;
            sender.send(&SignalingMessage::Offer {
                room_id: room_id.clone(),
                offer,
            })?;
        }
        SignalingMessage::Offer { offer, .. } if role == Role::Guest => {
            let answer = peer.accept_offer(&offer).await?;
            sender.send(&SignalingMessage::Answer {
                room_id: room_id.clone(),
                answer,
            })?;
        }
        SignalingMessage::Answer { answer, .. } if role == Role::Host => {
            peer.accept_answer(&answer).await?;
        }
        SignalingMessage::IceCandidate { candidate, .. } => {
            peer.add_ice_candidate(candidate).await?;
        }
        SignalingMessage::HostLeft | SignalingMessage::GuestLeft => {
            info!(link_id = %shared.link_id, "Peer left the room");
            shared.transition(ConnectionState::Disconnected);
        }
        SignalingMessage::Error { error } => {
            warn!(link_id = %shared.link_id, %error, "Signaling error");
            shared.transition(ConnectionState::Disconnected);
        }
        other => debug!(kind = other.kind(), ?role, "Ignoring signaling message"),
    }
    Ok(())
}

/// Builds a [`PeerLinkManager`] per session
#[derive(Debug, Clone)]
pub struct WebRtcLinkFactory {
    config: PeerLinkConfig,
}

impl WebRtcLinkFactory {
    pub fn new(config: PeerLinkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PeerLinkConfig {
        &self.config
    }
}

impl PeerLinkFactory for WebRtcLinkFactory {
    fn create_link(&self, events: LinkEventSink) -> Box<dyn PeerLink> {
        Box::new(PeerLinkManager::new(self.config.clone(), events))
    }
}
