//! WebRTC peer connection wrapper

use crate::config::PeerLinkConfig;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use watchsync_core::signaling::{IceCandidate, SessionDescription};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::ice::mdns::MulticastDnsMode;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

/// Remote candidates that arrived before the remote description
#[derive(Debug, Default)]
struct CandidateQueue {
    remote_description_set: bool,
    pending: Vec<RTCIceCandidateInit>,
}

/// WebRTC peer connection wrapper
///
/// Wraps an `RTCPeerConnection` for one side of a sync link. Remote ICE
/// candidates received before the remote description is applied are held
/// back and flushed in arrival order once it is.
pub struct PeerConnection {
    link_id: String,
    peer_connection: Arc<RTCPeerConnection>,
    candidates: Mutex<CandidateQueue>,
}

impl PeerConnection {
    /// Create a new peer connection
    #[instrument(skip(config), fields(link_id = %link_id))]
    pub async fn new(link_id: String, config: &PeerLinkConfig) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| Error::WebRtcError(format!("Failed to register interceptors: {}", e)))?;

        let mut setting_engine = SettingEngine::default();
        if config.include_loopback_candidates {
            setting_engine.set_include_loopback_candidate(true);
            setting_engine.set_ice_multicast_dns_mode(MulticastDnsMode::Disabled);
        }

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .with_setting_engine(setting_engine)
            .build();

        let ice_servers: Vec<RTCIceServer> = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(config.turn_servers.iter().map(|turn| RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }))
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
            Error::PeerConnectionError(format!("Failed to create peer connection: {}", e))
        })?);

        info!("Created peer connection");

        Ok(Self {
            link_id,
            peer_connection,
            candidates: Mutex::new(CandidateQueue::default()),
        })
    }

    /// The underlying connection, for registering handlers
    pub fn rtc(&self) -> &Arc<RTCPeerConnection> {
        &self.peer_connection
    }

    /// Create an SDP offer and apply it as the local description
    pub async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;

        self.peer_connection
            .set_local_description(offer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        let local_desc = self.peer_connection.local_description().await.ok_or_else(|| {
            Error::SdpError("No local description after setting offer".to_string())
        })?;

        debug!(link_id = %self.link_id, "Created SDP offer");
        Ok(SessionDescription::offer(local_desc.sdp))
    }

    /// Apply a remote offer and answer it
    pub async fn accept_offer(&self, offer: &SessionDescription) -> Result<SessionDescription> {
        let offer = RTCSessionDescription::offer(offer.sdp.clone())
            .map_err(|e| Error::SdpError(format!("Failed to parse offer: {}", e)))?;
        self.apply_remote_description(offer).await?;

        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;

        self.peer_connection
            .set_local_description(answer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        let local_desc = self.peer_connection.local_description().await.ok_or_else(|| {
            Error::SdpError("No local description after setting answer".to_string())
        })?;

        debug!(link_id = %self.link_id, "Created SDP answer");
        Ok(SessionDescription::answer(local_desc.sdp))
    }

    /// Apply the remote answer to our offer
    pub async fn accept_answer(&self, answer: &SessionDescription) -> Result<()> {
        let answer = RTCSessionDescription::answer(answer.sdp.clone())
            .map_err(|e| Error::SdpError(format!("Failed to parse answer: {}", e)))?;
        self.apply_remote_description(answer).await
    }

    async fn apply_remote_description(&self, description: RTCSessionDescription) -> Result<()> {
        self.peer_connection
            .set_remote_description(description)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))?;

        let pending = {
            let mut queue = self.candidates.lock();
            queue.remote_description_set = true;
            std::mem::take(&mut queue.pending)
        };

        if !pending.is_empty() {
            debug!(link_id = %self.link_id, count = pending.len(), "Flushing queued ICE candidates");
        }
        // Failed candidates are skipped; the description stays applied
        for candidate in pending {
            if let Err(e) = self.add_now(candidate).await {
                warn!(link_id = %self.link_id, "Skipping queued ICE candidate: {}", e);
            }
        }
        Ok(())
    }

    /// Add a remote ICE candidate, or queue it until the remote description
    /// is known. Returns true if it was applied immediately.
    pub async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<bool> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };

        {
            let mut queue = self.candidates.lock();
            if !queue.remote_description_set {
                queue.pending.push(init);
                debug!(link_id = %self.link_id, queued = queue.pending.len(), "Queued early ICE candidate");
                return Ok(false);
            }
        }

        self.add_now(init).await?;
        Ok(true)
    }

    async fn add_now(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        self.peer_connection
            .add_ice_candidate(candidate)
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    /// Number of remote candidates waiting for the remote description
    pub fn pending_candidates(&self) -> usize {
        self.candidates.lock().pending.len()
    }

    /// Close the connection
    pub async fn close(&self) -> Result<()> {
        info!(link_id = %self.link_id, "Closing peer connection");
        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::PeerConnectionError(format!("Failed to close connection: {}", e)))
    }
}

/// Convert a locally gathered candidate into its wire shape
pub fn candidate_to_wire(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}
