//! Error types for the WebRTC peer link

/// Result type alias using the peer link Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while negotiating or running a peer link
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `PeerLinkConfig` failed validation
    #[error("Invalid peer link configuration: {0}")]
    InvalidConfig(String),

    /// Rendezvous socket went away or never acknowledged
    #[error("Signaling failed: {0}")]
    SignalingError(String),

    /// The rendezvous service answered with `error{error}`
    #[error("Rejected by signaling server: {0}")]
    Rejected(String),

    /// Could not open or write the rendezvous WebSocket
    #[error("Signaling socket error: {0}")]
    WebSocketError(String),

    /// Connect or acknowledgement took longer than `signaling_timeout_ms`
    #[error("Timed out: {0}")]
    OperationTimeout(String),

    /// Building or closing the `RTCPeerConnection` failed
    #[error("Peer connection failed: {0}")]
    PeerConnectionError(String),

    /// A remote candidate was rejected
    #[error("Bad ICE candidate: {0}")]
    IceCandidateError(String),

    /// Offer or answer could not be created or applied
    #[error("SDP exchange failed: {0}")]
    SdpError(String),

    /// `sync` channel not open, or a send/close failed
    #[error("Sync channel error: {0}")]
    DataChannelError(String),

    /// Media engine or interceptor setup failed
    #[error("WebRTC stack error: {0}")]
    WebRtcError(String),

    /// Frame did not encode or decode as JSON
    #[error("JSON error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Reaching the rendezvous service again might succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SignalingError(_) | Error::OperationTimeout(_) | Error::WebSocketError(_)
        )
    }

    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }

    /// Check if this error came out of offer/answer/candidate exchange
    pub fn is_negotiation_error(&self) -> bool {
        matches!(
            self,
            Error::PeerConnectionError(_)
                | Error::IceCandidateError(_)
                | Error::SdpError(_)
                | Error::DataChannelError(_)
                | Error::WebRtcError(_)
        )
    }
}

impl From<Error> for watchsync_core::Error {
    fn from(err: Error) -> Self {
        use watchsync_core::Error as Core;

        match err {
            Error::InvalidConfig(msg) => Core::InvalidConfig(msg),
            Error::Rejected(msg) => Core::from_signaling_error(&msg),
            Error::SignalingError(_) | Error::WebSocketError(_) | Error::OperationTimeout(_) => {
                Core::SignalingUnavailable(err.to_string())
            }
            Error::SerializationError(e) => Core::Serialization(e),
            Error::Other(e) => Core::Other(e),
            other => Core::NegotiationFailed(other.to_string()),
        }
    }
}
