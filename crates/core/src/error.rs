//! Error types for WatchSync core

use thiserror::Error;

use crate::player::PlayerId;

/// Result type alias for WatchSync core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wire text used by the rendezvous service for a duplicate room id
pub const ROOM_EXISTS_MESSAGE: &str = "Room already exists";
/// Wire text used by the rendezvous service for an unknown room id
pub const ROOM_NOT_FOUND_MESSAGE: &str = "Room not found";
/// Wire text used by the rendezvous service when a guest is already present
pub const ROOM_FULL_MESSAGE: &str = "Room is full";

/// Errors surfaced by session lifecycle operations (start, create, join)
#[derive(Debug, Error)]
pub enum Error {
    /// A room with this id is already registered
    #[error("Room already exists")]
    RoomExists,

    /// No room is registered under this id
    #[error("Room not found")]
    RoomNotFound,

    /// The room already has a guest
    #[error("Room is full")]
    RoomFull,

    /// Signaling transport could not be reached or failed mid-handshake
    #[error("Signaling unavailable: {0}")]
    SignalingUnavailable(String),

    /// Peer connection failed or closed before reaching connected
    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),

    /// A local or remote player could not be reached
    #[error("Peer unreachable: {0}")]
    PeerUnreachable(String),

    /// Malformed input
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Message channel to an actor is closed
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Map an `error{error}` signaling payload back onto the taxonomy.
    pub fn from_signaling_error(message: &str) -> Self {
        match message {
            ROOM_EXISTS_MESSAGE => Error::RoomExists,
            ROOM_NOT_FOUND_MESSAGE => Error::RoomNotFound,
            ROOM_FULL_MESSAGE => Error::RoomFull,
            other => Error::SignalingUnavailable(other.to_string()),
        }
    }

    /// Check if this error concerns room lifecycle (rejected by the rendezvous service)
    pub fn is_room_error(&self) -> bool {
        matches!(self, Error::RoomExists | Error::RoomNotFound | Error::RoomFull)
    }

    /// Check if retrying the same operation later could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SignalingUnavailable(_) | Error::NegotiationFailed(_) | Error::PeerUnreachable(_)
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}

/// Steady-state relay failure for a single playback action.
///
/// Returned by relay operations and logged by the caller. None of these abort
/// the session; the next periodic timesync recovers the lost state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeliveryError {
    /// No session is active
    #[error("no active session")]
    Inactive,

    /// Sender is not the primary participant of the local session
    #[error("{0} is not the primary player")]
    NotPrimary(PlayerId),

    /// Sender is not the local participant of the remote session
    #[error("{0} is not the local player of the remote session")]
    NotLocalPlayer(PlayerId),

    /// Peer link is not connected; the action is dropped
    #[error("peer link not connected")]
    NotConnected,

    /// Channel to the target closed
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// Target exists but did not accept the message
    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),

    /// Inbound payload could not be understood
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl DeliveryError {
    /// True for the routine "not for us" outcomes that only merit debug logging
    pub fn is_ignored(&self) -> bool {
        matches!(
            self,
            DeliveryError::Inactive
                | DeliveryError::NotPrimary(_)
                | DeliveryError::NotLocalPlayer(_)
                | DeliveryError::NotConnected
        )
    }
}

impl From<DeliveryError> for Error {
    fn from(err: DeliveryError) -> Self {
        match err {
            DeliveryError::ChannelClosed(msg) => Error::ChannelClosed(msg),
            DeliveryError::InvalidMessage(msg) => Error::InvalidMessage(msg),
            other => Error::PeerUnreachable(other.to_string()),
        }
    }
}
