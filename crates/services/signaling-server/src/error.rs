//! Error types for the rendezvous service

/// Result type alias for the rendezvous service
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that stop the server or a single connection
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// WebSocket handshake or framing error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}

/// Why a relay frame could not be forwarded
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// No room is registered under the frame's room id
    #[error("room not found")]
    NoRoom,

    /// The sending connection is neither host nor guest of the room
    #[error("sender is not in room")]
    NotMember,
}
