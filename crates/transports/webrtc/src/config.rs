//! Configuration types for the WebRTC peer link

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Public Google STUN servers used when nothing else is configured
pub const DEFAULT_STUN_SERVERS: [&str; 3] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
];

/// Label of the data channel carrying sync actions
pub const SYNC_CHANNEL_LABEL: &str = "sync";

/// Main configuration for a peer link
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerLinkConfig {
    /// STUN server URLs (at least one required)
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Data channel label (default: "sync")
    pub channel_label: String,

    /// How long to wait for `room-created` / `room-joined` (default: 10s)
    pub signaling_timeout_ms: u64,

    /// Gather loopback candidates and disable mDNS. Lets two links in one
    /// process connect without a network, which is what tests need.
    pub include_loopback_candidates: bool,
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn:// or turns://)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

impl Default for PeerLinkConfig {
    fn default() -> Self {
        Self {
            stun_servers: DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
            turn_servers: Vec::new(),
            channel_label: SYNC_CHANNEL_LABEL.to_string(),
            signaling_timeout_ms: 10_000,
            include_loopback_candidates: false,
        }
    }
}

impl PeerLinkConfig {
    /// Configuration for links that only ever talk to each other on this host
    pub fn loopback() -> Self {
        Self {
            stun_servers: Vec::new(),
            include_loopback_candidates: true,
            ..Default::default()
        }
    }

    pub fn signaling_timeout(&self) -> Duration {
        Duration::from_millis(self.signaling_timeout_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.stun_servers.is_empty() && !self.include_loopback_candidates {
            return Err(Error::InvalidConfig(
                "At least one STUN server is required".to_string(),
            ));
        }

        for url in &self.stun_servers {
            if !url.starts_with("stun:") && !url.starts_with("stuns:") {
                return Err(Error::InvalidConfig(format!(
                    "Invalid STUN URL: {} (must start with stun: or stuns:)",
                    url
                )));
            }
        }

        for turn in &self.turn_servers {
            if !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:") {
                return Err(Error::InvalidConfig(format!(
                    "Invalid TURN URL: {} (must start with turn: or turns:)",
                    turn.url
                )));
            }
        }

        if self.channel_label.is_empty() {
            return Err(Error::InvalidConfig(
                "Data channel label must not be empty".to_string(),
            ));
        }

        if self.signaling_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "signaling_timeout_ms must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}
