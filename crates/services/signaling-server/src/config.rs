//! Rendezvous service configuration

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to (default: 0.0.0.0:8080)
    pub bind_addr: SocketAddr,

    /// Rooms older than this are swept (default: 1 hour)
    pub room_ttl_secs: u64,

    /// How often the sweep runs (default: 5 minutes)
    pub sweep_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            room_ttl_secs: 60 * 60,
            sweep_interval_secs: 5 * 60,
        }
    }
}

impl ServerConfig {
    /// Configuration for an ephemeral server on loopback
    pub fn local() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..Default::default()
        }
    }

    pub fn room_ttl(&self) -> Duration {
        Duration::from_secs(self.room_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.room_ttl_secs == 0 {
            return Err(Error::InvalidConfig("room_ttl_secs must be > 0".to_string()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(Error::InvalidConfig(
                "sweep_interval_secs must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
