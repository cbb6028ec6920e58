//! Configuration types for playback synchronization

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Tunables shared by adapters, coordinators and the session router
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Interval between timesync heartbeats from the primary (default: 2000ms)
    pub timesync_interval_ms: u64,

    /// Position drift tolerated before a corrective seek (default: 0.5s, exclusive)
    pub drift_threshold_secs: f64,

    /// Rate difference tolerated before a corrective rate change (default: 0.01, exclusive)
    pub rate_threshold: f64,

    /// Trailing-edge debounce window for seeks (default: 300ms)
    pub seek_debounce_ms: u64,

    /// Poll interval while waiting for a remote link to connect (default: 1000ms)
    pub connection_poll_ms: u64,

    /// Time allowed for a remote link to reach connected (default: 30000ms)
    pub connection_timeout_ms: u64,

    /// Capacity of each player's command channel (default: 64)
    pub player_channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timesync_interval_ms: 2000,
            drift_threshold_secs: 0.5,
            rate_threshold: 0.01,
            seek_debounce_ms: 300,
            connection_poll_ms: 1000,
            connection_timeout_ms: 30_000,
            player_channel_capacity: 64,
        }
    }
}

impl SyncConfig {
    pub fn timesync_interval(&self) -> Duration {
        Duration::from_millis(self.timesync_interval_ms)
    }

    pub fn seek_debounce(&self) -> Duration {
        Duration::from_millis(self.seek_debounce_ms)
    }

    pub fn connection_poll(&self) -> Duration {
        Duration::from_millis(self.connection_poll_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.timesync_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "timesync_interval_ms must be greater than 0".to_string(),
            ));
        }
        if !(self.drift_threshold_secs.is_finite() && self.drift_threshold_secs >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "drift_threshold_secs must be a non-negative number, got {}",
                self.drift_threshold_secs
            )));
        }
        if !(self.rate_threshold.is_finite() && self.rate_threshold >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "rate_threshold must be a non-negative number, got {}",
                self.rate_threshold
            )));
        }
        if self.connection_poll_ms == 0 || self.connection_poll_ms > self.connection_timeout_ms {
            return Err(Error::InvalidConfig(format!(
                "connection_poll_ms must be in 1..={}, got {}",
                self.connection_timeout_ms, self.connection_poll_ms
            )));
        }
        if self.player_channel_capacity == 0 {
            return Err(Error::InvalidConfig(
                "player_channel_capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn is_loopback_host(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(d)) => d.eq_ignore_ascii_case("localhost"),
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

/// Normalize a user-supplied signaling endpoint.
///
/// `wss://` is kept. `ws://` is kept only for loopback hosts and upgraded to
/// `wss://` otherwise. `http(s)://` maps onto `ws(s)://` under the same rule,
/// and a bare `host[:port][/path]` gets a scheme. Anything else is rejected.
pub fn normalize_signaling_url(input: &str) -> Result<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidConfig("signaling URL is empty".to_string()));
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("ws://{}", trimmed)
    };

    let mut url = Url::parse(&with_scheme)
        .map_err(|e| Error::InvalidConfig(format!("invalid signaling URL '{}': {}", input, e)))?;

    if url.host().is_none() {
        return Err(Error::InvalidConfig(format!(
            "signaling URL '{}' has no host",
            input
        )));
    }

    let secure = match url.scheme() {
        "wss" | "https" => true,
        "ws" | "http" => false,
        other => {
            return Err(Error::InvalidConfig(format!(
                "unsupported signaling URL scheme '{}'",
                other
            )))
        }
    };

    let scheme = if secure || !is_loopback_host(&url) {
        "wss"
    } else {
        "ws"
    };

    // Url::set_scheme refuses special->non-special switches, so rebuild.
    if url.scheme() != scheme {
        let rest = &url.as_str()[url.scheme().len()..];
        url = Url::parse(&format!("{}{}", scheme, rest))
            .map_err(|e| Error::InvalidConfig(format!("invalid signaling URL '{}': {}", input, e)))?;
    }

    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timesync_interval(), Duration::from_millis(2000));
        assert_eq!(config.seek_debounce(), Duration::from_millis(300));
    }

    #[test]
    fn test_invalid_config() {
        let config = SyncConfig {
            timesync_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().is_config_error());

        let config = SyncConfig {
            connection_poll_ms: 60_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: SyncConfig = serde_json::from_str(r#"{"seek_debounce_ms": 150}"#).unwrap();
        assert_eq!(config.seek_debounce_ms, 150);
        assert_eq!(config.timesync_interval_ms, 2000);
    }

    #[test]
    fn test_secure_urls_kept() {
        assert_eq!(
            normalize_signaling_url("wss://sync.example.com/ws").unwrap(),
            "wss://sync.example.com/ws"
        );
        assert_eq!(
            normalize_signaling_url("https://sync.example.com").unwrap(),
            "wss://sync.example.com/"
        );
    }

    #[test]
    fn test_loopback_may_stay_plain() {
        assert_eq!(
            normalize_signaling_url("ws://localhost:8080").unwrap(),
            "ws://localhost:8080/"
        );
        assert_eq!(
            normalize_signaling_url("http://127.0.0.1:9000/ws").unwrap(),
            "ws://127.0.0.1:9000/ws"
        );
        assert_eq!(
            normalize_signaling_url("ws://[::1]:8080").unwrap(),
            "ws://[::1]:8080/"
        );
    }

    #[test]
    fn test_remote_plain_is_upgraded() {
        assert_eq!(
            normalize_signaling_url("ws://sync.example.com:8080").unwrap(),
            "wss://sync.example.com:8080/"
        );
        assert_eq!(
            normalize_signaling_url("sync.example.com").unwrap(),
            "wss://sync.example.com/"
        );
        assert_eq!(
            normalize_signaling_url(" localhost:8080 ").unwrap(),
            "ws://localhost:8080/"
        );
    }

    #[test]
    fn test_rejects_other_schemes() {
        assert!(normalize_signaling_url("ftp://example.com").is_err());
        assert!(normalize_signaling_url("").is_err());
        assert!(normalize_signaling_url("   ").is_err());
    }
}
