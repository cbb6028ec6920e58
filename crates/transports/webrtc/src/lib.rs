//! WebRTC peer link for WatchSync
//!
//! Implements [`watchsync_core::PeerLink`] with a WebSocket signaling
//! client, one `RTCPeerConnection` and a reliable `sync` data channel.
//!
//! ```text
//!  host                         rendezvous                       guest
//!   │── create-room{roomId} ──────▶│                               │
//!   │◀──────────── room-created ───│                               │
//!   │                              │◀────────── join-room{roomId} ─│
//!   │◀──────────── guest-joined ───│── room-joined ───────────────▶│
//!   │── offer ────────────────────▶│── offer ─────────────────────▶│
//!   │◀──────────────────── answer ─│◀─────────────────── answer ───│
//!   │◀─────────── ice-candidate ──▶│◀─────────── ice-candidate ───▶│
//!   │═════════════════ data channel "sync" (direct) ══════════════│
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use watchsync_core::{SyncConfig, SyncSessionRouter};
//! use watchsync_webrtc::{PeerLinkConfig, WebRtcLinkFactory};
//!
//! # tokio_test::block_on(async {
//! let factory = WebRtcLinkFactory::new(PeerLinkConfig::default()).unwrap();
//! let router = SyncSessionRouter::spawn(SyncConfig::default(), Arc::new(factory)).unwrap();
//! let players = router.list_players().await.unwrap();
//! println!("{} players registered", players.len());
//! # });
//! ```

#![warn(clippy::all)]

pub mod channels;
pub mod config;
pub mod error;
pub mod link;
pub mod peer;
pub mod signaling;

pub use config::{PeerLinkConfig, TurnServerConfig, DEFAULT_STUN_SERVERS, SYNC_CHANNEL_LABEL};
pub use error::{Error, Result};
pub use link::{PeerLinkManager, WebRtcLinkFactory};
