//! Playback synchronization core for WatchSync
//!
//! Keeps two independently running media players in lockstep. Play, pause,
//! seek and rate changes on a primary player are mirrored onto a secondary,
//! either inside one host process or across two processes joined by a peer
//! link.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  LocalPlayerControl (site integration)                   │
//! │  ↓ user events                  ↑ corrections            │
//! │  PlayerAdapter (sequencing, debounce, timesync, drift)   │
//! │  ↓ PlayerAction / ReportTime    ↑ PlayerCommand::Apply   │
//! │  SyncSessionRouter (single actor, one session at a time) │
//! │  ├─ LocalSyncCoordinator   (offset, same-process relay)  │
//! │  └─ RemoteSyncCoordinator  (relay over a PeerLink)       │
//! │        ↓                                                  │
//! │  PeerLink (implemented by watchsync-webrtc)              │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use watchsync_core::config::SyncConfig;
//!
//! let config = SyncConfig::default();
//! assert!(config.validate().is_ok());
//! assert_eq!(config.timesync_interval_ms, 2000);
//! ```

#![warn(clippy::all)]

pub mod action;
pub mod adapter;
pub mod config;
pub mod correction;
pub mod error;
pub mod link;
pub mod local;
pub mod player;
pub mod remote;
pub mod router;
pub mod signaling;

pub use action::{PlaybackAction, PlaybackCommand};
pub use adapter::{AdapterHandle, PlayerAdapter};
pub use config::SyncConfig;
pub use error::{DeliveryError, Error, Result};
pub use link::{ConnectionState, LinkEvent, LinkEventSink, PeerLink, PeerLinkFactory};
pub use player::{LocalPlayerControl, PlayerId, PlayerState, UserEvent, VideoInfo};
pub use router::{RouterHandle, SessionMode, SessionSnapshot, SyncSessionRouter};
pub use signaling::{PeerMessage, RoomId, SignalingMessage};
