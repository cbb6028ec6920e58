//! WatchSync rendezvous service
//!
//! Pairs a host and a guest by a six-character room id and relays their
//! offer, answer and ICE candidate frames until the direct data channel
//! is up. The service never looks inside relayed payloads.
//!
//! ```no_run
//! use watchsync_signaling::{ServerConfig, SignalingServer};
//!
//! # tokio_test::block_on(async {
//! let server = SignalingServer::bind(ServerConfig::default()).await.unwrap();
//! let handle = server.start();
//! println!("listening on {}", handle.url());
//! handle.shutdown().await;
//! # });
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod handler;
pub mod rooms;
pub mod server;

pub use config::ServerConfig;
pub use error::{Error, RelayError, Result};
pub use rooms::RoomRegistry;
pub use server::{ServerHandle, SignalingServer};
