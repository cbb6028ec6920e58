//! Peer link built from signaling, a peer connection and the sync channel

mod manager;

pub use manager::{PeerLinkManager, WebRtcLinkFactory};
