//! Peer connection management

mod connection;

pub use connection::{candidate_to_wire, PeerConnection};
