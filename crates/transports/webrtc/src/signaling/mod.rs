//! Signaling for peer link negotiation
//!
//! The rendezvous service pairs a host and a guest by room id and relays
//! their SDP offer/answer and ICE candidates. See
//! [`watchsync_core::SignalingMessage`] for the wire format.

mod client;

pub use client::{SignalingClient, SignalingEvent, SignalingSender};
