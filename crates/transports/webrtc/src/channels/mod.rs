//! WebRTC data channel handling
//!
//! - [`SyncDataChannel`] - wrapper around the `sync` channel
//! - [`ChannelEvent`] - open/close/message notifications

mod data_channel;

pub use data_channel::{ChannelEvent, ChannelEventHandler, SyncDataChannel};
