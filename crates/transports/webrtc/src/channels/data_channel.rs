//! Sync data channel wrapper
//!
//! Text frames carry JSON [`PeerMessage`]s. The channel is reliable and
//! ordered (webrtc defaults).

use crate::{Error, Result};
use std::sync::Arc;
use tracing::{debug, error, warn};
use watchsync_core::PeerMessage;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::RTCPeerConnection;

/// Something the channel observed
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Open,
    Closed,
    Message(PeerMessage),
}

/// Callback for channel events. Called from webrtc's internal tasks.
pub type ChannelEventHandler = Arc<dyn Fn(ChannelEvent) + Send + Sync>;

/// Data channel carrying sync actions between the two peers
pub struct SyncDataChannel {
    label: String,
    rtc_channel: Arc<RTCDataChannel>,
}

impl SyncDataChannel {
    /// Create the channel on the offering side
    pub async fn create(peer_connection: &RTCPeerConnection, label: &str) -> Result<Self> {
        let rtc_channel = peer_connection
            .create_data_channel(label, None)
            .await
            .map_err(|e| Error::DataChannelError(format!("Failed to create data channel: {}", e)))?;

        debug!("Created data channel '{}'", label);
        Ok(Self::from_rtc_channel(rtc_channel))
    }

    /// Wrap a channel announced by the remote peer
    pub fn from_rtc_channel(rtc_channel: Arc<RTCDataChannel>) -> Self {
        Self {
            label: rtc_channel.label().to_string(),
            rtc_channel,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_open(&self) -> bool {
        self.rtc_channel.ready_state() == RTCDataChannelState::Open
    }

    /// Route open/close/message notifications to `handler`. Frames that do
    /// not parse as a [`PeerMessage`] are logged and dropped.
    pub fn on_event(&self, handler: ChannelEventHandler) {
        let label = self.label.clone();
        let on_open = Arc::clone(&handler);
        self.rtc_channel.on_open(Box::new(move || {
            let handler = Arc::clone(&on_open);
            let label = label.clone();
            Box::pin(async move {
                debug!("Data channel '{}' opened", label);
                handler(ChannelEvent::Open);
            })
        }));

        let label = self.label.clone();
        let on_close = Arc::clone(&handler);
        self.rtc_channel.on_close(Box::new(move || {
            let handler = Arc::clone(&on_close);
            let label = label.clone();
            Box::pin(async move {
                debug!("Data channel '{}' closed", label);
                handler(ChannelEvent::Closed);
            })
        }));

        let label = self.label.clone();
        self.rtc_channel.on_error(Box::new(move |err| {
            let label = label.clone();
            Box::pin(async move {
                error!("Data channel '{}' error: {}", label, err);
            })
        }));

        self.rtc_channel.on_message(Box::new(move |msg: DataChannelMessage| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                match decode(&msg) {
                    Ok(message) => handler(ChannelEvent::Message(message)),
                    Err(e) => warn!("Dropping data channel frame: {}", e),
                }
            })
        }));
    }

    /// Send one message if the channel is open
    pub async fn send(&self, message: &PeerMessage) -> Result<()> {
        if !self.is_open() {
            return Err(Error::DataChannelError(format!(
                "Data channel is not open (state: {})",
                self.rtc_channel.ready_state()
            )));
        }

        let text = serde_json::to_string(message)?;
        self.rtc_channel
            .send_text(text)
            .await
            .map_err(|e| Error::DataChannelError(format!("Failed to send: {}", e)))?;
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        self.rtc_channel
            .close()
            .await
            .map_err(|e| Error::DataChannelError(format!("Failed to close: {}", e)))
    }
}

fn decode(msg: &DataChannelMessage) -> Result<PeerMessage> {
    if !msg.is_string {
        return Err(Error::DataChannelError("binary frame on sync channel".to_string()));
    }
    let text = std::str::from_utf8(&msg.data)
        .map_err(|e| Error::DataChannelError(format!("frame is not UTF-8: {}", e)))?;
    Ok(serde_json::from_str(text)?)
}
