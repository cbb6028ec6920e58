//! Wire messages exchanged with the rendezvous service and over the peer
//! data channel

use crate::action::{now_millis, PlaybackAction};
use crate::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Alphabet for room ids; omits look-alike characters (0/O, 1/I)
pub const ROOM_ID_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Number of characters in a room id
pub const ROOM_ID_LEN: usize = 6;

/// Short human-shareable room code
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Fresh random id. Collisions are left to the rendezvous service to reject.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let id = (0..ROOM_ID_LEN)
            .map(|_| ROOM_ID_ALPHABET[rng.gen_range(0..ROOM_ID_ALPHABET.len())] as char)
            .collect();
        RoomId(id)
    }

    /// Parse user input: surrounding whitespace is ignored and letters are
    /// uppercased before checking the format.
    pub fn parse(input: &str) -> Result<Self> {
        let id = input.trim().to_ascii_uppercase();
        if id.len() != ROOM_ID_LEN || !id.bytes().all(|b| ROOM_ID_ALPHABET.contains(&b)) {
            return Err(Error::InvalidMessage(format!(
                "room id must be {} characters from {}, got '{}'",
                ROOM_ID_LEN,
                String::from_utf8_lossy(ROOM_ID_ALPHABET),
                input.trim()
            )));
        }
        Ok(RoomId(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// SDP offer or answer in the browser's `{type, sdp}` shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: String,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: "offer".to_string(),
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: "answer".to_string(),
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate in the browser's `RTCIceCandidateInit` shape
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Messages on the signaling socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalingMessage {
    CreateRoom {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    RoomCreated {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    JoinRoom {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    RoomJoined {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    GuestJoined,
    HostLeft,
    GuestLeft,
    Offer {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        offer: SessionDescription,
    },
    Answer {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        answer: SessionDescription,
    },
    IceCandidate {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        candidate: IceCandidate,
    },
    Error {
        error: String,
    },
}

impl SignalingMessage {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::InvalidMessage(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Build an `error{error}` reply from a lifecycle error
    pub fn error(err: &Error) -> Self {
        SignalingMessage::Error {
            error: err.to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::CreateRoom { .. } => "create-room",
            SignalingMessage::RoomCreated { .. } => "room-created",
            SignalingMessage::JoinRoom { .. } => "join-room",
            SignalingMessage::RoomJoined { .. } => "room-joined",
            SignalingMessage::GuestJoined => "guest-joined",
            SignalingMessage::HostLeft => "host-left",
            SignalingMessage::GuestLeft => "guest-left",
            SignalingMessage::Offer { .. } => "offer",
            SignalingMessage::Answer { .. } => "answer",
            SignalingMessage::IceCandidate { .. } => "ice-candidate",
            SignalingMessage::Error { .. } => "error",
        }
    }
}

/// Payloads carried over the peer data channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PeerMessage {
    SyncAction {
        action: PlaybackAction,
        /// Send time (ms since epoch)
        timestamp: u64,
    },
}

impl PeerMessage {
    pub fn sync_action(action: PlaybackAction) -> Self {
        PeerMessage::SyncAction {
            action,
            timestamp: now_millis(),
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::InvalidMessage(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
