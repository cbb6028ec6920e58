//! Room registry
//!
//! Each room holds one host and at most one guest. Every mutation, and the
//! notifications it triggers, happens under a single lock so concurrent
//! joins and leaves on the same room cannot interleave.

use crate::error::RelayError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use watchsync_core::{Error as SyncError, RoomId, SignalingMessage};

/// Server-assigned connection identifier
pub type ConnId = u64;

/// Outgoing text frames for one connection
pub type Outbox = mpsc::UnboundedSender<String>;

#[derive(Debug, Clone)]
struct Party {
    conn: ConnId,
    tx: Outbox,
}

impl Party {
    fn send(&self, message: &SignalingMessage) {
        match serde_json::to_string(message) {
            Ok(text) => self.send_text(text),
            Err(e) => warn!("Failed to serialize {}: {}", message.kind(), e),
        }
    }

    fn send_text(&self, text: String) {
        if self.tx.send(text).is_err() {
            debug!(conn = self.conn, "Connection already gone");
        }
    }
}

#[derive(Debug)]
struct Room {
    host: Party,
    guest: Option<Party>,
    created_at: Instant,
}

/// Which side of a room a connection is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Guest,
}

#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: Mutex<HashMap<RoomId, Room>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `conn` as host of a new room and acknowledge with
    /// `room-created`
    pub fn create(
        &self,
        room_id: RoomId,
        conn: ConnId,
        tx: Outbox,
        now: Instant,
    ) -> Result<(), SyncError> {
        let mut rooms = self.rooms.lock();
        if rooms.contains_key(&room_id) {
            return Err(SyncError::RoomExists);
        }

        let host = Party { conn, tx };
        host.send(&SignalingMessage::RoomCreated {
            room_id: room_id.clone(),
        });
        info!(%room_id, conn, "Room created");
        rooms.insert(
            room_id,
            Room {
                host,
                guest: None,
                created_at: now,
            },
        );
        Ok(())
    }

    /// Attach `conn` as guest; the joiner gets `room-joined`, then the host
    /// gets `guest-joined`
    pub fn join(&self, room_id: &RoomId, conn: ConnId, tx: Outbox) -> Result<(), SyncError> {
        let mut rooms = self.rooms.lock();
        let room = rooms.get_mut(room_id).ok_or(SyncError::RoomNotFound)?;
        if room.guest.is_some() {
            return Err(SyncError::RoomFull);
        }

        let guest = Party { conn, tx };
        guest.send(&SignalingMessage::RoomJoined {
            room_id: room_id.clone(),
        });
        room.host.send(&SignalingMessage::GuestJoined);
        room.guest = Some(guest);
        info!(%room_id, conn, "Guest joined room");
        Ok(())
    }

    /// Forward `text` unchanged to the other party of the room. Returns
    /// false if the other party is not there yet.
    pub fn relay(&self, room_id: &RoomId, from: ConnId, text: String) -> Result<bool, RelayError> {
        let rooms = self.rooms.lock();
        let room = rooms.get(room_id).ok_or(RelayError::NoRoom)?;

        let target = if room.host.conn == from {
            room.guest.as_ref()
        } else if room.guest.as_ref().is_some_and(|g| g.conn == from) {
            Some(&room.host)
        } else {
            return Err(RelayError::NotMember);
        };

        match target {
            Some(party) => {
                party.send_text(text);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove `conn` from the room. A departing host deletes the room and
    /// the guest gets `host-left`; a departing guest frees the slot and the
    /// host gets `guest-left`.
    pub fn leave(&self, room_id: &RoomId, conn: ConnId) -> Option<Role> {
        let mut rooms = self.rooms.lock();
        let room = rooms.get_mut(room_id)?;

        if room.host.conn == conn {
            if let Some(guest) = &room.guest {
                guest.send(&SignalingMessage::HostLeft);
            }
            rooms.remove(room_id);
            info!(%room_id, conn, "Host left, room deleted");
            Some(Role::Host)
        } else if room.guest.as_ref().is_some_and(|g| g.conn == conn) {
            room.host.send(&SignalingMessage::GuestLeft);
            room.guest = None;
            info!(%room_id, conn, "Guest left room");
            Some(Role::Guest)
        } else {
            None
        }
    }

    /// Drop rooms older than `ttl`. A room exactly `ttl` old survives.
    pub fn sweep(&self, now: Instant, ttl: Duration) -> Vec<RoomId> {
        let mut rooms = self.rooms.lock();
        let expired: Vec<RoomId> = rooms
            .iter()
            .filter(|(_, room)| now.saturating_duration_since(room.created_at) > ttl)
            .map(|(id, _)| id.clone())
            .collect();

        for room_id in &expired {
            rooms.remove(room_id);
            info!(%room_id, "Cleaned up old room");
        }
        expired
    }

    pub fn contains(&self, room_id: &RoomId) -> bool {
        self.rooms.lock().contains_key(room_id)
    }

    pub fn has_guest(&self, room_id: &RoomId) -> bool {
        self.rooms
            .lock()
            .get(room_id)
            .is_some_and(|room| room.guest.is_some())
    }

    pub fn len(&self) -> usize {
        self.rooms.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.lock().is_empty()
    }
}
