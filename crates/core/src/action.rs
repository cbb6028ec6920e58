//! Playback actions and their ordering rules
//!
//! A [`PlaybackAction`] is produced by the primary player's adapter and
//! consumed by the secondary. The JSON form matches what the browser-side
//! adapters exchange:
//!
//! ```json
//! {"type":"seek","primaryTime":20.0,"syncSeq":7,"sentAt":1700000000000,"timeOffset":2.5}
//! ```

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, saturating to zero on clock skew
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// What the primary player did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PlaybackCommand {
    Play,
    Pause,
    Seek {
        #[serde(rename = "primaryTime")]
        target_time: f64,
    },
    RateChange {
        rate: f64,
    },
    /// Periodic full-state heartbeat from the primary
    TimeSync {
        #[serde(rename = "primaryTime")]
        reference_time: f64,
        paused: bool,
        rate: f64,
    },
}

impl PlaybackCommand {
    /// Wire name of the command
    pub fn kind(&self) -> &'static str {
        match self {
            PlaybackCommand::Play => "play",
            PlaybackCommand::Pause => "pause",
            PlaybackCommand::Seek { .. } => "seek",
            PlaybackCommand::RateChange { .. } => "ratechange",
            PlaybackCommand::TimeSync { .. } => "timesync",
        }
    }
}

/// A sequenced, timestamped playback command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackAction {
    #[serde(flatten)]
    pub command: PlaybackCommand,

    /// Per-sender sequence number, strictly increasing while sync is enabled
    #[serde(rename = "syncSeq")]
    pub seq: u64,

    /// Origination time (ms since epoch)
    #[serde(rename = "sentAt")]
    pub sent_at: u64,

    /// Offset (secondary - primary) attached by a local relay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_offset: Option<f64>,

    /// Stamped by the relay when it accepted the action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<u64>,
}

impl PlaybackAction {
    pub fn new(command: PlaybackCommand, seq: u64) -> Self {
        Self {
            command,
            seq,
            sent_at: now_millis(),
            time_offset: None,
            received_at: None,
        }
    }

    /// Copy of this action carrying `offset`
    pub fn with_offset(mut self, offset: f64) -> Self {
        self.time_offset = Some(offset);
        self
    }

    /// Copy of this action stamped with the current receive time
    pub fn received_now(mut self) -> Self {
        self.received_at = Some(now_millis());
        self
    }

    pub fn kind(&self) -> &'static str {
        self.command.kind()
    }

    /// Absolute position on the receiver's timeline: `senderTime + offset`.
    ///
    /// Only seek and timesync carry a position. A missing offset counts as
    /// zero (remote sessions never attach one).
    pub fn target_time(&self) -> Option<f64> {
        let offset = self.time_offset.unwrap_or(0.0);
        match self.command {
            PlaybackCommand::Seek { target_time } => Some(target_time + offset),
            PlaybackCommand::TimeSync { reference_time, .. } => Some(reference_time + offset),
            _ => None,
        }
    }
}

/// Hands out sequence numbers for one sending adapter
#[derive(Debug, Default)]
pub struct ActionSequencer {
    last: u64,
}

impl ActionSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next sequence number, starting at 1
    pub fn next_seq(&mut self) -> u64 {
        self.last += 1;
        self.last
    }

    /// Wrap `command` with the next sequence number
    pub fn stamp(&mut self, command: PlaybackCommand) -> PlaybackAction {
        let seq = self.next_seq();
        PlaybackAction::new(command, seq)
    }

    pub fn reset(&mut self) {
        self.last = 0;
    }
}

/// Receiver-side filter: admits an action only if its sequence number is
/// strictly greater than the last one applied.
#[derive(Debug, Default)]
pub struct SequenceGate {
    last_applied: u64,
}

impl SequenceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true and records `seq` if it should be applied
    pub fn admit(&mut self, seq: u64) -> bool {
        if seq <= self.last_applied {
            return false;
        }
        self.last_applied = seq;
        true
    }

    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    pub fn reset(&mut self) {
        self.last_applied = 0;
    }
}

/// Trailing-edge debounce for scrubbing: only the last seek inside the
/// window is emitted.
#[derive(Debug)]
pub struct SeekDebouncer {
    window: Duration,
    pending: Option<(f64, Instant)>,
}

impl SeekDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
        }
    }

    /// Record a seek observed at `now`, restarting the window
    pub fn record(&mut self, target: f64, now: Instant) {
        self.pending = Some((target, now + self.window));
    }

    /// When the pending seek becomes due
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.map(|(_, due)| due)
    }

    /// Take the pending seek if its window has elapsed
    pub fn take_due(&mut self, now: Instant) -> Option<f64> {
        match self.pending {
            Some((target, due)) if now >= due => {
                self.pending = None;
                Some(target)
            }
            _ => None,
        }
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_seek_wire_format() {
        let action = PlaybackAction {
            command: PlaybackCommand::Seek { target_time: 20.0 },
            seq: 7,
            sent_at: 1_700_000_000_000,
            time_offset: Some(2.5),
            received_at: None,
        };

        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "seek",
                "primaryTime": 20.0,
                "syncSeq": 7,
                "sentAt": 1_700_000_000_000u64,
                "timeOffset": 2.5
            })
        );
    }

    #[test]
    fn test_parse_browser_timesync() {
        let raw = r#"{"type":"timesync","primaryTime":42.5,"paused":false,"rate":1.25,"syncSeq":3,"sentAt":1}"#;
        let action: PlaybackAction = serde_json::from_str(raw).unwrap();

        assert_eq!(
            action.command,
            PlaybackCommand::TimeSync {
                reference_time: 42.5,
                paused: false,
                rate: 1.25
            }
        );
        assert_eq!(action.seq, 3);
        assert_eq!(action.time_offset, None);
        assert_eq!(action.kind(), "timesync");
    }

    #[test]
    fn test_ratechange_name() {
        let action = PlaybackAction::new(PlaybackCommand::RateChange { rate: 2.0 }, 1);
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["type"], "ratechange");
        assert_eq!(value["rate"], 2.0);
    }

    #[test]
    fn test_target_time_applies_offset() {
        let seek = PlaybackAction::new(PlaybackCommand::Seek { target_time: 20.0 }, 1);
        assert_eq!(seek.target_time(), Some(20.0));
        assert_eq!(seek.with_offset(2.5).target_time(), Some(22.5));

        let play = PlaybackAction::new(PlaybackCommand::Play, 2).with_offset(2.5);
        assert_eq!(play.target_time(), None);
    }

    #[test]
    fn test_sequencer_starts_at_one_and_resets() {
        let mut seq = ActionSequencer::new();
        assert_eq!(seq.next_seq(), 1);
        assert_eq!(seq.stamp(PlaybackCommand::Pause).seq, 2);
        seq.reset();
        assert_eq!(seq.next_seq(), 1);
    }

    #[test]
    fn test_gate_drops_stale_and_duplicate() {
        let mut gate = SequenceGate::new();
        assert!(gate.admit(2));
        assert!(!gate.admit(1));
        assert!(!gate.admit(2));
        assert!(gate.admit(3));

        gate.reset();
        assert!(gate.admit(1));
    }

    #[test]
    fn test_gate_reverse_delivery_applies_highest_once() {
        let mut gate = SequenceGate::new();
        let applied: Vec<u64> = [5u64, 4].into_iter().filter(|s| gate.admit(*s)).collect();
        assert_eq!(applied, vec![5]);
        assert_eq!(gate.last_applied(), 5);
    }

    #[test]
    fn test_debouncer_keeps_last_seek() {
        let start = Instant::now();
        let mut debounce = SeekDebouncer::new(Duration::from_millis(300));

        debounce.record(10.0, start);
        debounce.record(11.0, start + Duration::from_millis(100));
        debounce.record(12.0, start + Duration::from_millis(200));

        assert_eq!(debounce.take_due(start + Duration::from_millis(450)), None);
        assert_eq!(
            debounce.take_due(start + Duration::from_millis(500)),
            Some(12.0)
        );
        assert!(!debounce.is_pending());
    }

    #[test]
    fn test_debouncer_cancel() {
        let start = Instant::now();
        let mut debounce = SeekDebouncer::new(Duration::from_millis(300));
        debounce.record(10.0, start);
        debounce.cancel();
        assert_eq!(debounce.deadline(), None);
        assert_eq!(debounce.take_due(start + Duration::from_secs(1)), None);
    }
}
