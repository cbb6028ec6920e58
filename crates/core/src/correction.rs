//! Drift correction: turns an inbound action plus the local player state
//! into the minimal set of player commands.

use crate::action::{PlaybackAction, PlaybackCommand};
use crate::config::SyncConfig;
use crate::player::PlayerState;

/// A single command to issue against the local player
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Correction {
    Play,
    Pause,
    SeekTo(f64),
    SetRate(f64),
}

/// Thresholds above which a correction is issued (both exclusive)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrectionThresholds {
    /// Seconds of position drift tolerated before seeking
    pub drift_seconds: f64,
    /// Rate difference tolerated before adjusting playback rate
    pub rate: f64,
}

impl Default for CorrectionThresholds {
    fn default() -> Self {
        Self {
            drift_seconds: 0.5,
            rate: 0.01,
        }
    }
}

impl From<&SyncConfig> for CorrectionThresholds {
    fn from(config: &SyncConfig) -> Self {
        Self {
            drift_seconds: config.drift_threshold_secs,
            rate: config.rate_threshold,
        }
    }
}

/// `|a - b| > threshold`; a difference exactly at the threshold is tolerated
pub fn exceeds(a: f64, b: f64, threshold: f64) -> bool {
    (a - b).abs() > threshold
}

/// Plan the commands needed to bring `state` in line with `action`.
pub fn plan(
    action: &PlaybackAction,
    state: &PlayerState,
    thresholds: &CorrectionThresholds,
) -> Vec<Correction> {
    let mut out = Vec::new();

    match action.command {
        PlaybackCommand::Play => {
            if state.paused {
                out.push(Correction::Play);
            }
        }
        PlaybackCommand::Pause => {
            if !state.paused {
                out.push(Correction::Pause);
            }
        }
        PlaybackCommand::Seek { .. } => {
            if let Some(target) = action.target_time() {
                if exceeds(state.current_time, target, thresholds.drift_seconds) {
                    out.push(Correction::SeekTo(target));
                }
            }
        }
        PlaybackCommand::RateChange { rate } => {
            if exceeds(state.rate, rate, thresholds.rate) {
                out.push(Correction::SetRate(rate));
            }
        }
        PlaybackCommand::TimeSync { paused, rate, .. } => {
            if let Some(target) = action.target_time() {
                if exceeds(state.current_time, target, thresholds.drift_seconds) {
                    out.push(Correction::SeekTo(target));
                }
            }
            if paused && !state.paused {
                out.push(Correction::Pause);
            } else if !paused && state.paused {
                out.push(Correction::Play);
            }
            if rate > 0.0 && exceeds(state.rate, rate, thresholds.rate) {
                out.push(Correction::SetRate(rate));
            }
        }
    }

    out
}
