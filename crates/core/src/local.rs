//! Local sync coordinator: two players in the same host process

use crate::action::PlaybackAction;
use crate::error::DeliveryError;
use crate::player::{PlayerCommand, PlayerId, PlayerRegistry};
use crate::{Error, Result};
use tracing::{debug, info};

/// Session state while a local pair is active
#[derive(Debug, Clone, PartialEq)]
pub struct LocalSyncState {
    pub primary: PlayerId,
    pub secondary: PlayerId,
    /// `secondary - primary` at the last paired sample
    pub time_offset_secs: f64,
    pub last_action: Option<PlaybackAction>,
    pub pending_primary_time: Option<f64>,
    pub pending_secondary_time: Option<f64>,
}

#[derive(Debug, Default)]
pub struct LocalSyncCoordinator {
    state: Option<LocalSyncState>,
}

impl LocalSyncCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Activate the pair with a cleared offset
    pub fn start(&mut self, primary: PlayerId, secondary: PlayerId) -> Result<()> {
        if primary == secondary {
            return Err(Error::InvalidConfig(format!(
                "{} cannot be both primary and secondary",
                primary
            )));
        }

        info!(%primary, %secondary, "Local sync started");
        self.state = Some(LocalSyncState {
            primary,
            secondary,
            time_offset_secs: 0.0,
            last_action: None,
            pending_primary_time: None,
            pending_secondary_time: None,
        });
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    pub fn state(&self) -> Option<&LocalSyncState> {
        self.state.as_ref()
    }

    pub fn time_offset(&self) -> Option<f64> {
        self.state.as_ref().map(|s| s.time_offset_secs)
    }

    pub fn involves(&self, player: PlayerId) -> bool {
        self.state
            .as_ref()
            .is_some_and(|s| s.primary == player || s.secondary == player)
    }

    /// Store a time sample. Once both sides have reported, the offset is
    /// recomputed from that pair and both slots are cleared.
    ///
    /// Returns the new offset when a pair completes.
    pub fn report_time(&mut self, sender: PlayerId, current_time: f64) -> Option<f64> {
        let state = self.state.as_mut()?;

        if sender == state.primary {
            state.pending_primary_time = Some(current_time);
        } else if sender == state.secondary {
            state.pending_secondary_time = Some(current_time);
        } else {
            debug!(%sender, "Ignoring time report from non-participant");
            return None;
        }

        let (Some(primary), Some(secondary)) =
            (state.pending_primary_time, state.pending_secondary_time)
        else {
            return None;
        };

        let offset = secondary - primary;
        state.time_offset_secs = offset;
        state.pending_primary_time = None;
        state.pending_secondary_time = None;

        let direction = if offset >= 0.0 { "ahead" } else { "behind" };
        info!(
            offset_secs = offset,
            "Secondary is {:.2}s {} primary",
            offset.abs(),
            direction
        );
        Some(offset)
    }

    /// Forward an action from the primary to the secondary, carrying the
    /// current offset.
    pub fn relay_action(
        &mut self,
        sender: PlayerId,
        action: PlaybackAction,
        players: &PlayerRegistry,
    ) -> std::result::Result<(), DeliveryError> {
        let state = self.state.as_mut().ok_or(DeliveryError::Inactive)?;
        if sender != state.primary {
            return Err(DeliveryError::NotPrimary(sender));
        }

        let action = action.received_now();
        state.last_action = Some(action.clone());

        let forwarded = action.with_offset(state.time_offset_secs);
        debug!(
            kind = forwarded.kind(),
            seq = forwarded.seq,
            offset = state.time_offset_secs,
            to = %state.secondary,
            "Relaying local action"
        );
        players.deliver(state.secondary, PlayerCommand::Apply(forwarded))
    }

    /// Clear all state
    pub fn stop(&mut self) -> Option<LocalSyncState> {
        if self.state.is_some() {
            info!("Local sync stopped");
        }
        self.state.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::PlaybackCommand;
    use crate::player::PlayerHandle;
    use tokio::sync::mpsc;

    const PRIMARY: PlayerId = PlayerId(1);
    const SECONDARY: PlayerId = PlayerId(2);

    fn registry() -> (PlayerRegistry, mpsc::Receiver<PlayerCommand>) {
        let (tx, rx) = mpsc::channel(8);
        let mut registry = PlayerRegistry::new();
        registry.register(PlayerHandle::new(SECONDARY, tx));
        (registry, rx)
    }

    #[test]
    fn test_offset_from_paired_samples() {
        let mut local = LocalSyncCoordinator::new();
        local.start(PRIMARY, SECONDARY).unwrap();

        assert_eq!(local.report_time(PRIMARY, 10.0), None);
        assert_eq!(local.report_time(SECONDARY, 12.5), Some(2.5));
        assert_eq!(local.time_offset(), Some(2.5));

        let state = local.state().unwrap();
        assert!(state.pending_primary_time.is_none());
        assert!(state.pending_secondary_time.is_none());
    }

    #[test]
    fn test_offset_recomputed_not_accumulated() {
        let mut local = LocalSyncCoordinator::new();
        local.start(PRIMARY, SECONDARY).unwrap();

        local.report_time(PRIMARY, 10.0);
        local.report_time(SECONDARY, 12.5);
        local.report_time(SECONDARY, 30.0);
        assert_eq!(local.report_time(PRIMARY, 31.0), Some(-1.0));
        assert_eq!(local.time_offset(), Some(-1.0));
    }

    #[test]
    fn test_non_participant_time_ignored() {
        let mut local = LocalSyncCoordinator::new();
        assert_eq!(local.report_time(PRIMARY, 1.0), None);

        local.start(PRIMARY, SECONDARY).unwrap();
        assert_eq!(local.report_time(PlayerId(9), 1.0), None);
        assert!(local.state().unwrap().pending_primary_time.is_none());
    }

    #[test]
    fn test_seek_relayed_with_offset() {
        let (players, mut rx) = registry();
        let mut local = LocalSyncCoordinator::new();
        local.start(PRIMARY, SECONDARY).unwrap();
        local.report_time(PRIMARY, 10.0);
        local.report_time(SECONDARY, 12.5);

        let seek = PlaybackAction::new(PlaybackCommand::Seek { target_time: 20.0 }, 1);
        local.relay_action(PRIMARY, seek, &players).unwrap();

        match rx.try_recv() {
            Ok(PlayerCommand::Apply(action)) => {
                assert_eq!(action.time_offset, Some(2.5));
                assert_eq!(action.target_time(), Some(22.5));
                assert!(action.received_at.is_some());
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert_eq!(local.state().unwrap().last_action.as_ref().unwrap().seq, 1);
    }

    #[test]
    fn test_relay_rejected_when_inactive_or_not_primary() {
        let (players, mut rx) = registry();
        let mut local = LocalSyncCoordinator::new();
        let play = PlaybackAction::new(PlaybackCommand::Play, 1);

        assert_eq!(
            local.relay_action(PRIMARY, play.clone(), &players),
            Err(DeliveryError::Inactive)
        );

        local.start(PRIMARY, SECONDARY).unwrap();
        assert_eq!(
            local.relay_action(SECONDARY, play, &players),
            Err(DeliveryError::NotPrimary(SECONDARY))
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_relay_to_closed_secondary() {
        let (players, rx) = registry();
        drop(rx);
        let mut local = LocalSyncCoordinator::new();
        local.start(PRIMARY, SECONDARY).unwrap();

        let result = local.relay_action(
            PRIMARY,
            PlaybackAction::new(PlaybackCommand::Pause, 1),
            &players,
        );
        assert_eq!(
            result,
            Err(DeliveryError::ChannelClosed(SECONDARY.to_string()))
        );
    }

    #[test]
    fn test_start_rejects_same_player_and_stop_clears() {
        let mut local = LocalSyncCoordinator::new();
        assert!(local.start(PRIMARY, PRIMARY).is_err());

        local.start(PRIMARY, SECONDARY).unwrap();
        assert!(local.involves(SECONDARY));
        assert!(local.stop().is_some());
        assert!(!local.is_active());
        assert!(local.stop().is_none());
    }
}
