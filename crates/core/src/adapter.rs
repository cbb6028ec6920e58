//! Player adapter: the sync protocol layered over a [`LocalPlayerControl`]
//!
//! One adapter actor runs per player. It turns user events into sequenced
//! actions while it is the primary, emits a timesync heartbeat, debounces
//! scrubbing, and applies inbound actions through the sequence gate and
//! drift correction.

use crate::action::{ActionSequencer, PlaybackCommand, SeekDebouncer, SequenceGate};
use crate::config::SyncConfig;
use crate::correction::{self, Correction, CorrectionThresholds};
use crate::player::{LocalPlayerControl, PlayerCommand, PlayerHandle, PlayerId, UserEvent};
use crate::router::RouterHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Handles to a running adapter
pub struct AdapterHandle {
    id: PlayerId,
    player: PlayerHandle,
    events: mpsc::UnboundedSender<UserEvent>,
    router: RouterHandle,
    task: JoinHandle<()>,
}

impl AdapterHandle {
    pub fn id(&self) -> PlayerId {
        self.id
    }

    pub fn player(&self) -> &PlayerHandle {
        &self.player
    }

    /// Report something the user did on the player
    pub fn user_event(&self, event: UserEvent) {
        if self.events.send(event).is_err() {
            debug!(player = %self.id, "Adapter stopped, dropping user event");
        }
    }

    /// Tear the adapter down, as when its tab goes away
    pub fn close(self) {
        self.task.abort();
        self.router.player_closed(self.id);
    }
}

pub struct PlayerAdapter<P: LocalPlayerControl> {
    id: PlayerId,
    player: Arc<P>,
    router: RouterHandle,
    thresholds: CorrectionThresholds,
    timesync_interval: Duration,
    syncing: bool,
    is_primary: bool,
    sequencer: ActionSequencer,
    gate: SequenceGate,
    debounce: SeekDebouncer,
}

impl<P: LocalPlayerControl> PlayerAdapter<P> {
    /// Start an adapter for `player` and register it with the router
    pub fn spawn(id: PlayerId, player: Arc<P>, router: RouterHandle, config: &SyncConfig) -> AdapterHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.player_channel_capacity);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let handle = PlayerHandle::new(id, cmd_tx);

        router.register_player(handle.clone());

        let adapter = Self {
            id,
            player,
            router: router.clone(),
            thresholds: CorrectionThresholds::from(config),
            timesync_interval: config.timesync_interval(),
            syncing: false,
            is_primary: false,
            sequencer: ActionSequencer::new(),
            gate: SequenceGate::new(),
            debounce: SeekDebouncer::new(config.seek_debounce()),
        };

        let task = tokio::spawn(adapter.run(cmd_rx, event_rx));

        AdapterHandle {
            id,
            player: handle,
            events: event_tx,
            router,
            task,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<PlayerCommand>,
        mut events: mpsc::UnboundedReceiver<UserEvent>,
    ) {
        let mut timesync = tokio::time::interval(self.timesync_interval);
        timesync.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut events_open = true;

        loop {
            let seek_due = self.debounce.deadline().map(Instant::from_std);

            tokio::select! {
                biased;

                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd, &mut timesync).await,
                    None => break,
                },
                event = events.recv(), if events_open => match event {
                    Some(event) => self.handle_user_event(event),
                    None => events_open = false,
                },
                _ = timesync.tick(), if self.syncing && self.is_primary => {
                    self.send_timesync().await;
                }
                _ = wait_until(seek_due) => self.flush_seek(),
            }
        }

        debug!(player = %self.id, "Adapter command channel closed");
        self.router.player_closed(self.id);
    }

    async fn handle_command(&mut self, cmd: PlayerCommand, timesync: &mut Interval) {
        match cmd {
            PlayerCommand::EnableSync { is_primary } => {
                info!(player = %self.id, is_primary, "Sync enabled");
                self.syncing = true;
                self.is_primary = is_primary;
                self.reset_ordering();
                timesync.reset();

                match self.player.state().await {
                    Some(state) => self.router.report_time(self.id, state.current_time),
                    None => warn!(player = %self.id, "No media element, cannot report time"),
                }
            }
            PlayerCommand::DisableSync => {
                info!(player = %self.id, "Sync disabled");
                self.syncing = false;
                self.is_primary = false;
                self.reset_ordering();
            }
            PlayerCommand::Apply(action) => {
                if !self.syncing {
                    debug!(player = %self.id, kind = action.kind(), "Sync disabled, ignoring action");
                    return;
                }
                if !self.gate.admit(action.seq) {
                    debug!(
                        player = %self.id,
                        seq = action.seq,
                        last_applied = self.gate.last_applied(),
                        "Dropping stale action"
                    );
                    return;
                }

                // A remote-driven seek must not echo back as a local one.
                self.debounce.cancel();

                let Some(state) = self.player.state().await else {
                    warn!(player = %self.id, "No media element, cannot apply {}", action.kind());
                    return;
                };

                for fix in correction::plan(&action, &state, &self.thresholds) {
                    self.execute(fix).await;
                }
            }
            PlayerCommand::GetVideoInfo(reply) => {
                let info = self.player.video_info().await;
                let _ = reply.send(info);
            }
        }
    }

    async fn execute(&self, fix: Correction) {
        debug!(player = %self.id, ?fix, "Applying correction");
        let result = match fix {
            Correction::Play => self.player.play().await,
            Correction::Pause => self.player.pause().await,
            Correction::SeekTo(t) => self.player.seek(t).await,
            Correction::SetRate(r) => self.player.set_rate(r).await,
        };
        if let Err(e) = result {
            warn!(player = %self.id, ?fix, "Player rejected correction: {}", e);
        }
    }

    fn handle_user_event(&mut self, event: UserEvent) {
        if !(self.syncing && self.is_primary) {
            return;
        }
        match event {
            UserEvent::Played => self.send(PlaybackCommand::Play),
            UserEvent::Paused => self.send(PlaybackCommand::Pause),
            UserEvent::RateChanged(rate) => self.send(PlaybackCommand::RateChange { rate }),
            UserEvent::Seeked(target) => self.debounce.record(target, Instant::now().into_std()),
        }
    }

    fn flush_seek(&mut self) {
        if let Some(target_time) = self.debounce.take_due(Instant::now().into_std()) {
            self.send(PlaybackCommand::Seek { target_time });
        }
    }

    async fn send_timesync(&mut self) {
        if let Some(state) = self.player.state().await {
            self.send(PlaybackCommand::TimeSync {
                reference_time: state.current_time,
                paused: state.paused,
                rate: state.rate,
            });
        }
    }

    fn send(&mut self, command: PlaybackCommand) {
        let action = self.sequencer.stamp(command);
        debug!(player = %self.id, kind = action.kind(), seq = action.seq, "Sending action");
        self.router.player_action(self.id, action);
    }

    fn reset_ordering(&mut self) {
        self.sequencer.reset();
        self.gate.reset();
        self.debounce.cancel();
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{PlaybackAction, PlaybackCommand};
    use crate::player::{PlayerState, VideoInfo};
    use crate::router::RouterEvent;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakePlayer {
        state: Mutex<Option<PlayerState>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakePlayer {
        fn at(current_time: f64) -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(Some(PlayerState {
                    current_time,
                    paused: false,
                    rate: 1.0,
                })),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LocalPlayerControl for FakePlayer {
        async fn play(&self) -> crate::Result<()> {
            self.calls.lock().unwrap().push("play".into());
            Ok(())
        }
        async fn pause(&self) -> crate::Result<()> {
            self.calls.lock().unwrap().push("pause".into());
            Ok(())
        }
        async fn seek(&self, time: f64) -> crate::Result<()> {
            self.calls.lock().unwrap().push(format!("seek {}", time));
            Ok(())
        }
        async fn set_rate(&self, rate: f64) -> crate::Result<()> {
            self.calls.lock().unwrap().push(format!("rate {}", rate));
            Ok(())
        }
        async fn state(&self) -> Option<PlayerState> {
            *self.state.lock().unwrap()
        }
        async fn video_info(&self) -> VideoInfo {
            VideoInfo {
                title: "fake".into(),
                url: "https://video.example/fake".into(),
                has_player: true,
            }
        }
    }

    fn spawn(player: Arc<FakePlayer>) -> (AdapterHandle, mpsc::UnboundedReceiver<RouterEvent>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let router = RouterHandle::from_sender(tx);
        let handle = PlayerAdapter::spawn(PlayerId(1), player, router, &SyncConfig::default());
        assert!(matches!(rx.try_recv(), Ok(RouterEvent::RegisterPlayer(_))));
        (handle, rx)
    }

    async fn enable(
        handle: &AdapterHandle,
        rx: &mut mpsc::UnboundedReceiver<RouterEvent>,
        is_primary: bool,
    ) {
        handle
            .player()
            .deliver(PlayerCommand::EnableSync { is_primary })
            .unwrap();
        loop {
            match rx.recv().await {
                Some(RouterEvent::ReportTime { .. }) => return,
                Some(_) => continue,
                None => panic!("router channel closed"),
            }
        }
    }

    async fn next_action(rx: &mut mpsc::UnboundedReceiver<RouterEvent>) -> PlaybackAction {
        loop {
            match rx.recv().await {
                Some(RouterEvent::PlayerAction { action, .. }) => return action,
                Some(_) => continue,
                None => panic!("router channel closed"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_reports_time() {
        let (handle, mut rx) = spawn(FakePlayer::at(42.0));
        handle
            .player()
            .deliver(PlayerCommand::EnableSync { is_primary: false })
            .unwrap();

        match rx.recv().await {
            Some(RouterEvent::ReportTime { sender, current_time }) => {
                assert_eq!(sender, PlayerId(1));
                assert_eq!(current_time, 42.0);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_sequences_user_events() {
        let (handle, mut rx) = spawn(FakePlayer::at(0.0));
        enable(&handle, &mut rx, true).await;

        handle.user_event(UserEvent::Paused);
        handle.user_event(UserEvent::Played);

        let first = next_action(&mut rx).await;
        let second = next_action(&mut rx).await;
        assert_eq!(first.command, PlaybackCommand::Pause);
        assert_eq!(first.seq, 1);
        assert_eq!(second.command, PlaybackCommand::Play);
        assert_eq!(second.seq, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_seek_scrubbing_is_debounced() {
        let (handle, mut rx) = spawn(FakePlayer::at(0.0));
        enable(&handle, &mut rx, true).await;

        handle.user_event(UserEvent::Seeked(10.0));
        handle.user_event(UserEvent::Seeked(11.0));
        handle.user_event(UserEvent::Seeked(12.0));

        let action = next_action(&mut rx).await;
        assert_eq!(action.command, PlaybackCommand::Seek { target_time: 12.0 });
        assert_eq!(action.seq, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_emits_timesync_heartbeat() {
        let (handle, mut rx) = spawn(FakePlayer::at(30.0));
        enable(&handle, &mut rx, true).await;

        let action = next_action(&mut rx).await;
        assert_eq!(
            action.command,
            PlaybackCommand::TimeSync {
                reference_time: 30.0,
                paused: false,
                rate: 1.0
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_secondary_ignores_user_events() {
        let (handle, mut rx) = spawn(FakePlayer::at(0.0));
        enable(&handle, &mut rx, false).await;
        handle.user_event(UserEvent::Played);

        tokio::time::sleep(Duration::from_secs(5)).await;
        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(event, RouterEvent::PlayerAction { .. }));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_drops_out_of_order_actions() {
        let player = FakePlayer::at(0.0);
        let (handle, _rx) = spawn(Arc::clone(&player));
        handle
            .player()
            .deliver(PlayerCommand::EnableSync { is_primary: false })
            .unwrap();

        let newer = PlaybackAction::new(PlaybackCommand::Seek { target_time: 50.0 }, 2);
        let older = PlaybackAction::new(PlaybackCommand::Seek { target_time: 40.0 }, 1);
        handle.player().deliver(PlayerCommand::Apply(newer)).unwrap();
        handle.player().deliver(PlayerCommand::Apply(older)).unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(player.calls(), vec!["seek 50".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_reports_player_closed() {
        let (handle, mut rx) = spawn(FakePlayer::at(0.0));
        handle.close();

        assert!(matches!(
            rx.recv().await,
            Some(RouterEvent::PlayerClosed(PlayerId(1)))
        ));
    }
}
