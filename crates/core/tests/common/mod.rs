//! Test doubles for the session router
//!
//! `MockPlayer` stands in for a site integration and records every command
//! the adapter issues. `MockLinkFactory` hands out in-memory links whose
//! events are driven by the test.

#![allow(dead_code)]

use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use watchsync_core::link::{ConnectionState, LinkEvent, LinkEventSink, PeerLink, PeerLinkFactory};
use watchsync_core::player::{LocalPlayerControl, PlayerState, VideoInfo};
use watchsync_core::signaling::{PeerMessage, RoomId};
use watchsync_core::{Error, Result};

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,watchsync_core=debug")
        .with_test_writer()
        .try_init();
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Same as [`wait_for`] for async conditions
pub async fn wait_for_async<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition().await
}

pub struct MockPlayer {
    title: String,
    state: Mutex<PlayerState>,
    calls: Mutex<Vec<String>>,
}

impl MockPlayer {
    pub fn new(title: &str, current_time: f64) -> Arc<Self> {
        Arc::new(Self {
            title: title.to_string(),
            state: Mutex::new(PlayerState {
                current_time,
                paused: false,
                rate: 1.0,
            }),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_time(&self, current_time: f64) {
        self.state.lock().unwrap().current_time = current_time;
    }

    pub fn current_time(&self) -> f64 {
        self.state.lock().unwrap().current_time
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl LocalPlayerControl for MockPlayer {
    async fn play(&self) -> Result<()> {
        self.state.lock().unwrap().paused = false;
        self.record("play".to_string());
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.state.lock().unwrap().paused = true;
        self.record("pause".to_string());
        Ok(())
    }

    async fn seek(&self, time: f64) -> Result<()> {
        self.state.lock().unwrap().current_time = time;
        self.record(format!("seek {}", time));
        Ok(())
    }

    async fn set_rate(&self, rate: f64) -> Result<()> {
        self.state.lock().unwrap().rate = rate;
        self.record(format!("rate {}", rate));
        Ok(())
    }

    async fn state(&self) -> Option<PlayerState> {
        Some(*self.state.lock().unwrap())
    }

    async fn video_info(&self) -> VideoInfo {
        VideoInfo {
            title: self.title.clone(),
            url: format!("https://video.example/{}", self.title),
            has_player: true,
        }
    }
}

/// Shared view of one mock link
pub struct MockLinkState {
    events: LinkEventSink,
    state: Mutex<ConnectionState>,
    sent: Mutex<Vec<PeerMessage>>,
    disconnects: AtomicUsize,
    fail_with: Mutex<Option<Error>>,
    gate: Option<Arc<Notify>>,
}

impl MockLinkState {
    /// Let a held create/join finish
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    async fn pass_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
    }

    /// Drive a state change as the transport would
    pub fn set_state(&self, next: ConnectionState) {
        *self.state.lock().unwrap() = next;
        self.events.emit(LinkEvent::StateChanged(next));
    }

    /// Deliver a message as if it arrived from the peer
    pub fn receive(&self, message: PeerMessage) {
        self.events.emit(LinkEvent::PeerMessage(message));
    }

    pub fn sent(&self) -> Vec<PeerMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> Option<Error> {
        self.fail_with.lock().unwrap().take()
    }
}

struct MockLink(Arc<MockLinkState>);

#[async_trait]
impl PeerLink for MockLink {
    async fn create_room(&self, _signaling_url: &str) -> Result<RoomId> {
        self.0.pass_gate().await;
        if let Some(err) = self.0.take_failure() {
            return Err(err);
        }
        self.0.set_state(ConnectionState::Connecting);
        RoomId::parse("ABCDEF")
    }

    async fn join_room(&self, _room_id: &RoomId, _signaling_url: &str) -> Result<()> {
        self.0.pass_gate().await;
        if let Some(err) = self.0.take_failure() {
            return Err(err);
        }
        self.0.set_state(ConnectionState::Connecting);
        Ok(())
    }

    async fn send_sync_message(&self, message: &PeerMessage) -> bool {
        if *self.0.state.lock().unwrap() != ConnectionState::Connected {
            return false;
        }
        self.0.sent.lock().unwrap().push(message.clone());
        true
    }

    fn connection_state(&self) -> ConnectionState {
        *self.0.state.lock().unwrap()
    }

    async fn disconnect(&self) {
        self.0.disconnects.fetch_add(1, Ordering::SeqCst);
        let was = std::mem::replace(&mut *self.0.state.lock().unwrap(), ConnectionState::Disconnected);
        if was != ConnectionState::Disconnected {
            self.0.events.emit(LinkEvent::StateChanged(ConnectionState::Disconnected));
        }
    }
}

#[derive(Default)]
pub struct MockLinkFactory {
    links: Mutex<Vec<Arc<MockLinkState>>>,
    next_failure: Mutex<Option<Error>>,
    hold_next: Mutex<bool>,
}

impl MockLinkFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next created link fail its create/join with `err`
    pub fn fail_next(&self, err: Error) {
        *self.next_failure.lock().unwrap() = Some(err);
    }

    /// Make the next created link wait in create/join until released
    pub fn hold_next(&self) {
        *self.hold_next.lock().unwrap() = true;
    }

    pub fn link(&self, index: usize) -> Arc<MockLinkState> {
        Arc::clone(&self.links.lock().unwrap()[index])
    }

    pub fn last_link(&self) -> Arc<MockLinkState> {
        let links = self.links.lock().unwrap();
        Arc::clone(links.last().expect("no link created"))
    }

    pub fn created(&self) -> usize {
        self.links.lock().unwrap().len()
    }
}

impl PeerLinkFactory for MockLinkFactory {
    fn create_link(&self, events: LinkEventSink) -> Box<dyn PeerLink> {
        let state = Arc::new(MockLinkState {
            events,
            state: Mutex::new(ConnectionState::Disconnected),
            sent: Mutex::new(Vec::new()),
            disconnects: AtomicUsize::new(0),
            fail_with: Mutex::new(self.next_failure.lock().unwrap().take()),
            gate: std::mem::take(&mut *self.hold_next.lock().unwrap()).then(|| Arc::new(Notify::new())),
        });
        self.links.lock().unwrap().push(Arc::clone(&state));
        Box::new(MockLink(state))
    }
}
