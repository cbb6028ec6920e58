//! WebSocket rendezvous server
//!
//! Accepts connections, hands each to [`handle_connection`] and sweeps
//! stale rooms on a fixed interval.

use crate::config::ServerConfig;
use crate::handler::{handle_connection, SharedState};
use crate::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// Bound but not yet serving
pub struct SignalingServer {
    config: ServerConfig,
    listener: TcpListener,
    addr: SocketAddr,
    state: Arc<SharedState>,
}

impl SignalingServer {
    /// Validate `config` and bind the listener
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        config.validate()?;

        let listener = TcpListener::bind(config.bind_addr).await?;
        let addr = listener.local_addr()?;
        info!("Rendezvous server bound and listening on ws://{}", addr);

        Ok(Self {
            config,
            listener,
            addr,
            state: Arc::new(SharedState::new()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get shared state (for external access)
    pub fn state(&self) -> Arc<SharedState> {
        Arc::clone(&self.state)
    }

    /// Spawn the accept loop. The returned handle stops it.
    pub fn start(self) -> ServerHandle {
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let mut shutdown_rx = shutdown_tx.subscribe();
        let conn_shutdown = shutdown_tx.clone();

        let Self {
            config,
            listener,
            addr,
            state,
        } = self;
        let loop_state = Arc::clone(&state);

        let task = tokio::spawn(async move {
            let state = loop_state;
            let period = config.sweep_interval();
            let ttl = config.room_ttl();
            let mut sweep = time::interval_at(Instant::now() + period, period);
            sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer_addr)) => {
                                debug!("Accepted TCP connection from {}", peer_addr);
                                let state = Arc::clone(&state);
                                let shutdown = conn_shutdown.subscribe();
                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(stream, state, shutdown).await {
                                        error!("WebSocket connection error from {}: {}", peer_addr, e);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept WebSocket connection: {}", e);
                            }
                        }
                    }
                    _ = sweep.tick() => {
                        let swept = state.rooms.sweep(std::time::Instant::now(), ttl);
                        if !swept.is_empty() {
                            info!(count = swept.len(), remaining = state.rooms.len(), "Swept stale rooms");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Rendezvous server received shutdown signal");
                        break;
                    }
                }
            }

            info!("Rendezvous server accept loop exited");
        });

        ServerHandle {
            addr,
            shutdown_tx,
            task,
            state,
        }
    }
}

/// Handle for controlling a running server
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
    state: Arc<SharedState>,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `ws://` URL clients should connect to
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn room_count(&self) -> usize {
        self.state.rooms.len()
    }

    /// Stop accepting, close open connections and wait for the loop to exit
    pub async fn shutdown(self) {
        info!("Sending shutdown signal to rendezvous server");
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            error!("Rendezvous server task failed: {}", e);
        }
    }
}
