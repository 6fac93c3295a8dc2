//! Decides when the ident server should be running

use crate::config::SharedConfig;
use crate::server::IdentdServer;
use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Connection lifecycle notifications from the IRC client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connection attempt started
    Connecting(Uuid),
    /// A connection attempt completed
    Connected(Uuid),
    /// A connection attempt failed
    ConnectError(Uuid),
}

/// Runs the ident server while connection attempts are in flight, or all the
/// time when `always_on` is configured.
pub struct IdentdManager {
    config: SharedConfig,
    server: Arc<IdentdServer>,
    /// Connection attempts waiting for an ident reply
    connections: Mutex<Vec<Uuid>>,
    listener: SyncMutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl IdentdManager {
    pub fn new(config: SharedConfig, server: Arc<IdentdServer>) -> Self {
        Self {
            config,
            server,
            connections: Mutex::new(Vec::new()),
            listener: SyncMutex::new(None),
        }
    }

    /// The managed server
    pub fn server(&self) -> &Arc<IdentdServer> {
        &self.server
    }

    /// Subscribe to connection events and start the server if always on
    pub async fn on_load(self: &Arc<Self>, events: broadcast::Receiver<ConnectionEvent>) {
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(Self::listen(self.clone(), events, shutdown.clone()));

        let previous = self.listener.lock().replace((shutdown, task));
        if let Some((old_shutdown, _)) = previous {
            old_shutdown.cancel();
        }

        if self.always_on() {
            self.start().await;
        }
    }

    /// Stop listening for events, stop the server and forget all attempts
    pub async fn on_unload(&self) {
        let listener = self.listener.lock().take();
        if let Some((shutdown, task)) = listener {
            shutdown.cancel();
            if let Err(e) = task.await {
                debug!("Ident event listener ended abnormally: {}", e);
            }
        }

        self.server.stop_server().await;
        self.connections.lock().await.clear();
    }

    /// Whether the manager is subscribed to connection events
    pub fn is_loaded(&self) -> bool {
        self.listener.lock().is_some()
    }

    /// Number of connection attempts in flight
    pub async fn pending_attempts(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Dispatch a single connection event
    pub async fn handle_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connecting(id) => self.handle_server_connecting(id).await,
            ConnectionEvent::Connected(id) => self.handle_server_connected(id).await,
            ConnectionEvent::ConnectError(id) => self.handle_server_connect_error(id).await,
        }
    }

    pub async fn handle_server_connecting(&self, id: Uuid) {
        let mut connections = self.connections.lock().await;
        if connections.is_empty() {
            self.start().await;
        }
        connections.push(id);
    }

    pub async fn handle_server_connected(&self, id: Uuid) {
        self.handle_server_removed(id).await;
    }

    pub async fn handle_server_connect_error(&self, id: Uuid) {
        self.handle_server_removed(id).await;
    }

    async fn handle_server_removed(&self, id: Uuid) {
        let mut connections = self.connections.lock().await;
        if let Some(index) = connections.iter().position(|attempt| *attempt == id) {
            connections.remove(index);
        }

        if connections.is_empty() && !self.always_on() {
            self.server.stop_server().await;
        }
    }

    async fn start(&self) {
        if let Err(e) = self.server.start_server().await {
            error!("Unable to start identd server: {}", e);
        }
    }

    fn always_on(&self) -> bool {
        self.config.read().advanced.always_on
    }

    async fn listen(
        manager: Arc<Self>,
        mut events: broadcast::Receiver<ConnectionEvent>,
        shutdown: CancellationToken,
    ) {
        info!("Ident manager listening for connection events");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) => manager.handle_event(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Ident manager missed {} connection events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        debug!("Ident manager stopped listening for connection events");
    }
}
