//! Ident listening server

use crate::client::{ClientList, IdentClient};
use crate::config::SharedConfig;
use crate::registry::ConnectionRegistry;
use crate::response::IdentResponder;
use crate::system::SystemInfo;
use crate::{Error, Result};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept so a persistent error cannot spin the loop
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// A bound listener and the task accepting on it
struct Listening {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// The ident server watches over the ident port while it is required
pub struct IdentdServer {
    config: SharedConfig,
    responder: IdentResponder,
    state: Mutex<Option<Listening>>,
    clients: Arc<ClientList>,
    /// Set once binding failed for lack of privileges; never cleared
    failed: AtomicBool,
    bind_attempts: AtomicUsize,
}

impl IdentdServer {
    /// Create a stopped server
    pub fn new(
        config: SharedConfig,
        registry: Arc<dyn ConnectionRegistry>,
        system: Arc<dyn SystemInfo>,
    ) -> Self {
        let responder = IdentResponder::new(config.clone(), registry, system);

        Self {
            config,
            responder,
            state: Mutex::new(None),
            clients: Arc::new(ClientList::new()),
            failed: AtomicBool::new(false),
            bind_attempts: AtomicUsize::new(0),
        }
    }

    /// Start listening on the configured address and port
    pub async fn start_server(&self) -> Result<()> {
        let addr = self.config.read().listen_addr()?;
        self.start_on(addr).await
    }

    /// Start listening on `addr`.
    ///
    /// Does nothing when already listening, or when an earlier start failed
    /// because binding was not permitted.
    pub async fn start_on(&self, addr: SocketAddr) -> Result<()> {
        self.start_with(addr, |addr| TcpListener::bind(addr)).await
    }

    async fn start_with<F, Fut>(&self, addr: SocketAddr, bind: F) -> Result<()>
    where
        F: FnOnce(SocketAddr) -> Fut,
        Fut: Future<Output = io::Result<TcpListener>>,
    {
        let mut state = self.state.lock().await;
        if state.is_some() || self.has_failed() {
            return Ok(());
        }

        self.bind_attempts.fetch_add(1, Ordering::SeqCst);
        let listener = match bind(addr).await {
            Ok(listener) => listener,
            Err(source) => {
                let error = Error::Bind { addr, source };
                self.record_bind_failure(&error);
                return Err(error);
            }
        };

        let local_addr = listener.local_addr()?;
        let max_connections = self
            .config
            .read()
            .server
            .max_connections
            .clamp(1, Semaphore::MAX_PERMITS);
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(accept_loop(
            listener,
            shutdown.clone(),
            self.responder.clone(),
            self.config.clone(),
            self.clients.clone(),
            Arc::new(Semaphore::new(max_connections)),
        ));

        info!(
            "Ident server listening on {} (max {} connections)",
            local_addr, max_connections
        );

        *state = Some(Listening {
            local_addr,
            shutdown,
            task,
        });

        Ok(())
    }

    fn record_bind_failure(&self, error: &Error) {
        if error.is_permission_denied() {
            warn!("Ident server will not be started again until restart");
            self.failed.store(true, Ordering::SeqCst);
        }
    }

    /// Stop listening and close every client
    pub async fn stop_server(&self) {
        let mut state = self.state.lock().await;
        let Some(listening) = state.take() else {
            return;
        };

        listening.shutdown.cancel();
        if let Err(e) = listening.task.await {
            debug!("Ident accept task ended abnormally: {}", e);
        }

        self.clients.close_all();
        info!("Ident server on {} stopped", listening.local_addr);
    }

    /// Whether the server is currently listening
    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// Bound address while listening
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.state
            .lock()
            .await
            .as_ref()
            .map(|listening| listening.local_addr)
    }

    /// Whether a permission failure has disabled the server
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Number of clients currently being served
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Number of times a bind was attempted
    pub fn bind_attempts(&self) -> usize {
        self.bind_attempts.load(Ordering::SeqCst)
    }
}

async fn accept_loop(
    listener: TcpListener,
    shutdown: CancellationToken,
    responder: IdentResponder,
    config: SharedConfig,
    clients: Arc<ClientList>,
    limit: Arc<Semaphore>,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let permit = match limit.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            warn!("Ident connection limit reached, dropping client {}", peer);
                            continue;
                        }
                    };

                    let read_timeout = config.read().server.read_timeout();
                    let client = IdentClient::new(
                        stream,
                        peer,
                        responder.clone(),
                        read_timeout,
                        clients.clone(),
                        permit,
                    );
                    debug!("Accepted ident client {} from {}", client.id(), peer);
                    client.start();
                }
                Err(e) => {
                    if !shutdown.is_cancelled() {
                        error!("Accepting ident client failed: {}", e);
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                }
            },
        }
    }
}
