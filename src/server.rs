use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::broadcast::Dispatcher;
use crate::config::RelayConfig;
use crate::error::{ErrorKind, RelayError};
use crate::protocol;
use crate::registry::SessionRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::state::RelayState;

/// Pause after a failed `accept()` so a persistent error such as fd
/// exhaustion does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A bound relay, ready to accept connections.
pub struct RelayServer {
    listener: TcpListener,
    state: RelayState,
    fatal_rx: mpsc::UnboundedReceiver<RelayError>,
}

impl RelayServer {
    pub async fn bind(config: RelayConfig) -> Result<Self> {
        config.validate()?;

        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;

        let (state, fatal_rx) = RelayState::new(config);

        Ok(Self {
            listener,
            state,
            fatal_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> SessionRegistry {
        self.state.registry.clone()
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.state.dispatcher.clone()
    }

    pub fn shutdown_handle(&self) -> ShutdownCoordinator {
        self.state.shutdown.clone()
    }

    /// Accept connections until shutdown is requested or a fatal error is
    /// reported, then close every session.
    pub async fn run(mut self) -> Result<()> {
        let accepting = self.state.shutdown.accept_token();

        info!(addr = %self.local_addr()?, "listening");

        let outcome = loop {
            tokio::select! {
                _ = accepting.cancelled() => break Ok(()),

                Some(err) = self.fatal_rx.recv() => {
                    break Err(anyhow!(err).context("session registry is inconsistent"));
                }

                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer)) => self.spawn_connection(socket, peer),
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        };

        drop(self.listener);

        let config = &self.state.config;
        let notice = config.shutdown_notice.as_deref().map(protocol::encode_notice);
        let closed = self
            .state
            .shutdown
            .close_all(&self.state.registry, notice.as_deref(), config.shutdown_grace())
            .await;

        info!(sessions = closed, "relay stopped");

        outcome
    }

    fn spawn_connection(&self, socket: tokio::net::TcpStream, peer: SocketAddr) {
        debug!(%peer, "accepted");

        let state = self.state.clone();

        tokio::spawn(async move {
            match crate::session::handle(state.clone(), socket, peer).await {
                Ok(()) => {}
                Err(err) if err.is_fatal() => state.report_fatal(err),
                Err(err) => log_session_error(peer, &err),
            }
        });
    }
}

fn log_session_error(peer: SocketAddr, err: &RelayError) {
    match err.kind() {
        ErrorKind::ConnectionClosed => debug!(%peer, "connection closed"),
        kind if err.is_handshake() => info!(%peer, ?kind, error = %err, "login rejected"),
        kind => warn!(%peer, ?kind, error = %err, "connection error"),
    }
}
