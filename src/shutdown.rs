//! Graceful shutdown coordination via `CancellationToken`.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::registry::SessionRegistry;

/// Stops the accept loop and closes every connection.
///
/// Two tokens: `accepting` ends the accept loop, `connections` is the parent
/// of every connection's close token, so cancelling it also reaches clients
/// still in the login handshake.
#[derive(Clone, Default)]
pub struct ShutdownCoordinator {
    accepting: CancellationToken,
    connections: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token the accept loop waits on.
    pub fn accept_token(&self) -> CancellationToken {
        self.accepting.clone()
    }

    /// Close token for a newly accepted connection.
    pub fn connection_token(&self) -> CancellationToken {
        self.connections.child_token()
    }

    /// Stop accepting new connections. Idempotent.
    pub fn shutdown(&self) {
        self.accepting.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.accepting.is_cancelled()
    }

    /// Drain the registry and close every connection.
    ///
    /// 1. Stop accepting
    /// 2. Queue `notice` and a graceful close on each registered session
    /// 3. Wait up to `grace` for those queues to flush
    /// 4. Close whatever is left, including unregistered handshakes
    ///
    /// Returns the number of sessions that were registered.
    pub async fn close_all(
        &self,
        registry: &SessionRegistry,
        notice: Option<&str>,
        grace: Duration,
    ) -> usize {
        self.shutdown();

        let sessions = registry.drain();
        let notice: Option<Arc<str>> = notice.map(Arc::from);

        for session in &sessions {
            if let Some(notice) = &notice {
                let _ = session.connection.send_line(notice.clone());
            }
            session.connection.finish();
        }

        info!(
            sessions = sessions.len(),
            grace_ms = grace.as_millis() as u64,
            "closing sessions"
        );

        let flushed = join_all(sessions.iter().map(|s| s.connection.closed()));
        if tokio::time::timeout(grace, flushed).await.is_err() {
            warn!("shutdown grace of {grace:?} elapsed, closing remaining connections");
        }

        self.connections.cancel();

        sessions.len()
    }
}
