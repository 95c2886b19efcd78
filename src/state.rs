use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::error;

use crate::broadcast::Dispatcher;
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::registry::SessionRegistry;
use crate::shutdown::ShutdownCoordinator;

/// Handles shared by the accept loop and every connection task.
#[derive(Clone)]
pub struct RelayState {
    pub config: Arc<RelayConfig>,
    pub registry: SessionRegistry,
    pub dispatcher: Dispatcher,
    pub shutdown: ShutdownCoordinator,
    fatal: mpsc::UnboundedSender<RelayError>,
}

impl RelayState {
    /// Build the shared state. The receiver yields invariant violations that
    /// must stop the relay.
    pub fn new(config: RelayConfig) -> (Self, mpsc::UnboundedReceiver<RelayError>) {
        let registry = SessionRegistry::default();
        let (fatal, fatal_rx) = mpsc::unbounded_channel();

        let state = Self {
            config: Arc::new(config),
            dispatcher: Dispatcher::new(registry.clone()),
            registry,
            shutdown: ShutdownCoordinator::new(),
            fatal,
        };

        (state, fatal_rx)
    }

    pub fn report_fatal(&self, err: RelayError) {
        error!(error = %err, "relay invariant violated");

        // Nobody listening means the accept loop is already gone.
        let _ = self.fatal.send(err);
    }
}
