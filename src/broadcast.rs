//! Fan-out of chat lines to every other session.

use std::sync::Arc;

use chrono::Local;
use tracing::{debug, warn};

use crate::error::{ErrorKind, RelayError};
use crate::protocol;
use crate::registry::{Session, SessionId, SessionRegistry};

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: SessionRegistry,
}

impl Dispatcher {
    pub fn new(registry: SessionRegistry) -> Self {
        Self { registry }
    }

    /// Stamp `text` with the current server time and queue it for every
    /// session except `sender`.
    pub fn broadcast(&self, sender: &Session, text: &str) -> Delivery {
        let line = protocol::encode_chat(Local::now().time(), &sender.username, text);

        self.deliver(line.into(), Some(&sender.id))
    }

    /// Queue a `[server]` notice for every session except `excluding`.
    pub fn announce(&self, text: &str, excluding: Option<&SessionId>) -> Delivery {
        self.deliver(protocol::encode_notice(text).into(), excluding)
    }

    /// Queue a private line for the session named `to` alone. `None` when no
    /// such user is online.
    pub fn whisper(&self, sender: &Session, to: &str, text: &str) -> Option<Delivery> {
        let target = self.registry.find_by_username(to)?;
        let line = protocol::encode_private(Local::now().time(), &sender.username, text);

        let mut delivery = Delivery::default();
        match target.connection.send_line(line.into()) {
            Ok(()) => delivery.delivered = 1,
            Err(err) => {
                self.drop_recipient(&target, &err);
                delivery.dropped = 1;
            }
        }

        Some(delivery)
    }

    fn deliver(&self, line: Arc<str>, excluding: Option<&SessionId>) -> Delivery {
        let mut delivery = Delivery::default();

        for target in self.registry.snapshot(excluding) {
            match target.connection.send_line(line.clone()) {
                Ok(()) => delivery.delivered += 1,
                Err(err) => {
                    self.drop_recipient(&target, &err);
                    delivery.dropped += 1;
                }
            }
        }

        debug!(
            delivered = delivery.delivered,
            dropped = delivery.dropped,
            "line dispatched"
        );

        delivery
    }

    fn drop_recipient(&self, target: &Session, err: &RelayError) {
        self.registry.unregister(&target.id);
        target.connection.close();

        if err.kind() == ErrorKind::ConnectionClosed {
            debug!(session = %target.id, username = %target.username, "recipient already closed");
        } else {
            warn!(
                session = %target.id,
                username = %target.username,
                peer = %target.connection.peer(),
                error = %err,
                "dropping recipient"
            );
        }
    }
}
