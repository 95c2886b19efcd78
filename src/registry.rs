//! The set of logged-in sessions, shared by every connection task.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::conn::Connection;
use crate::error::RelayError;
use crate::token::{self, TOKEN_LEN};

/// Opaque session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A logged-in client.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub username: String,
    pub connection: Arc<Connection>,
    pub connected_at: Instant,
    seq: u64,
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<SessionId, Arc<Session>>>,
    /// username -> owning session; guards username uniqueness.
    usernames: Arc<DashMap<String, SessionId>>,
    next_seq: Arc<AtomicU64>,
}

impl SessionRegistry {
    /// Register a logged-in connection under `username`.
    pub fn register(
        &self,
        username: &str,
        connection: Arc<Connection>,
    ) -> Result<Arc<Session>, RelayError> {
        // Holding the username slot serializes logins for the same name.
        let slot = match self.usernames.entry(username.to_string()) {
            Entry::Occupied(_) => return Err(RelayError::DuplicateUsername(username.to_string())),
            Entry::Vacant(slot) => slot,
        };

        let id = token::unique_session_id(self, TOKEN_LEN);

        let session = Arc::new(Session {
            id: id.clone(),
            username: username.to_string(),
            connection,
            connected_at: Instant::now(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        });

        match self.sessions.entry(id.clone()) {
            Entry::Occupied(_) => return Err(RelayError::DuplicateSessionId(id)),
            Entry::Vacant(entry) => {
                entry.insert(session.clone());
            }
        }

        slot.insert(id);

        Ok(session)
    }

    /// Remove a session. Removing an absent id is a no-op.
    pub fn unregister(&self, id: &SessionId) -> Option<Arc<Session>> {
        let (_, session) = self.sessions.remove(id)?;

        self.usernames
            .remove_if(&session.username, |_, owner| owner == id);

        Some(session)
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|guard| guard.clone())
    }

    /// Look a session up through the username index.
    pub fn find_by_username(&self, username: &str) -> Option<Arc<Session>> {
        let id = self.usernames.get(username).map(|owner| owner.clone())?;
        self.get(&id)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn contains_username(&self, username: &str) -> bool {
        self.usernames.contains_key(username)
    }

    /// Point-in-time copy of the registered sessions in registration order.
    pub fn snapshot(&self, excluding: Option<&SessionId>) -> Vec<Arc<Session>> {
        let mut sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .filter(|e| Some(e.key()) != excluding)
            .map(|e| e.value().clone())
            .collect();

        sessions.sort_by_key(|s| s.seq);
        sessions
    }

    /// Remove every session, returning them in registration order.
    pub fn drain(&self) -> Vec<Arc<Session>> {
        self.snapshot(None)
            .into_iter()
            .filter_map(|s| self.unregister(&s.id))
            .collect()
    }

    pub fn usernames(&self) -> Vec<String> {
        self.snapshot(None)
            .iter()
            .map(|s| s.username.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tokio::io::duplex;
    use tokio_util::sync::CancellationToken;

    fn connection() -> Arc<Connection> {
        let (_client, server) = duplex(256);
        Connection::spawn(
            "127.0.0.1:5000".parse().unwrap(),
            server,
            8,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn register_and_lookup() {
        let registry = SessionRegistry::default();
        let alice = registry.register("alice", connection()).unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&alice.id));
        assert!(registry.contains_username("alice"));
        assert_eq!(registry.get(&alice.id).unwrap().username, "alice");
    }

    #[tokio::test]
    async fn find_by_username_follows_the_index() {
        let registry = SessionRegistry::default();
        let before = Instant::now();
        let alice = registry.register("alice", connection()).unwrap();

        let found = registry.find_by_username("alice").unwrap();
        assert_eq!(found.id, alice.id);
        assert!(found.connected_at >= before);
        assert!(registry.find_by_username("bob").is_none());

        registry.unregister(&alice.id);
        assert!(registry.find_by_username("alice").is_none());
    }

    #[tokio::test]
    async fn duplicate_username_rejected() {
        let registry = SessionRegistry::default();
        let first = registry.register("bob", connection()).unwrap();

        let err = registry.register("bob", connection()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateUsername);

        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&first.id));
    }

    #[tokio::test]
    async fn username_reusable_after_unregister() {
        let registry = SessionRegistry::default();
        let first = registry.register("bob", connection()).unwrap();
        registry.unregister(&first.id);

        let second = registry.register("bob", connection()).unwrap();
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let registry = SessionRegistry::default();
        let alice = registry.register("alice", connection()).unwrap();

        assert!(registry.unregister(&alice.id).is_some());
        assert!(registry.unregister(&alice.id).is_none());
        assert!(registry.is_empty());
        assert!(!registry.contains_username("alice"));
    }

    #[tokio::test]
    async fn snapshot_in_registration_order() {
        let registry = SessionRegistry::default();
        let names = ["alice", "bob", "carol", "dave", "erin"];
        let sessions: Vec<_> = names
            .iter()
            .map(|n| registry.register(n, connection()).unwrap())
            .collect();

        let all: Vec<_> = registry.snapshot(None).iter().map(|s| s.username.clone()).collect();
        assert_eq!(all, names);

        let others: Vec<_> = registry
            .snapshot(Some(&sessions[1].id))
            .iter()
            .map(|s| s.username.clone())
            .collect();
        assert_eq!(others, ["alice", "carol", "dave", "erin"]);
    }

    #[tokio::test]
    async fn snapshot_is_detached_from_registry() {
        let registry = SessionRegistry::default();
        let alice = registry.register("alice", connection()).unwrap();
        registry.register("bob", connection()).unwrap();

        let snapshot = registry.snapshot(None);
        registry.unregister(&alice.id);
        registry.register("carol", connection()).unwrap();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.usernames(), ["bob", "carol"]);
    }

    #[tokio::test]
    async fn drain_empties_registry() {
        let registry = SessionRegistry::default();
        registry.register("alice", connection()).unwrap();
        registry.register("bob", connection()).unwrap();

        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].username, "alice");
        assert!(registry.is_empty());
        assert!(registry.drain().is_empty());
    }

    #[tokio::test]
    async fn concurrent_registrations_of_one_name() {
        let registry = SessionRegistry::default();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.register("dup", connection()).is_ok()
            }));
        }

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(registry.len(), 1);
    }
}
