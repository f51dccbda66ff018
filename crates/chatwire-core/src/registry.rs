//! Process-wide registry of live sessions, one per identity.
//!
//! Registration is last-writer-wins: registering a session for an identity
//! that already has one displaces the old entry and hands it back to the
//! caller, who must close it.

use chatwire_protocol::UserId;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use crate::metrics;
use crate::session::Session;

/// Mapping from identity to its live session.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<UserId, Arc<Session>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session, returning the one it displaced.
    pub fn register(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        let user = session.user_id();
        let displaced = self.sessions.insert(user, session);
        if let Some(old) = &displaced {
            debug!(user, session = old.id(), "Displaced previous session");
        }
        metrics::set_active_sessions(self.sessions.len());
        displaced
    }

    /// Look up the live session for an identity.
    #[must_use]
    pub fn lookup(&self, user: UserId) -> Option<Arc<Session>> {
        self.sessions.get(&user).map(|s| Arc::clone(s.value()))
    }

    /// Remove whatever session is registered for an identity.
    pub fn remove(&self, user: UserId) -> Option<Arc<Session>> {
        let removed = self.sessions.remove(&user).map(|(_, s)| s);
        metrics::set_active_sessions(self.sessions.len());
        removed
    }

    /// Remove `session` only if it is still the registered one.
    ///
    /// Returns `false` when the entry was already removed or belongs to a
    /// newer session for the same identity.
    pub fn remove_session(&self, session: &Session) -> bool {
        let removed = self
            .sessions
            .remove_if(&session.user_id(), |_, current| current.id() == session.id())
            .is_some();
        metrics::set_active_sessions(self.sessions.len());
        removed
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Close every registered session. Entries are removed by their owners'
    /// disconnect sequence.
    ///
    /// Returns the number of sessions closed by this call.
    pub fn close_all(&self) -> usize {
        let sessions: Vec<Arc<Session>> =
            self.sessions.iter().map(|s| Arc::clone(s.value())).collect();
        sessions.iter().filter(|s| s.close()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::LocalBroker;
    use crate::model::Identity;

    async fn session(broker: &LocalBroker, user: UserId) -> Arc<Session> {
        let (session, _queue) = Session::open(Identity::new(user, "u"), broker, &[], 4)
            .await
            .unwrap();
        session
    }

    #[tokio::test]
    async fn test_register_lookup_remove() {
        let broker = LocalBroker::new();
        let registry = SessionRegistry::new();
        let s = session(&broker, 1).await;

        assert!(registry.register(Arc::clone(&s)).is_none());
        assert_eq!(registry.lookup(1).unwrap().id(), s.id());
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.remove(1).unwrap().id(), s.id());
        assert!(registry.lookup(1).is_none());
        assert!(registry.remove(1).is_none());
    }

    #[tokio::test]
    async fn test_register_displaces_previous() {
        let broker = LocalBroker::new();
        let registry = SessionRegistry::new();
        let old = session(&broker, 1).await;
        let new = session(&broker, 1).await;

        registry.register(Arc::clone(&old));
        let displaced = registry.register(Arc::clone(&new)).unwrap();
        assert_eq!(displaced.id(), old.id());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_session_ignores_newer_entry() {
        let broker = LocalBroker::new();
        let registry = SessionRegistry::new();
        let old = session(&broker, 1).await;
        let new = session(&broker, 1).await;

        registry.register(Arc::clone(&old));
        registry.register(Arc::clone(&new));

        assert!(!registry.remove_session(&old));
        assert_eq!(registry.lookup(1).unwrap().id(), new.id());
        assert!(registry.remove_session(&new));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_close_all() {
        let broker = LocalBroker::new();
        let registry = SessionRegistry::new();
        registry.register(session(&broker, 1).await);
        registry.register(session(&broker, 2).await);

        assert_eq!(registry.close_all(), 2);
        assert_eq!(registry.close_all(), 0);
        assert!(registry.lookup(1).unwrap().is_closed());
    }
}
