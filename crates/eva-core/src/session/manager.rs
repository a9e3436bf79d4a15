//! Session lifecycle
//!
//! At most one live session exists per conversation key. An expired entry is
//! treated exactly like a missing one: the next inbound message replaces it
//! with a fresh session in greeting state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::session::{InMemorySessionStore, Session, SessionInit, SessionStore};

/// Session manager that handles session lifecycle
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl SessionManager {
    /// Create a session manager over the given store
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Create a session manager backed by process memory
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemorySessionStore::new()))
    }

    /// Return the live session for `key`, or store a fresh one
    ///
    /// A live session has its `last_interaction` refreshed. Expiry is judged
    /// with the timeout captured in the existing session's configuration.
    pub async fn get_or_create(&self, key: &str, init: SessionInit, now: DateTime<Utc>) -> Session {
        let refreshed = self
            .store
            .update(key, &|session| {
                if !session.is_expired(now) {
                    session.touch(now);
                }
            })
            .await;

        if let Some(session) = refreshed {
            if !session.is_expired(now) {
                debug!("Session already exists for {}", key);
                return session;
            }
            info!("Session for {} expired, starting a new one", key);
        }

        let session = Session::new(key, init, now);
        self.store.put(session.clone()).await;
        info!("Session created for {}", key);
        session
    }

    /// Current stored session, expired or not
    pub async fn get(&self, key: &str) -> Option<Session> {
        self.store.get(key).await
    }

    /// Refresh `last_interaction`
    pub async fn touch(&self, key: &str, now: DateTime<Utc>) -> Option<Session> {
        self.store.update(key, &|session| session.touch(now)).await
    }

    /// Record the upstream session id if the session has none yet
    ///
    /// Returns `true` when the session moved from greeting to active.
    pub async fn set_upstream_session_id(&self, key: &str, id: &str) -> bool {
        let assigned = AtomicBool::new(false);
        self.store
            .update(key, &|session| {
                if session.upstream_session_id.is_none() {
                    session.upstream_session_id = Some(id.to_string());
                    assigned.store(true, Ordering::Relaxed);
                }
            })
            .await;

        let assigned = assigned.into_inner();
        if assigned {
            debug!("Upstream session {} bound to {}", id, key);
        }
        assigned
    }

    pub async fn remove(&self, key: &str) -> Option<Session> {
        self.store.remove(key).await
    }

    /// Remove the session only if it is still expired at `now`
    ///
    /// Guards against a message refreshing the session between a scan and
    /// the removal.
    pub async fn remove_if_expired(&self, key: &str, now: DateTime<Utc>) -> Option<Session> {
        self.store
            .remove_if(key, &|session| session.is_expired(now))
            .await
    }

    /// Expired sessions at `now`, collected over a snapshot of the keys
    pub async fn scan_expired(&self, now: DateTime<Utc>) -> Vec<(String, Session)> {
        let mut expired = Vec::new();
        for key in self.store.keys().await {
            if let Some(session) = self.store.get(&key).await {
                if session.is_expired(now) {
                    expired.push((key, session));
                }
            }
        }
        expired
    }

    /// Number of stored sessions
    pub async fn len(&self) -> usize {
        self.store.keys().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use crate::test_support::init;
    use chrono::Duration;

    #[tokio::test]
    async fn test_get_or_create_reuses_live_session() {
        let manager = SessionManager::in_memory();
        let t0 = Utc::now();

        manager.get_or_create("k", init(600_000), t0).await;
        manager.set_upstream_session_id("k", "abc123").await;

        let later = t0 + Duration::minutes(5);
        let session = manager.get_or_create("k", init(600_000), later).await;

        assert_eq!(session.upstream_session_id.as_deref(), Some("abc123"));
        assert_eq!(session.last_interaction, later);
        assert_eq!(session.created_at, t0);
        assert_eq!(manager.len().await, 1);
    }

    #[tokio::test]
    async fn test_expired_session_is_replaced_in_greeting_state() {
        let manager = SessionManager::in_memory();
        let t0 = Utc::now();

        manager.get_or_create("k", init(600_000), t0).await;
        manager.set_upstream_session_id("k", "abc123").await;

        let later = t0 + Duration::milliseconds(600_000);
        let session = manager.get_or_create("k", init(600_000), later).await;

        assert_eq!(session.state(), SessionState::Greeting);
        assert_eq!(session.created_at, later);
        assert_eq!(manager.len().await, 1);
    }

    #[tokio::test]
    async fn test_existing_session_timeout_wins() {
        let manager = SessionManager::in_memory();
        let t0 = Utc::now();

        // Captured with a 1s timeout; a later init with 10min must not extend it
        manager.get_or_create("k", init(1_000), t0).await;
        manager.set_upstream_session_id("k", "abc").await;

        let session = manager
            .get_or_create("k", init(600_000), t0 + Duration::seconds(2))
            .await;
        assert!(session.upstream_session_id.is_none());
    }

    #[tokio::test]
    async fn test_upstream_session_id_is_set_once() {
        let manager = SessionManager::in_memory();
        manager.get_or_create("k", init(600_000), Utc::now()).await;

        assert!(manager.set_upstream_session_id("k", "first").await);
        assert!(!manager.set_upstream_session_id("k", "second").await);

        let session = manager.get("k").await.unwrap();
        assert_eq!(session.upstream_session_id.as_deref(), Some("first"));
        assert_eq!(session.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn test_repeating_the_stored_id_is_not_an_assignment() {
        let manager = SessionManager::in_memory();
        manager.get_or_create("k", init(600_000), Utc::now()).await;

        assert!(manager.set_upstream_session_id("k", "same").await);
        assert!(!manager.set_upstream_session_id("k", "same").await);
    }

    #[tokio::test]
    async fn test_set_upstream_session_id_missing_key() {
        let manager = SessionManager::in_memory();
        assert!(!manager.set_upstream_session_id("nope", "id").await);
    }

    #[tokio::test]
    async fn test_scan_expired() {
        let manager = SessionManager::in_memory();
        let t0 = Utc::now();

        manager.get_or_create("old", init(1_000), t0).await;
        manager
            .get_or_create("fresh", init(1_000), t0 + Duration::milliseconds(900))
            .await;

        let expired = manager.scan_expired(t0 + Duration::milliseconds(1_500)).await;
        let keys: Vec<_> = expired.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["old"]);
        // Scanning never mutates
        assert_eq!(manager.len().await, 2);
    }

    #[tokio::test]
    async fn test_remove_if_expired_skips_refreshed_session() {
        let manager = SessionManager::in_memory();
        let t0 = Utc::now();
        manager.get_or_create("k", init(1_000), t0).await;

        let now = t0 + Duration::seconds(2);
        assert_eq!(manager.scan_expired(now).await.len(), 1);

        // A message arrives after the scan
        manager.touch("k", now).await;
        assert!(manager.remove_if_expired("k", now).await.is_none());
        assert_eq!(manager.len().await, 1);
    }
}
