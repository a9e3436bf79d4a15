//! Session storage backends

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::session::Session;

/// Storage for sessions keyed by conversation key
///
/// The in-memory implementation is the only one shipped; the trait exists so a
/// shared cache can replace it when several instances serve the same numbers.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<Session>;

    /// Insert or replace
    async fn put(&self, session: Session);

    async fn remove(&self, key: &str) -> Option<Session>;

    /// Apply `f` to the stored session, returning the updated copy
    async fn update(&self, key: &str, f: &(dyn for<'s> Fn(&'s mut Session) + Sync)) -> Option<Session>;

    /// Remove the session only when `predicate` holds at removal time
    async fn remove_if(
        &self,
        key: &str,
        predicate: &(dyn for<'s> Fn(&'s Session) -> bool + Sync),
    ) -> Option<Session>;

    /// Snapshot of the stored keys
    async fn keys(&self) -> Vec<String>;
}

/// In-memory session store
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl InMemorySessionStore {
    /// Create a new session store
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Clone for InMemorySessionStore {
    fn clone(&self) -> Self {
        Self {
            sessions: Arc::clone(&self.sessions),
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, key: &str) -> Option<Session> {
        self.sessions.read().await.get(key).cloned()
    }

    async fn put(&self, session: Session) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.key.clone(), session);
    }

    async fn remove(&self, key: &str) -> Option<Session> {
        self.sessions.write().await.remove(key)
    }

    async fn update(&self, key: &str, f: &(dyn for<'s> Fn(&'s mut Session) + Sync)) -> Option<Session> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(key)?;
        f(session);
        Some(session.clone())
    }

    async fn remove_if(
        &self,
        key: &str,
        predicate: &(dyn for<'s> Fn(&'s Session) -> bool + Sync),
    ) -> Option<Session> {
        let mut sessions = self.sessions.write().await;
        if sessions.get(key).is_some_and(|s| predicate(s)) {
            sessions.remove(key)
        } else {
            None
        }
    }

    async fn keys(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }
}
