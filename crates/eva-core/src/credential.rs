//! Bearer token cache for the EVA API
//!
//! Tokens are fetched lazily through a login exchange and dropped when the
//! upstream reports them as expired. There is no TTL: invalidation is purely
//! reactive. Two callers missing the cache at the same time may both log in;
//! the last token written wins.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Storage backend for cached tokens, keyed by EVA client id
pub trait TokenStore: Send + Sync {
    fn get(&self, client_id: &str) -> Option<String>;
    fn set(&self, client_id: &str, token: String);
    fn remove(&self, client_id: &str);
}

/// Process-local token storage
#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    tokens: DashMap<String, String>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for InMemoryTokenStore {
    fn get(&self, client_id: &str) -> Option<String> {
        self.tokens.get(client_id).map(|t| t.value().clone())
    }

    fn set(&self, client_id: &str, token: String) {
        self.tokens.insert(client_id.to_string(), token);
    }

    fn remove(&self, client_id: &str) {
        self.tokens.remove(client_id);
    }
}

/// Credential cache shared by every request to the EVA API
#[derive(Clone)]
pub struct CredentialCache {
    store: Arc<dyn TokenStore>,
}

impl Default for CredentialCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialCache {
    /// Create a cache backed by process memory
    pub fn new() -> Self {
        Self::with_store(Arc::new(InMemoryTokenStore::new()))
    }

    /// Create a cache over a custom backend
    pub fn with_store(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }

    /// Return the cached token for `client_id`, running `login` on a miss
    pub async fn get_token<F, Fut>(&self, client_id: &str, login: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        if let Some(token) = self.store.get(client_id) {
            debug!("Token cache hit for client {}", client_id);
            return Ok(token);
        }

        info!("Token cache miss for client {}, logging in", client_id);
        let token = login().await?;
        if token.is_empty() {
            return Err(Error::Auth(format!(
                "login for client {} returned an empty token",
                client_id
            )));
        }

        self.store.set(client_id, token.clone());
        Ok(token)
    }

    /// Drop the cached token so the next use logs in again
    pub fn invalidate(&self, client_id: &str) {
        info!("Invalidating token for client {}", client_id);
        self.store.remove(client_id);
    }

    /// Whether a token is currently cached
    pub fn contains(&self, client_id: &str) -> bool {
        self.store.get(client_id).is_some()
    }
}
