//! Tenant directory: bot configuration per receiving WhatsApp number

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eva_core::{BotConfig, RemoteTenantsConfig, TenantsConfig};
use reqwest::Client;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Result, WhatsAppError};

type TenantMap = HashMap<String, Arc<BotConfig>>;

/// Lookup of bot configuration by `phone_number_id`
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Configuration for the number, `None` if it is not served
    async fn resolve(&self, phone_number_id: &str) -> Result<Option<Arc<BotConfig>>>;
}

/// Build the directory described by the configuration
///
/// A remote source takes precedence; the static tenants then act as fallback.
pub fn from_config(config: &TenantsConfig) -> Result<Arc<dyn TenantDirectory>> {
    let fallback = StaticTenants::from_config(config);

    match &config.remote {
        Some(remote) => Ok(Arc::new(RemoteTenants::new(remote.clone())?.with_fallback(fallback))),
        None => Ok(Arc::new(fallback)),
    }
}

/// Tenants fixed at startup
#[derive(Debug, Clone, Default)]
pub struct StaticTenants {
    bots: TenantMap,
    default: Option<Arc<BotConfig>>,
}

impl StaticTenants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &TenantsConfig) -> Self {
        Self {
            bots: config
                .bots
                .iter()
                .map(|(id, bot)| (id.clone(), Arc::new(bot.clone())))
                .collect(),
            default: config.default.clone().map(Arc::new),
        }
    }

    pub fn with_bot(mut self, phone_number_id: impl Into<String>, config: BotConfig) -> Self {
        self.bots.insert(phone_number_id.into(), Arc::new(config));
        self
    }

    /// Configuration used for numbers without their own entry
    pub fn with_default(mut self, config: BotConfig) -> Self {
        self.default = Some(Arc::new(config));
        self
    }

    fn lookup(&self, phone_number_id: &str) -> Option<Arc<BotConfig>> {
        self.bots
            .get(phone_number_id)
            .or(self.default.as_ref())
            .cloned()
    }
}

#[async_trait]
impl TenantDirectory for StaticTenants {
    async fn resolve(&self, phone_number_id: &str) -> Result<Option<Arc<BotConfig>>> {
        Ok(self.lookup(phone_number_id))
    }
}

/// Tenants fetched from the configuration service
///
/// The document is a JSON object keyed by `phone_number_id`. It is cached and
/// fetched again once `refresh_secs` elapsed; a failed refresh keeps serving
/// the previous document.
pub struct RemoteTenants {
    client: Client,
    config: RemoteTenantsConfig,
    fallback: StaticTenants,
    cache: RwLock<Option<(Instant, Arc<TenantMap>)>>,
}

impl RemoteTenants {
    pub fn new(config: RemoteTenantsConfig) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            config,
            fallback: StaticTenants::new(),
            cache: RwLock::new(None),
        })
    }

    pub fn with_fallback(mut self, fallback: StaticTenants) -> Self {
        self.fallback = fallback;
        self
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.refresh_secs)
    }

    async fn tenants(&self) -> Result<Arc<TenantMap>> {
        {
            let cache = self.cache.read().await;
            if let Some((fetched_at, tenants)) = cache.as_ref() {
                if fetched_at.elapsed() < self.ttl() {
                    return Ok(Arc::clone(tenants));
                }
            }
        }

        let mut cache = self.cache.write().await;
        // Another caller may have refreshed while we waited for the lock
        if let Some((fetched_at, tenants)) = cache.as_ref() {
            if fetched_at.elapsed() < self.ttl() {
                return Ok(Arc::clone(tenants));
            }
        }

        match self.fetch().await {
            Ok(tenants) => {
                let tenants = Arc::new(tenants);
                *cache = Some((Instant::now(), Arc::clone(&tenants)));
                Ok(tenants)
            }
            Err(e) => match cache.as_ref() {
                Some((_, stale)) => {
                    warn!("Tenant refresh failed, serving cached configuration: {}", e);
                    Ok(Arc::clone(stale))
                }
                None => Err(e),
            },
        }
    }

    async fn fetch(&self) -> Result<TenantMap> {
        info!("Fetching tenant configuration from {}", self.config.url);

        let response = self
            .client
            .get(&self.config.url)
            .header("api-key", &self.config.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(WhatsAppError::Http(format!(
                "tenant service returned {} - {}",
                status, text
            )));
        }

        let document: HashMap<String, serde_json::Value> = response.json().await?;
        Ok(parse_tenants(document))
    }
}

#[async_trait]
impl TenantDirectory for RemoteTenants {
    async fn resolve(&self, phone_number_id: &str) -> Result<Option<Arc<BotConfig>>> {
        let tenants = self.tenants().await?;
        Ok(tenants
            .get(phone_number_id)
            .cloned()
            .or_else(|| self.fallback.lookup(phone_number_id)))
    }
}

/// Entries that do not describe a bot are skipped
fn parse_tenants(document: HashMap<String, serde_json::Value>) -> TenantMap {
    let mut tenants = TenantMap::new();
    for (phone_number_id, value) in document {
        match serde_json::from_value::<BotConfig>(value) {
            Ok(config) => {
                tenants.insert(phone_number_id, Arc::new(config));
            }
            Err(e) => warn!("Skipping tenant {}: {}", phone_number_id, e),
        }
    }
    debug!("Loaded {} tenants", tenants.len());
    tenants
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bot(client_id: &str) -> BotConfig {
        serde_json::from_value(json!({
            "auth": { "host": "http://eva.test", "client_id": client_id, "password": "pw" },
            "whatsapp": { "token": "t" }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_static_lookup_and_default() {
        let tenants = StaticTenants::new()
            .with_bot("100", bot("1"))
            .with_default(bot("9"));

        let own = tenants.resolve("100").await.unwrap().unwrap();
        assert_eq!(own.auth.client_id, "1");

        let fallback = tenants.resolve("200").await.unwrap().unwrap();
        assert_eq!(fallback.auth.client_id, "9");
    }

    #[tokio::test]
    async fn test_static_unknown_number() {
        let tenants = StaticTenants::new().with_bot("100", bot("1"));
        assert!(tenants.resolve("200").await.unwrap().is_none());
    }

    #[test]
    fn test_parse_tenants_skips_invalid_entries() {
        let document: HashMap<String, serde_json::Value> = serde_json::from_value(json!({
            "100": {
                "auth": { "host": "http://eva.test", "client_id": 7, "password": "pw" },
                "bot": { "sessionTimeout": "60000", "searchDocs": "false" },
                "whatsapp": { "token": "t", "whiteList": ["5511"] },
                "sqs": { "url": "ignored" }
            },
            "200": { "sqs": { "url": "only a queue" } }
        }))
        .unwrap();

        let tenants = parse_tenants(document);
        assert_eq!(tenants.len(), 1);

        let config = &tenants["100"];
        assert_eq!(config.auth.client_id, "7");
        assert_eq!(config.bot.session_timeout, 60_000);
        assert!(!config.bot.search_docs);
        assert_eq!(config.whatsapp.white_list, vec!["5511".to_string()]);
    }
}
