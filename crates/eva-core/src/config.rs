//! Configuration management
//!
//! 設定は以下の優先順位で読み込まれます:
//! 1. 環境変数
//! 2. eva-gateway.toml 設定ファイル
//! 3. デフォルト値
//!
//! 設定ファイル内では `${VAR_NAME}` 形式で環境変数を展開できます。
//!
//! Per-tenant bot configuration ([`BotConfig`]) keeps the JSON shape served by the
//! tenant configuration service, so documents from that service deserialize
//! directly into it.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// Default configuration file looked up by [`Config::load`]
pub const DEFAULT_CONFIG_FILE: &str = "eva-gateway.toml";

/// Main configuration for eva-gateway
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Webhook HTTP server
    #[serde(default)]
    pub server: ServerConfig,

    /// Asynchronous work queue
    #[serde(default)]
    pub queue: QueueConfig,

    /// Inactivity reaper
    #[serde(default)]
    pub reaper: ReaperConfig,

    /// Where tenant bot configurations come from
    #[serde(default)]
    pub tenants: TenantsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port for the webhook server
    #[serde(default = "default_port")]
    pub port: u16,

    /// Token expected in the `hub.verify_token` handshake parameter
    #[serde(default)]
    pub verify_token: String,

    /// App secret used to check `X-Hub-Signature-256` (check disabled when unset)
    #[serde(default)]
    pub app_secret: Option<String>,

    /// Directory for temporary audio files (system temp dir when unset)
    #[serde(default)]
    pub scratch_dir: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            verify_token: String::new(),
            app_secret: None,
            scratch_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Enqueue webhook events instead of processing them inline
    #[serde(default)]
    pub enabled: bool,

    /// Number of consumer tasks
    #[serde(default = "default_queue_workers")]
    pub workers: usize,

    /// Maximum number of buffered envelopes
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,

    /// Upper bound on processing a single message, in seconds
    #[serde(default = "default_processing_timeout_secs")]
    pub processing_timeout_secs: u64,

    /// How long a provider message id is remembered for duplicate suppression
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            workers: default_queue_workers(),
            capacity: default_queue_capacity(),
            processing_timeout_secs: default_processing_timeout_secs(),
            dedup_window_secs: default_dedup_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// Sweep interval in seconds
    #[serde(default = "default_reaper_interval_secs")]
    pub interval_secs: u64,

    /// Remove an expired session even when its farewell message could not be sent
    #[serde(default)]
    pub drop_on_notify_failure: bool,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_reaper_interval_secs(),
            drop_on_notify_failure: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantsConfig {
    /// Remote tenant configuration service
    #[serde(default)]
    pub remote: Option<RemoteTenantsConfig>,

    /// Configuration used for any phone number id not listed in `bots`
    #[serde(default)]
    pub default: Option<BotConfig>,

    /// Configurations keyed by WhatsApp phone number id
    #[serde(default)]
    pub bots: HashMap<String, BotConfig>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct RemoteTenantsConfig {
    /// URL returning a JSON map of phone number id to bot configuration
    pub url: String,

    /// Value sent in the `api-key` header
    pub api_key: String,

    /// Cache lifetime in seconds
    #[serde(default = "default_tenants_refresh_secs")]
    pub refresh_secs: u64,
}

impl fmt::Debug for RemoteTenantsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTenantsConfig")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .field("refresh_secs", &self.refresh_secs)
            .finish()
    }
}

// ============================================================================
// Tenant bot configuration
// ============================================================================

/// Configuration snapshot for one WhatsApp number
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub auth: AuthConfig,
    #[serde(default)]
    pub bot: BotSettings,
    pub whatsapp: WhatsAppConfig,
}

/// Credentials for the EVA API
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// EVA base URL, e.g. `https://eva.example.com`
    pub host: String,
    #[serde(deserialize_with = "lenient::string")]
    pub client_id: String,
    pub password: String,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("host", &self.host)
            .field("client_id", &self.client_id)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How answers to voice notes are delivered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyMode {
    #[default]
    Audio,
    Text,
}

/// Conversation behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotSettings {
    /// Inactivity timeout in milliseconds
    #[serde(default = "default_session_timeout", deserialize_with = "lenient::u64")]
    pub session_timeout: u64,

    #[serde(default = "default_search_docs", deserialize_with = "lenient::bool")]
    pub search_docs: bool,

    #[serde(default = "default_temperature", deserialize_with = "lenient::f64")]
    pub temperature: f64,

    #[serde(default = "default_engine")]
    pub engine: String,

    #[serde(default = "default_cl", deserialize_with = "lenient::string")]
    pub cl: String,

    /// Query sent with the greeting template
    #[serde(default = "default_greeting_message")]
    pub greeting_message: String,

    /// Farewell sent when a session expires (nothing is sent when unset)
    #[serde(default)]
    pub expired_session_message: Option<String>,

    /// Apology sent when a turn fails
    #[serde(default)]
    pub unexpected_error: Option<String>,

    #[serde(default)]
    pub reply_audio_type: ReplyMode,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            session_timeout: default_session_timeout(),
            search_docs: default_search_docs(),
            temperature: default_temperature(),
            engine: default_engine(),
            cl: default_cl(),
            greeting_message: default_greeting_message(),
            expired_session_message: None,
            unexpected_error: None,
            reply_audio_type: ReplyMode::default(),
        }
    }
}

impl BotSettings {
    /// Inactivity timeout as a duration
    pub fn session_timeout(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.session_timeout.min(i64::MAX as u64) as i64)
    }

    /// Apology text, falling back to the built-in default
    pub fn unexpected_error_message(&self) -> &str {
        self.unexpected_error
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_UNEXPECTED_ERROR)
    }

    /// Farewell text if one is configured and non-empty
    pub fn farewell(&self) -> Option<&str> {
        self.expired_session_message
            .as_deref()
            .filter(|m| !m.is_empty())
    }
}

/// WhatsApp Cloud API access for one number
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatsAppConfig {
    #[serde(default = "default_whatsapp_url")]
    pub url: String,
    #[serde(default = "default_whatsapp_version")]
    pub version: String,
    pub token: String,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub white_list: Vec<String>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub black_list: Vec<String>,
}

impl fmt::Debug for WhatsAppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WhatsAppConfig")
            .field("url", &self.url)
            .field("version", &self.version)
            .field("token", &"<redacted>")
            .field("white_list", &self.white_list)
            .field("black_list", &self.black_list)
            .finish()
    }
}

impl WhatsAppConfig {
    /// Graph API base for this number, e.g. `https://graph.facebook.com/v16.0`
    pub fn api_base(&self) -> String {
        format!(
            "{}/{}",
            self.url.trim_end_matches('/'),
            self.version.trim_matches('/')
        )
    }
}

pub const DEFAULT_UNEXPECTED_ERROR: &str = "Ocorreu um erro inesperado!";

fn default_port() -> u16 {
    8080
}

fn default_queue_workers() -> usize {
    5
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_processing_timeout_secs() -> u64 {
    150
}

fn default_dedup_window_secs() -> u64 {
    600
}

fn default_reaper_interval_secs() -> u64 {
    30
}

fn default_tenants_refresh_secs() -> u64 {
    600
}

fn default_session_timeout() -> u64 {
    10 * 60 * 1000
}

fn default_search_docs() -> bool {
    true
}

fn default_temperature() -> f64 {
    0.2
}

fn default_engine() -> String {
    "azure".to_string()
}

fn default_cl() -> String {
    "1".to_string()
}

fn default_greeting_message() -> String {
    "Se apresente de maneira informal para o usuário falando sobre é um assistente virtual \
     especializado da empresa e irá ajudá-lo"
        .to_string()
}

fn default_whatsapp_url() -> String {
    "https://graph.facebook.com".to_string()
}

fn default_whatsapp_version() -> String {
    "v16.0".to_string()
}

impl Config {
    /// 設定ファイルから環境変数を展開する
    ///
    /// `${VAR_NAME}` 形式の文字列を環境変数の値に置換します。
    /// 環境変数が存在しない場合は空文字列になります。
    fn expand_env_vars(value: &str, lookup: &impl Fn(&str) -> Option<String>) -> String {
        let mut result = String::with_capacity(value.len());
        let mut chars = value.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '$' && chars.peek() == Some(&'{') {
                chars.next(); // '{' を消費

                let mut var_name = String::new();
                for c in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    var_name.push(c);
                }

                if let Some(env_value) = lookup(&var_name) {
                    result.push_str(&env_value);
                }
            } else {
                result.push(c);
            }
        }

        result
    }

    /// TOML 設定ファイルから設定を読み込む
    ///
    /// 設定ファイル内の `${VAR_NAME}` は環境変数の値に置換され、
    /// その後で環境変数による上書きが適用されます。
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&content, |name| std::env::var(name).ok())
    }

    /// Parse TOML content using `lookup` for variable expansion and overrides
    pub fn from_toml_str(content: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let expanded = Self::expand_env_vars(content, &lookup);

        let mut config: Config = toml::from_str(&expanded)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))?;

        config.apply_env_overrides(&lookup);
        config.validate()?;
        Ok(config)
    }

    /// デフォルトパスから設定を読み込む
    ///
    /// `EVA_GATEWAY_CONFIG` で指定されたファイル、次に `./eva-gateway.toml` を探し、
    /// 見つからない場合は環境変数のみを使います。
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("EVA_GATEWAY_CONFIG") {
            return Self::from_toml_file(path);
        }

        if Path::new(DEFAULT_CONFIG_FILE).exists() {
            return Self::from_toml_file(DEFAULT_CONFIG_FILE);
        }

        Self::from_env()
    }

    /// Load a single-tenant configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the environment-only configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Config::default();

        // TENANTS_URL があればリモート設定のみで動作できる
        if lookup("TENANTS_URL").is_none() {
            config.tenants.default = Some(bot_config_from_env(&lookup)?);
        }

        config.apply_env_overrides(&lookup);
        config.validate()?;
        Ok(config)
    }

    /// 環境変数で設定を上書きする
    fn apply_env_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.is_empty());

        // Server
        if let Some(port) = non_empty("PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(token) = non_empty("WHATSAPP_WEBHOOK_TOKEN") {
            self.server.verify_token = token;
        }
        if let Some(secret) = non_empty("WHATSAPP_APP_SECRET") {
            self.server.app_secret = Some(secret);
        }
        if let Some(dir) = non_empty("SCRATCH_DIR") {
            self.server.scratch_dir = Some(dir);
        }

        // Queue
        if let Some(enabled) = non_empty("QUEUE_ENABLED") {
            self.queue.enabled = enabled.to_lowercase() == "true";
        }
        if let Some(workers) = non_empty("QUEUE_WORKERS").and_then(|w| w.parse().ok()) {
            self.queue.workers = workers;
        }
        if let Some(secs) = non_empty("QUEUE_PROCESSING_TIMEOUT_SECS").and_then(|s| s.parse().ok())
        {
            self.queue.processing_timeout_secs = secs;
        }

        // Reaper
        if let Some(secs) = non_empty("REAPER_INTERVAL_SECS").and_then(|s| s.parse().ok()) {
            self.reaper.interval_secs = secs;
        }

        // Tenants
        if let Some(url) = non_empty("TENANTS_URL") {
            let refresh_secs = non_empty("TENANTS_REFRESH_SECS")
                .and_then(|s| s.parse().ok())
                .or(self.tenants.remote.as_ref().map(|r| r.refresh_secs))
                .unwrap_or_else(default_tenants_refresh_secs);
            let api_key = non_empty("TENANTS_API_KEY")
                .or(self.tenants.remote.as_ref().map(|r| r.api_key.clone()))
                .unwrap_or_default();
            self.tenants.remote = Some(RemoteTenantsConfig {
                url,
                api_key,
                refresh_secs,
            });
        }
    }

    /// Check that the configuration can serve traffic
    pub fn validate(&self) -> Result<()> {
        if self.server.verify_token.is_empty() {
            return Err(Error::Config(
                "WHATSAPP_WEBHOOK_TOKEN (server.verify_token) not set".to_string(),
            ));
        }

        if self.tenants.remote.is_none()
            && self.tenants.default.is_none()
            && self.tenants.bots.is_empty()
        {
            return Err(Error::Config("no tenant configuration available".to_string()));
        }

        if self.queue.enabled && self.queue.workers == 0 {
            return Err(Error::Config("queue.workers must be at least 1".to_string()));
        }

        Ok(())
    }
}

/// Build the single-tenant bot configuration from `EVA_*` / `WHATSAPP_*` variables
fn bot_config_from_env(lookup: &impl Fn(&str) -> Option<String>) -> Result<BotConfig> {
    let required = |name: &str| {
        lookup(name)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::Config(format!("{} not set", name)))
    };
    let optional = |name: &str| lookup(name).filter(|v| !v.is_empty());

    let defaults = BotSettings::default();

    let bot = BotSettings {
        session_timeout: optional("SESSION_TIMEOUT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.session_timeout),
        search_docs: optional("EVA_BOT_SEARCH_DOCS")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(defaults.search_docs),
        temperature: optional("EVA_BOT_TEMPERATURE")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.temperature),
        engine: optional("EVA_BOT_ENGINE").unwrap_or(defaults.engine),
        cl: optional("EVA_BOT_CL").unwrap_or(defaults.cl),
        greeting_message: optional("EVA_GREETING_MESSAGE").unwrap_or(defaults.greeting_message),
        expired_session_message: optional("EVA_EXPIRED_SESSION_MESSAGE"),
        unexpected_error: optional("EVA_UNEXPECTED_ERROR_MESSAGE"),
        reply_audio_type: match optional("EVA_REPLY_AUDIO_TYPE").as_deref() {
            Some("text") => ReplyMode::Text,
            _ => ReplyMode::Audio,
        },
    };

    Ok(BotConfig {
        auth: AuthConfig {
            host: required("EVA_HOST")?,
            client_id: required("EVA_CLIENT_ID")?,
            password: required("EVA_PASSWORD")?,
        },
        bot,
        whatsapp: WhatsAppConfig {
            url: optional("WHATSAPP_API_URL").unwrap_or_else(default_whatsapp_url),
            version: optional("WHATSAPP_API_VERSION").unwrap_or_else(default_whatsapp_version),
            token: required("WHATSAPP_TOKEN")?,
            white_list: split_list(optional("WHATSAPP_WHITE_LIST")),
            black_list: split_list(optional("WHATSAPP_BLACK_LIST")),
        },
    })
}

fn split_list(value: Option<String>) -> Vec<String> {
    value
        .map(|s| {
            s.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Deserializers accepting both typed values and their string spellings,
/// as produced by the tenant configuration service.
mod lenient {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Bool(bool),
        Int(i64),
        Float(f64),
        Str(String),
    }

    impl Scalar {
        fn into_string(self) -> String {
            match self {
                Scalar::Bool(b) => b.to_string(),
                Scalar::Int(i) => i.to_string(),
                Scalar::Float(f) => f.to_string(),
                Scalar::Str(s) => s,
            }
        }
    }

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
        Ok(Scalar::deserialize(d)?.into_string())
    }

    pub fn string_list<'de, D: Deserializer<'de>>(
        d: D,
    ) -> std::result::Result<Vec<String>, D::Error> {
        let items = Option::<Vec<Scalar>>::deserialize(d)?.unwrap_or_default();
        Ok(items.into_iter().map(Scalar::into_string).collect())
    }

    pub fn bool<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<bool, D::Error> {
        match Scalar::deserialize(d)? {
            Scalar::Bool(b) => Ok(b),
            Scalar::Int(i) => Ok(i != 0),
            Scalar::Float(f) => Ok(f != 0.0),
            Scalar::Str(s) => Ok(s.trim().to_lowercase() != "false" && !s.trim().is_empty()),
        }
    }

    pub fn u64<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u64, D::Error> {
        use serde::de::Error as _;
        match Scalar::deserialize(d)? {
            Scalar::Int(i) if i >= 0 => Ok(i as u64),
            Scalar::Float(f) if f >= 0.0 => Ok(f as u64),
            Scalar::Str(s) => s.trim().parse().map_err(D::Error::custom),
            _ => Err(D::Error::custom("expected a non-negative number")),
        }
    }

    pub fn f64<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<f64, D::Error> {
        use serde::de::Error as _;
        match Scalar::deserialize(d)? {
            Scalar::Int(i) => Ok(i as f64),
            Scalar::Float(f) => Ok(f),
            Scalar::Str(s) => s.trim().parse().map_err(D::Error::custom),
            Scalar::Bool(_) => Err(D::Error::custom("expected a number")),
        }
    }
}
