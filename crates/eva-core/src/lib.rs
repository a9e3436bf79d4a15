//! eva-core: EVA Gateway Core Library
//!
//! Configuration, the error taxonomy, the bearer-token cache, per-conversation
//! session state, and the client for the EVA conversational and speech API.

pub mod config;
pub mod credential;
pub mod error;
pub mod eva;
pub mod session;

pub use config::{
    AuthConfig, BotConfig, BotSettings, Config, QueueConfig, ReaperConfig, RemoteTenantsConfig,
    ReplyMode, ServerConfig, TenantsConfig, WhatsAppConfig,
};
pub use credential::{CredentialCache, InMemoryTokenStore, TokenStore};
pub use error::{Error, Result};
pub use eva::{AskRequest, AskResponse, EvaClient, Template};
pub use session::{InMemorySessionStore, Session, SessionInit, SessionManager, SessionState, SessionStore};

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::config::{AuthConfig, BotConfig, BotSettings, WhatsAppConfig};
    use crate::session::SessionInit;

    pub(crate) fn bot_config(timeout_ms: u64) -> Arc<BotConfig> {
        Arc::new(BotConfig {
            auth: AuthConfig {
                host: "http://eva.test".to_string(),
                client_id: "1".to_string(),
                password: "pw".to_string(),
            },
            bot: BotSettings {
                session_timeout: timeout_ms,
                ..BotSettings::default()
            },
            whatsapp: WhatsAppConfig {
                url: "http://graph.test".to_string(),
                version: "v16.0".to_string(),
                token: "t".to_string(),
                white_list: Vec::new(),
                black_list: Vec::new(),
            },
        })
    }

    pub(crate) fn init(timeout_ms: u64) -> SessionInit {
        SessionInit {
            phone_number_id: "100".to_string(),
            reply_address: "5511999990000".to_string(),
            config: bot_config(timeout_ms),
        }
    }
}
