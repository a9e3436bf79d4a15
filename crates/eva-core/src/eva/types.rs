//! EVA API wire types

use serde::{Deserialize, Serialize};

use crate::config::BotConfig;

/// Body `message` the EVA API returns when a bearer token is expired or unknown
pub const AUTH_EXPIRED_MESSAGE: &str = "Token expirado ou não autorizado!";

/// Prompt-shaping mode for `ai/ask`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Template {
    /// First contact
    #[serde(rename = "template_saudacao")]
    Greeting,
    /// Continuing dialogue carrying the upstream session id
    #[serde(rename = "template_contexto")]
    Context,
}

/// `POST /api/ai/ask` body
#[derive(Debug, Clone, Serialize)]
pub struct AskRequest {
    pub query: String,
    pub memory: String,
    #[serde(rename = "searchdocs")]
    pub search_docs: String,
    pub temperature: f64,
    pub template: Template,
    #[serde(rename = "sessionid", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub client_id: String,
    pub username: String,
    pub email: bool,
    pub zendesk: bool,
    pub cl: String,
    pub engine: String,
}

impl AskRequest {
    /// Greeting exchange: the configured greeting prompt is the query and
    /// document search is off
    pub fn greeting(config: &BotConfig, phone_number_id: &str) -> Self {
        Self::base(
            config,
            phone_number_id,
            Template::Greeting,
            config.bot.greeting_message.clone(),
            None,
            false,
        )
    }

    /// Context exchange carrying the upstream session id
    pub fn context(
        config: &BotConfig,
        phone_number_id: &str,
        query: impl Into<String>,
        session_id: Option<String>,
    ) -> Self {
        Self::base(
            config,
            phone_number_id,
            Template::Context,
            query.into(),
            session_id,
            config.bot.search_docs,
        )
    }

    fn base(
        config: &BotConfig,
        phone_number_id: &str,
        template: Template,
        query: String,
        session_id: Option<String>,
        search_docs: bool,
    ) -> Self {
        Self {
            query,
            memory: "{}".to_string(),
            search_docs: search_docs.to_string(),
            temperature: config.bot.temperature,
            template,
            session_id,
            client_id: config.auth.client_id.clone(),
            username: format!("WHATSAPP - {} - {}", phone_number_id, config.auth.client_id),
            email: false,
            zendesk: false,
            cl: config.bot.cl.clone(),
            engine: config.bot.engine.clone(),
        }
    }
}

/// `POST /api/ai/ask` response
#[derive(Debug, Clone, Deserialize)]
pub struct AskResponse {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "sessionid", default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub client_id: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginResponse {
    pub message: Option<String>,
}

/// Error body shape shared by EVA endpoints
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SynthesisRequest<'a> {
    pub text: &'a str,
    pub language: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TranscriptionResponse {
    #[serde(default)]
    pub text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::bot_config;

    #[test]
    fn test_greeting_request_shape() {
        let config = bot_config(600_000);
        let request = AskRequest::greeting(&config, "100");
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["template"], "template_saudacao");
        assert_eq!(json["query"], config.bot.greeting_message);
        assert_eq!(json["searchdocs"], "false");
        assert_eq!(json["memory"], "{}");
        assert_eq!(json["username"], "WHATSAPP - 100 - 1");
        assert!(json.get("sessionid").is_none());
    }

    #[test]
    fn test_context_request_shape() {
        let config = bot_config(600_000);
        let request = AskRequest::context(&config, "100", "Oi", Some("abc123".to_string()));
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["template"], "template_contexto");
        assert_eq!(json["query"], "Oi");
        assert_eq!(json["sessionid"], "abc123");
        assert_eq!(json["searchdocs"], "true");
        assert_eq!(json["engine"], "azure");
        assert_eq!(json["email"], false);
    }

    #[test]
    fn test_ask_response_without_session() {
        let response: AskResponse = serde_json::from_str(r#"{"message":"Olá!"}"#).unwrap();
        assert_eq!(response.message, "Olá!");
        assert!(response.session_id.is_none());
    }
}
