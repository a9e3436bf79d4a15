//! WhatsApp Cloud API webhook payloads and their normalized form

use serde::Deserialize;

use crate::error::{Result, WhatsAppError};

/// Raw webhook notification
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub entry: Vec<Entry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub changes: Vec<Change>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Change {
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub value: ChangeValue,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    pub messaging_product: Option<String>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
    #[serde(default)]
    pub messages: Vec<WebhookMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub display_phone_number: Option<String>,
    pub phone_number_id: String,
}

/// One message inside a notification
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookMessage {
    pub from: String,
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub text: Option<TextContent>,
    #[serde(default)]
    pub audio: Option<MediaContent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextContent {
    pub body: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaContent {
    pub id: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl WebhookPayload {
    /// Metadata and message of the first change carrying a message
    ///
    /// Only `entry[0].changes[0].value.messages[0]` is considered, and the
    /// payload must name its `object`. Status callbacks and other
    /// notifications without messages return `None`.
    pub fn first_message(&self) -> Option<(&Metadata, &WebhookMessage)> {
        self.object.as_deref().filter(|o| !o.is_empty())?;

        let value = &self.entry.first()?.changes.first()?.value;
        let message = value.messages.first()?;
        let metadata = value.metadata.as_ref()?;
        Some((metadata, message))
    }

    /// Receiving number and sender of the first message, if any
    pub fn routing(&self) -> Option<(&str, &str)> {
        self.first_message()
            .map(|(metadata, message)| (metadata.phone_number_id.as_str(), message.from.as_str()))
    }
}

/// Supported inbound content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Text(String),
    /// Provider media id of a voice note
    Audio(String),
}

/// Provider-independent inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub conversation_key: String,
    pub phone_number_id: String,
    pub reply_address: String,
    pub message_id: String,
    pub kind: MessageKind,
}

impl InboundMessage {
    /// Normalize a webhook payload
    pub fn from_payload(payload: &WebhookPayload) -> Result<Self> {
        let (metadata, message) = payload
            .first_message()
            .ok_or_else(|| WhatsAppError::Validation("payload carries no message".to_string()))?;

        if metadata.phone_number_id.is_empty() || message.from.is_empty() {
            return Err(WhatsAppError::Validation(
                "message without phone_number_id or sender".to_string(),
            ));
        }

        let kind = match message.kind.as_str() {
            "text" => {
                let body = message
                    .text
                    .as_ref()
                    .map(|t| t.body.clone())
                    .ok_or_else(|| WhatsAppError::Validation("text message without body".to_string()))?;
                MessageKind::Text(body)
            }
            "audio" => {
                let media_id = message
                    .audio
                    .as_ref()
                    .map(|a| a.id.clone())
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| WhatsAppError::Validation("audio message without media id".to_string()))?;
                MessageKind::Audio(media_id)
            }
            other => return Err(WhatsAppError::UnsupportedMessageType(other.to_string())),
        };

        Ok(Self {
            conversation_key: conversation_key(&metadata.phone_number_id, &message.from),
            phone_number_id: metadata.phone_number_id.clone(),
            reply_address: message.from.clone(),
            message_id: message.id.clone(),
            kind,
        })
    }
}

/// Sessions are scoped to one sender talking to one business number
pub fn conversation_key(phone_number_id: &str, from: &str) -> String {
    format!("{}:{}", phone_number_id, from)
}
