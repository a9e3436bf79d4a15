//! WhatsApp Cloud (Graph) API client
//!
//! Every call takes the tenant's [`WhatsAppConfig`]; the access token travels
//! as the `access_token` query parameter.

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use eva_core::WhatsAppConfig;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, WhatsAppError};

/// Graph API client
#[derive(Debug, Clone)]
pub struct GraphClient {
    client: Client,
}

/// Outgoing message payload
#[derive(Debug, Serialize)]
struct SendMessagePayload<'a> {
    messaging_product: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    recipient_type: Option<&'static str>,
    to: &'a str,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<TextBody<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio: Option<MediaRef<'a>>,
}

#[derive(Debug, Serialize)]
struct TextBody<'a> {
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct MediaRef<'a> {
    id: &'a str,
}

#[derive(Debug, Deserialize)]
struct MediaInfo {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    id: Option<String>,
}

impl GraphClient {
    /// Create a new client with a 60s request timeout
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(60))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Send a text message
    pub async fn send_text(
        &self,
        wa: &WhatsAppConfig,
        phone_number_id: &str,
        to: &str,
        body: &str,
    ) -> Result<()> {
        info!("Sending WhatsApp text message to {}", to);

        let payload = SendMessagePayload {
            messaging_product: "whatsapp",
            recipient_type: None,
            to,
            kind: None,
            text: Some(TextBody { body }),
            audio: None,
        };
        self.post_message(wa, phone_number_id, &payload).await?;

        debug!("Text message sent to {}", to);
        Ok(())
    }

    /// Send a voice message referencing previously uploaded media
    pub async fn send_audio_message(
        &self,
        wa: &WhatsAppConfig,
        phone_number_id: &str,
        to: &str,
        media_id: &str,
    ) -> Result<()> {
        info!("Sending WhatsApp audio message {} to {}", media_id, to);

        let payload = SendMessagePayload {
            messaging_product: "whatsapp",
            recipient_type: Some("individual"),
            to,
            kind: Some("audio"),
            text: None,
            audio: Some(MediaRef { id: media_id }),
        };
        self.post_message(wa, phone_number_id, &payload).await
    }

    /// Upload the audio file at `path` and send it
    ///
    /// Two sequential calls; media uploaded before a failed send is left on
    /// the provider.
    pub async fn send_audio(
        &self,
        wa: &WhatsAppConfig,
        phone_number_id: &str,
        to: &str,
        path: &Path,
    ) -> Result<()> {
        let media_id = self.upload_media(wa, phone_number_id, path).await?;
        self.send_audio_message(wa, phone_number_id, to, &media_id)
            .await
    }

    async fn post_message(
        &self,
        wa: &WhatsAppConfig,
        phone_number_id: &str,
        payload: &SendMessagePayload<'_>,
    ) -> Result<()> {
        let url = format!("{}/{}/messages", wa.api_base(), phone_number_id);

        let response = self
            .client
            .post(&url)
            .query(&[("access_token", wa.token.as_str())])
            .json(payload)
            .send()
            .await
            .map_err(|e| WhatsAppError::Delivery(e.to_string()))?;

        check(response, WhatsAppError::Delivery).await?;
        Ok(())
    }

    /// Upload an mp3 file as provider-hosted media, returning its media id
    pub async fn upload_media(
        &self,
        wa: &WhatsAppConfig,
        phone_number_id: &str,
        path: &Path,
    ) -> Result<String> {
        let url = format!("{}/{}/media", wa.api_base(), phone_number_id);

        let audio = tokio::fs::read(path)
            .await
            .map_err(|e| WhatsAppError::Delivery(format!("failed to read {}: {}", path.display(), e)))?;
        debug!("Uploading {} bytes of audio", audio.len());

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.mp3".to_string());
        let part = Part::bytes(audio)
            .file_name(file_name)
            .mime_str("audio/mpeg")
            .map_err(|e| WhatsAppError::Delivery(e.to_string()))?;
        let form = Form::new()
            .part("file", part)
            .text("messaging_product", "whatsapp")
            .text("type", "audio/mpeg");

        let response = self
            .client
            .post(&url)
            .query(&[("access_token", wa.token.as_str())])
            .multipart(form)
            .send()
            .await
            .map_err(|e| WhatsAppError::Delivery(e.to_string()))?;

        let response = check(response, WhatsAppError::Delivery).await?;
        let upload: UploadResponse = response
            .json()
            .await
            .map_err(|e| WhatsAppError::Delivery(e.to_string()))?;

        upload
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| WhatsAppError::Delivery("media upload returned no id".to_string()))
    }

    /// Resolve a media id to its download URL
    pub async fn media_url(&self, wa: &WhatsAppConfig, media_id: &str) -> Result<String> {
        let url = format!("{}/{}", wa.api_base(), media_id);

        let response = self
            .client
            .get(&url)
            .query(&[("access_token", wa.token.as_str())])
            .send()
            .await
            .map_err(|e| WhatsAppError::MediaFetch(e.to_string()))?;

        let response = check(response, WhatsAppError::MediaFetch).await?;
        let info: MediaInfo = response
            .json()
            .await
            .map_err(|e| WhatsAppError::MediaFetch(e.to_string()))?;

        info.url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| WhatsAppError::MediaFetch(format!("media {} has no url", media_id)))
    }

    /// Download media content with the tenant's bearer token
    pub async fn download_media(&self, wa: &WhatsAppConfig, url: &str) -> Result<Bytes> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&wa.token)
            .send()
            .await
            .map_err(|e| WhatsAppError::MediaFetch(e.to_string()))?;

        let response = check(response, WhatsAppError::MediaFetch).await?;
        response
            .bytes()
            .await
            .map_err(|e| WhatsAppError::MediaFetch(e.to_string()))
    }
}

async fn check(response: Response, wrap: fn(String) -> WhatsAppError) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    Err(wrap(format!("Graph API returned {} - {}", status, text)))
}
