//! Speech endpoints: `speech/from-audio` (transcription) and
//! `speech/from-text` (synthesis)

use std::path::Path;

use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use tracing::{debug, info};

use crate::config::AuthConfig;
use crate::error::{Error, Result};

use super::client::{EvaClient, check_status, endpoint};
use super::types::{SynthesisRequest, TranscriptionResponse};

/// Language hint sent with voice notes
pub const TRANSCRIPTION_LANGUAGE: &str = "pt_BR";

/// Language used for synthesized replies
pub const SYNTHESIS_LANGUAGE: &str = "pt";

impl EvaClient {
    /// Transcribe the audio file at `path`
    ///
    /// Returns the recognized text, empty when nothing was recognized.
    /// Non-auth failures surface as [`Error::Transcription`].
    pub async fn speech_from_audio(&self, auth: &AuthConfig, path: &Path) -> Result<String> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.mp3".to_string());

        info!("Transcribing {}", file_name);

        let result = self
            .with_auth_retry(auth, |token| self.post_audio(auth, path, &file_name, token))
            .await;

        match result {
            Ok(text) => {
                debug!("Transcription complete: {} characters", text.len());
                Ok(text)
            }
            Err(Error::UpstreamApi { status, body }) => Err(Error::Transcription(format!(
                "speech endpoint returned {}: {}",
                status, body
            ))),
            Err(e) => Err(e),
        }
    }

    async fn post_audio(
        &self,
        auth: &AuthConfig,
        path: &Path,
        file_name: &str,
        token: String,
    ) -> Result<String> {
        // The form is consumed by each send, so it is rebuilt from the file per attempt
        let audio = tokio::fs::read(path).await?;
        let part = Part::bytes(audio)
            .file_name(file_name.to_string())
            .mime_str("audio/mpeg")
            .map_err(Error::Http)?;
        let form = Form::new()
            .part("audio", part)
            .text("language", TRANSCRIPTION_LANGUAGE);

        let response = self
            .http()
            .post(endpoint(auth, "speech/from-audio"))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await
            .map_err(Error::Http)?;

        let response = check_status(response).await?;
        let body = response.bytes().await.map_err(Error::Http)?;
        let parsed: TranscriptionResponse = serde_json::from_slice(&body)
            .map_err(|e| Error::Transcription(format!("unparseable transcription: {}", e)))?;

        Ok(parsed.text.unwrap_or_default().trim().to_string())
    }

    /// Synthesize `text` and return the raw audio bytes
    pub async fn speech_from_text(
        &self,
        auth: &AuthConfig,
        text: &str,
        language: &str,
    ) -> Result<Bytes> {
        info!("Synthesizing {} characters ({})", text.len(), language);

        let audio = self
            .with_auth_retry(auth, |token| self.post_text(auth, text, language, token))
            .await?;

        debug!("Synthesis complete: {} bytes", audio.len());
        Ok(audio)
    }

    async fn post_text(
        &self,
        auth: &AuthConfig,
        text: &str,
        language: &str,
        token: String,
    ) -> Result<Bytes> {
        let response = self
            .http()
            .post(endpoint(auth, "speech/from-text"))
            .bearer_auth(token)
            .json(&SynthesisRequest { text, language })
            .send()
            .await
            .map_err(Error::Http)?;

        let response = check_status(response).await?;
        response.bytes().await.map_err(Error::Http)
    }
}
