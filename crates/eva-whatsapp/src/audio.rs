//! Voice note bridge between the Graph API and the EVA speech endpoints
//!
//! Audio is staged in [`NamedTempFile`]s, which delete themselves when
//! dropped, so no exit path leaves an artifact behind.

use std::path::PathBuf;

use bytes::Bytes;
use eva_core::eva::SYNTHESIS_LANGUAGE;
use eva_core::{BotConfig, EvaClient};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{Result, WhatsAppError};
use crate::graph::GraphClient;

/// Audio bridge
#[derive(Clone)]
pub struct AudioBridge {
    eva: EvaClient,
    graph: GraphClient,
    scratch_dir: Option<PathBuf>,
}

impl AudioBridge {
    pub fn new(eva: EvaClient, graph: GraphClient) -> Self {
        Self {
            eva,
            graph,
            scratch_dir: None,
        }
    }

    /// Stage temporary audio under `dir` instead of the system temp directory
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Download a voice note and transcribe it
    ///
    /// Returns `None` when nothing intelligible was recognized.
    pub async fn fetch_and_transcribe(
        &self,
        config: &BotConfig,
        media_id: &str,
    ) -> Result<Option<String>> {
        info!("Fetching voice note {}", media_id);

        let url = self.graph.media_url(&config.whatsapp, media_id).await?;
        let audio = self.graph.download_media(&config.whatsapp, &url).await?;
        debug!("Downloaded {} bytes for {}", audio.len(), media_id);

        let file = self
            .stage(media_id, &audio)
            .await
            .map_err(|e| WhatsAppError::MediaFetch(format!("failed to stage {}: {}", media_id, e)))?;

        let text = self
            .eva
            .speech_from_audio(&config.auth, file.path())
            .await?;
        drop(file);

        if text.is_empty() {
            return Ok(None);
        }
        Ok(Some(text))
    }

    /// Text-to-speech with the fixed `pt` language
    pub async fn synthesize(&self, config: &BotConfig, text: &str) -> Result<Bytes> {
        let audio = self
            .eva
            .speech_from_text(&config.auth, text, SYNTHESIS_LANGUAGE)
            .await?;
        Ok(audio)
    }

    /// Synthesize `text` and send it as a voice message
    ///
    /// Synthesis failures surface as [`WhatsAppError::Core`]; everything
    /// after synthesis is a [`WhatsAppError::Delivery`].
    pub async fn synthesize_and_deliver(
        &self,
        config: &BotConfig,
        phone_number_id: &str,
        to: &str,
        text: &str,
    ) -> Result<()> {
        let audio = self.synthesize(config, text).await?;

        let file = self
            .stage("reply", &audio)
            .await
            .map_err(|e| WhatsAppError::Delivery(format!("failed to stage reply audio: {}", e)))?;

        self.graph
            .send_audio(&config.whatsapp, phone_number_id, to, file.path())
            .await
    }

    async fn stage(&self, prefix: &str, audio: &[u8]) -> std::io::Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix).suffix(".mp3");
        let file = match &self.scratch_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };

        tokio::fs::write(file.path(), audio).await?;
        debug!("Staged audio at {}", file.path().display());
        Ok(file)
    }
}
