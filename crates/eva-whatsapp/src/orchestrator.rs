//! Conversation orchestrator
//!
//! Drives one inbound message through the session lifecycle:
//! resolve the session, transcribe voice notes, pick the template from the
//! session state, ask EVA, record the upstream session id, and reply.
//!
//! A reply produced with the greeting template is always followed by exactly
//! one context exchange for the same inbound text, so a first contact yields two
//! upstream exchanges and normally two replies.

use std::sync::Arc;

use chrono::Utc;
use eva_core::{
    AskRequest, BotConfig, EvaClient, ReplyMode, Session, SessionInit, SessionManager, Template,
};
use tracing::{debug, error, info, warn};

use crate::audio::AudioBridge;
use crate::error::{Result, WhatsAppError};
use crate::graph::GraphClient;
use crate::types::{InboundMessage, MessageKind};

/// How a turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Replies were produced for `exchanges` upstream exchanges
    Replied { exchanges: usize },
    /// The voice note produced no text; nothing was sent
    Unintelligible,
    /// The voice note could not be fetched or transcribed; nothing was sent
    AudioFailed,
    /// The turn failed and the apology was attempted
    Failed,
}

/// How an exchange picks its template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Greeting without an upstream session, context otherwise
    FromSession,
    /// Context with the inbound text, even if the greeting returned no session id
    FollowUp,
}

/// Conversation orchestrator
#[derive(Clone)]
pub struct Orchestrator {
    sessions: SessionManager,
    eva: EvaClient,
    graph: GraphClient,
    audio: AudioBridge,
}

impl Orchestrator {
    pub fn new(
        sessions: SessionManager,
        eva: EvaClient,
        graph: GraphClient,
        audio: AudioBridge,
    ) -> Self {
        Self {
            sessions,
            eva,
            graph,
            audio,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Handle one inbound message
    ///
    /// Never fails: errors are logged with the conversation key and message
    /// id, and the tenant's unexpected-error text is sent on a best-effort
    /// basis.
    pub async fn handle_inbound(&self, msg: &InboundMessage, config: Arc<BotConfig>) -> TurnOutcome {
        info!(
            key = %msg.conversation_key,
            message_id = %msg.message_id,
            "Handling inbound message"
        );

        match self.run_turn(msg, Arc::clone(&config)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    key = %msg.conversation_key,
                    message_id = %msg.message_id,
                    "Turn failed: {}",
                    e
                );
                self.send_apology(msg, &config).await;
                TurnOutcome::Failed
            }
        }
    }

    async fn run_turn(&self, msg: &InboundMessage, config: Arc<BotConfig>) -> Result<TurnOutcome> {
        let init = SessionInit {
            phone_number_id: msg.phone_number_id.clone(),
            reply_address: msg.reply_address.clone(),
            config,
        };
        let session = self
            .sessions
            .get_or_create(&msg.conversation_key, init.clone(), Utc::now())
            .await;

        let (query, reply_mode) = match &msg.kind {
            MessageKind::Text(body) => (body.clone(), ReplyMode::Text),
            MessageKind::Audio(media_id) => {
                match self
                    .audio
                    .fetch_and_transcribe(&session.config, media_id)
                    .await
                {
                    Ok(Some(text)) => (text, session.config.bot.reply_audio_type),
                    Ok(None) => {
                        info!(
                            key = %msg.conversation_key,
                            message_id = %msg.message_id,
                            "Voice note produced no text, skipping reply"
                        );
                        return Ok(TurnOutcome::Unintelligible);
                    }
                    Err(WhatsAppError::Core(e)) if e.is_auth() => return Err(e.into()),
                    Err(e) => {
                        warn!(
                            key = %msg.conversation_key,
                            message_id = %msg.message_id,
                            "Voice note dropped: {}",
                            e
                        );
                        return Ok(TurnOutcome::AudioFailed);
                    }
                }
            }
        };

        let mut exchanges = 1;
        let template = self
            .exchange(msg, &init, &query, reply_mode, Step::FromSession)
            .await?;
        if template == Template::Greeting {
            debug!(
                key = %msg.conversation_key,
                message_id = %msg.message_id,
                "Greeting sent, following up with the inbound text"
            );
            self.exchange(msg, &init, &query, reply_mode, Step::FollowUp)
                .await?;
            exchanges += 1;
        }

        Ok(TurnOutcome::Replied { exchanges })
    }

    /// One ask/reply round, returning the template that was used
    async fn exchange(
        &self,
        msg: &InboundMessage,
        init: &SessionInit,
        query: &str,
        reply_mode: ReplyMode,
        step: Step,
    ) -> Result<Template> {
        let key = &msg.conversation_key;
        let session = self
            .sessions
            .get_or_create(key, init.clone(), Utc::now())
            .await;

        let config = Arc::clone(&session.config);
        let pnid = &session.phone_number_id;
        let request = match (step, &session.upstream_session_id) {
            (Step::FromSession, None) => AskRequest::greeting(&config, pnid),
            (_, id) => AskRequest::context(&config, pnid, query, id.clone()),
        };

        let response = self.eva.ask(&config.auth, &request).await?;

        if let Some(id) = response.session_id.as_deref().filter(|id| !id.is_empty()) {
            self.sessions.set_upstream_session_id(key, id).await;
        }
        self.sessions.touch(key, Utc::now()).await;

        if response.message.is_empty() {
            warn!(key = %key, message_id = %msg.message_id, "EVA returned an empty message");
        } else {
            self.deliver(msg, &session, reply_mode, &response.message)
                .await?;
        }

        Ok(request.template)
    }

    /// Send a reply; delivery failures are logged, synthesis failures propagate
    async fn deliver(
        &self,
        msg: &InboundMessage,
        session: &Session,
        mode: ReplyMode,
        text: &str,
    ) -> Result<()> {
        let config = &session.config;
        let result = match mode {
            ReplyMode::Text => {
                self.graph
                    .send_text(
                        &config.whatsapp,
                        &session.phone_number_id,
                        &session.reply_address,
                        text,
                    )
                    .await
            }
            ReplyMode::Audio => {
                self.audio
                    .synthesize_and_deliver(
                        config,
                        &session.phone_number_id,
                        &session.reply_address,
                        text,
                    )
                    .await
            }
        };

        match result {
            Ok(()) => {
                self.sessions.touch(&session.key, Utc::now()).await;
                Ok(())
            }
            Err(WhatsAppError::Delivery(reason)) => {
                error!(
                    key = %session.key,
                    message_id = %msg.message_id,
                    "Failed to deliver reply: {}",
                    reason
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn send_apology(&self, msg: &InboundMessage, config: &BotConfig) {
        let text = config.bot.unexpected_error_message();
        if let Err(e) = self
            .graph
            .send_text(
                &config.whatsapp,
                &msg.phone_number_id,
                &msg.reply_address,
                text,
            )
            .await
        {
            error!(
                key = %msg.conversation_key,
                message_id = %msg.message_id,
                "Failed to send unexpected-error reply: {}",
                e
            );
        }
    }
}
