//! In-process work queue
//!
//! Webhook events are wrapped in a [`QueueEnvelope`] and handed to a pool of
//! worker tasks. Delivery is at-least-once from the provider's point of view,
//! so [`MessageProcessor`] skips message ids it has already seen.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use eva_core::BotConfig;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{Result, WhatsAppError};
use crate::orchestrator::{Orchestrator, TurnOutcome};
use crate::types::{InboundMessage, WebhookPayload};

/// Unit of work: the raw webhook event plus the tenant configuration it
/// resolved to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEnvelope {
    pub message_id: String,
    pub event: serde_json::Value,
    pub bot_config: BotConfig,
}

/// Queue accepting envelopes for asynchronous processing
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn enqueue(&self, envelope: QueueEnvelope) -> Result<()>;
}

/// Bounded queue over a tokio channel
#[derive(Clone)]
pub struct InMemoryQueue {
    tx: mpsc::Sender<QueueEnvelope>,
}

/// Receiving side shared by the workers
pub struct QueueReceiver {
    rx: Arc<Mutex<mpsc::Receiver<QueueEnvelope>>>,
}

impl InMemoryQueue {
    pub fn new(capacity: usize) -> (Self, QueueReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self { tx },
            QueueReceiver {
                rx: Arc::new(Mutex::new(rx)),
            },
        )
    }
}

#[async_trait]
impl WorkQueue for InMemoryQueue {
    async fn enqueue(&self, envelope: QueueEnvelope) -> Result<()> {
        let message_id = envelope.message_id.clone();
        self.tx.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => WhatsAppError::Queue("queue is full".to_string()),
            mpsc::error::TrySendError::Closed(_) => WhatsAppError::Queue("queue is closed".to_string()),
        })?;
        debug!(message_id = %message_id, "Message enqueued");
        Ok(())
    }
}

/// Provider message ids processed recently
#[derive(Debug)]
pub struct SeenMessages {
    window: Duration,
    seen: DashMap<String, Instant>,
}

impl SeenMessages {
    const PURGE_THRESHOLD: usize = 1024;

    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: DashMap::new(),
        }
    }

    /// Record `message_id`, returning `false` if it was seen inside the window
    pub fn first_sighting(&self, message_id: &str) -> bool {
        if message_id.is_empty() {
            return true;
        }

        let now = Instant::now();
        if self.seen.len() > Self::PURGE_THRESHOLD {
            self.seen.retain(|_, at| now.duration_since(*at) < self.window);
        }

        let mut fresh = true;
        self.seen
            .entry(message_id.to_string())
            .and_modify(|at| {
                if now.duration_since(*at) < self.window {
                    fresh = false;
                } else {
                    *at = now;
                }
            })
            .or_insert(now);
        fresh
    }

    /// Make `message_id` eligible for processing again
    pub fn forget(&self, message_id: &str) {
        self.seen.remove(message_id);
    }
}

/// Result of [`MessageProcessor::process_message`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    /// Already handled inside the dedup window
    Duplicate,
    Turn(TurnOutcome),
}

/// Normalizes envelopes and runs them through the orchestrator
#[derive(Clone)]
pub struct MessageProcessor {
    orchestrator: Orchestrator,
    timeout: Duration,
    seen: Arc<SeenMessages>,
}

impl MessageProcessor {
    pub fn new(orchestrator: Orchestrator, timeout: Duration, dedup_window: Duration) -> Self {
        Self {
            orchestrator,
            timeout,
            seen: Arc::new(SeenMessages::new(dedup_window)),
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Process one envelope under the processing timeout
    ///
    /// A timed-out message is forgotten by the dedup set so a redelivery is
    /// processed again.
    pub async fn process_message(&self, envelope: QueueEnvelope) -> Result<Processed> {
        let message_id = envelope.message_id.clone();
        info!(message_id = %message_id, "Processing message");

        if !self.seen.first_sighting(&message_id) {
            info!(message_id = %message_id, "Duplicate delivery, skipping");
            return Ok(Processed::Duplicate);
        }

        let payload: WebhookPayload = serde_json::from_value(envelope.event)
            .map_err(|e| WhatsAppError::Validation(e.to_string()))?;
        let msg = InboundMessage::from_payload(&payload)?;
        let config = Arc::new(envelope.bot_config);

        match tokio::time::timeout(self.timeout, self.orchestrator.handle_inbound(&msg, config)).await {
            Ok(outcome) => Ok(Processed::Turn(outcome)),
            Err(_) => {
                self.seen.forget(&message_id);
                Err(WhatsAppError::Timeout(format!(
                    "message {} not processed within {:?}",
                    message_id, self.timeout
                )))
            }
        }
    }
}

/// Log the end of processing; nothing is propagated past this point
pub(crate) fn log_result(message_id: &str, result: Result<Processed>) {
    match result {
        Ok(processed) => debug!(message_id = %message_id, "Processed: {:?}", processed),
        Err(WhatsAppError::Validation(reason)) => {
            warn!(message_id = %message_id, "Dropping invalid message: {}", reason)
        }
        Err(WhatsAppError::UnsupportedMessageType(kind)) => {
            warn!(message_id = %message_id, "Dropping unsupported message type: {}", kind)
        }
        Err(e) => error!(message_id = %message_id, "Processing error: {}", e),
    }
}

/// Handle to the running workers
pub struct WorkersHandle {
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkersHandle {
    /// Stop taking new envelopes and wait for in-flight ones
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        join_all(self.handles).await;
    }
}

/// Start `workers` tasks draining the queue
pub fn spawn_workers(
    processor: MessageProcessor,
    receiver: QueueReceiver,
    workers: usize,
) -> WorkersHandle {
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let workers = workers.max(1);
    info!("Starting {} queue workers", workers);

    let handles = (0..workers)
        .map(|id| {
            let processor = processor.clone();
            let rx = Arc::clone(&receiver.rx);
            let mut shutdown_rx = shutdown_tx.subscribe();

            tokio::spawn(async move {
                loop {
                    let next = {
                        let mut rx = rx.lock().await;
                        tokio::select! {
                            envelope = rx.recv() => envelope,
                            _ = shutdown_rx.recv() => None,
                        }
                    };

                    let Some(envelope) = next else {
                        debug!("Queue worker {} stopped", id);
                        break;
                    };

                    let message_id = envelope.message_id.clone();
                    let result = processor.process_message(envelope).await;
                    log_result(&message_id, result);
                }
            })
        })
        .collect();

    WorkersHandle {
        shutdown_tx,
        handles,
    }
}
