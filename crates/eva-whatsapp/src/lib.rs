//! eva-whatsapp: WhatsApp Cloud API bridge to the EVA conversational API
//!
//! Receives webhook notifications, keeps per-conversation sessions, relays
//! text and voice notes to EVA, and delivers the answers back through the
//! Graph API.

pub mod audio;
pub mod bot;
pub mod error;
pub mod graph;
pub mod orchestrator;
pub mod queue;
pub mod reaper;
pub mod tenant;
pub mod types;
pub mod webhook;

pub use audio::AudioBridge;
pub use bot::WhatsAppBot;
pub use error::{Result, WhatsAppError};
pub use graph::GraphClient;
pub use orchestrator::{Orchestrator, TurnOutcome};
pub use queue::{
    InMemoryQueue, MessageProcessor, Processed, QueueEnvelope, WorkQueue, spawn_workers,
};
pub use reaper::{ReapReport, Reaper, ReaperHandle};
pub use tenant::{RemoteTenants, StaticTenants, TenantDirectory};
pub use types::{InboundMessage, MessageKind, WebhookPayload};
pub use webhook::{Dispatch, WebhookServer, WebhookState};
