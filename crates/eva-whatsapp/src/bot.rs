//! WhatsApp bot wiring

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use eva_core::{Config, CredentialCache, EvaClient, SessionManager};
use tracing::info;

use crate::audio::AudioBridge;
use crate::error::Result;
use crate::graph::GraphClient;
use crate::orchestrator::Orchestrator;
use crate::queue::{InMemoryQueue, MessageProcessor, spawn_workers};
use crate::reaper::Reaper;
use crate::tenant::{self, TenantDirectory};
use crate::webhook::{Dispatch, WebhookServer, WebhookState};

/// WhatsApp bot: webhook server, optional queue workers and the reaper
pub struct WhatsAppBot {
    config: Config,
    sessions: SessionManager,
    graph: GraphClient,
    orchestrator: Orchestrator,
    tenants: Arc<dyn TenantDirectory>,
}

impl WhatsAppBot {
    /// Create a new WhatsApp bot
    pub fn new(config: Config) -> Result<Self> {
        let sessions = SessionManager::in_memory();
        let eva = EvaClient::new(CredentialCache::new())?;
        let graph = GraphClient::new()?;

        let mut audio = AudioBridge::new(eva.clone(), graph.clone());
        if let Some(dir) = &config.server.scratch_dir {
            audio = audio.with_scratch_dir(dir);
        }

        let orchestrator = Orchestrator::new(sessions.clone(), eva, graph.clone(), audio);
        let tenants = tenant::from_config(&config.tenants)?;

        Ok(Self {
            config,
            sessions,
            graph,
            orchestrator,
            tenants,
        })
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Run until `shutdown` resolves, then stop the background tasks
    pub async fn start(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let queue = &self.config.queue;
        let processor = MessageProcessor::new(
            self.orchestrator.clone(),
            Duration::from_secs(queue.processing_timeout_secs),
            Duration::from_secs(queue.dedup_window_secs),
        );

        let (dispatch, workers) = if queue.enabled {
            let (work_queue, receiver) = InMemoryQueue::new(queue.capacity);
            let workers = spawn_workers(processor, receiver, queue.workers);
            (Dispatch::Queued(Arc::new(work_queue)), Some(workers))
        } else {
            info!("Queue disabled, processing messages inline");
            (Dispatch::Inline(processor), None)
        };

        let reaper = Reaper::new(self.sessions.clone(), self.graph.clone())
            .drop_on_notify_failure(self.config.reaper.drop_on_notify_failure)
            .spawn(Duration::from_secs(self.config.reaper.interval_secs.max(1)));

        let state = WebhookState {
            verify_token: self.config.server.verify_token.clone(),
            app_secret: self.config.server.app_secret.clone(),
            tenants: Arc::clone(&self.tenants),
            dispatch,
        };
        let addr: SocketAddr = ([0, 0, 0, 0], self.config.server.port).into();
        let result = WebhookServer::new(addr, state).start(shutdown).await;

        reaper.stop().await;
        if let Some(workers) = workers {
            workers.stop().await;
        }
        result
    }
}
