//! Inactivity reaper
//!
//! Periodically removes sessions idle for longer than their captured timeout.
//! Sessions with a farewell configured are removed only once the farewell was
//! delivered, unless `drop_on_notify_failure` is set; a failed farewell is
//! retried on the next sweep.

use std::time::Duration;

use chrono::{DateTime, Utc};
use eva_core::{Session, SessionManager};
use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::graph::GraphClient;

/// Result of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Sessions found expired by the scan
    pub expired: usize,
    /// Sessions actually removed
    pub removed: usize,
    /// Farewells delivered
    pub notified: usize,
    /// Farewells that failed to send
    pub failed: usize,
}

enum Reaped {
    Removed { notified: bool },
    NotifyFailed { removed: bool },
    /// Refreshed between the scan and the removal
    Kept,
}

/// Inactivity reaper
#[derive(Clone)]
pub struct Reaper {
    sessions: SessionManager,
    graph: GraphClient,
    drop_on_notify_failure: bool,
}

/// Handle to a running reaper task
pub struct ReaperHandle {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl ReaperHandle {
    /// Stop the reaper and wait for the current sweep to finish
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}

impl Reaper {
    pub fn new(sessions: SessionManager, graph: GraphClient) -> Self {
        Self {
            sessions,
            graph,
            drop_on_notify_failure: false,
        }
    }

    /// Remove sessions even when their farewell could not be sent
    pub fn drop_on_notify_failure(mut self, drop: bool) -> Self {
        self.drop_on_notify_failure = drop;
        self
    }

    /// Expire every session idle at `now`
    ///
    /// Sessions are handled concurrently and independently; one failing
    /// farewell does not hold back the others.
    pub async fn sweep(&self, now: DateTime<Utc>) -> ReapReport {
        let expired = self.sessions.scan_expired(now).await;
        let mut report = ReapReport {
            expired: expired.len(),
            ..ReapReport::default()
        };
        if expired.is_empty() {
            return report;
        }

        debug!("Reaping {} expired sessions", expired.len());
        let results = join_all(
            expired
                .into_iter()
                .map(|(key, session)| self.reap(key, session, now)),
        )
        .await;

        for result in results {
            match result {
                Reaped::Removed { notified } => {
                    report.removed += 1;
                    if notified {
                        report.notified += 1;
                    }
                }
                Reaped::NotifyFailed { removed } => {
                    report.failed += 1;
                    if removed {
                        report.removed += 1;
                    }
                }
                Reaped::Kept => {}
            }
        }

        info!(
            "Reaper sweep: {} expired, {} removed, {} notified, {} failed",
            report.expired, report.removed, report.notified, report.failed
        );
        report
    }

    async fn reap(&self, key: String, session: Session, now: DateTime<Utc>) -> Reaped {
        let Some(farewell) = session.config.bot.farewell() else {
            return match self.sessions.remove_if_expired(&key, now).await {
                Some(_) => {
                    info!(key = %key, "Session expired and removed");
                    Reaped::Removed { notified: false }
                }
                None => Reaped::Kept,
            };
        };

        // Skip the farewell if a message arrived after the scan
        match self.sessions.get(&key).await {
            Some(current) if current.is_expired(now) => {}
            _ => return Reaped::Kept,
        }

        let sent = self
            .graph
            .send_text(
                &session.config.whatsapp,
                &session.phone_number_id,
                &session.reply_address,
                farewell,
            )
            .await;

        match sent {
            Ok(()) => {
                let removed = self.sessions.remove_if_expired(&key, now).await.is_some();
                info!(key = %key, "Session expired, farewell sent");
                if removed {
                    Reaped::Removed { notified: true }
                } else {
                    Reaped::Kept
                }
            }
            Err(e) => {
                error!(key = %key, "Failed to send farewell: {}", e);
                let removed = self.drop_on_notify_failure
                    && self.sessions.remove_if_expired(&key, now).await.is_some();
                Reaped::NotifyFailed { removed }
            }
        }
    }

    /// Sweep every `interval` until stopped
    pub fn spawn(self, interval: Duration) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);

        let handle = tokio::spawn(async move {
            info!("Reaper started (every {:?})", interval);
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep(Utc::now()).await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Reaper stopped");
                        break;
                    }
                }
            }
        });

        ReaperHandle {
            shutdown_tx,
            handle,
        }
    }
}
