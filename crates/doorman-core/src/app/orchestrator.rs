//! SyncOrchestrator - session / UI events を JobEngine への submit に変換
//!
//! 4 つの操作は fire-and-forget。結果（同期が最終的に成功したか）は返さず、
//! store の失敗はログに残すだけです。

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::tasks::{CONTACTS, FETCH_ONCE, FETCH_PERIODIC, PUSH};
use crate::engine::JobEngine;

/// Session lifecycle events raised by the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn,
    LoggedOut,
}

#[derive(Clone)]
pub struct SyncOrchestrator {
    engine: Arc<JobEngine>,
}

impl SyncOrchestrator {
    pub fn new(engine: Arc<JobEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<JobEngine> {
        &self.engine
    }

    /// Fetch everything now, and (re-)arm the recurring fetch.
    pub async fn initialize_data_sync(&self) {
        info!("initializing data sync");
        self.submit(FETCH_ONCE).await;
        self.submit(FETCH_PERIODIC).await;
    }

    /// Stop the recurring fetch. One-off work is left alone.
    pub async fn cancel_periodic_sync(&self) {
        if let Err(e) = self.engine.cancel(FETCH_PERIODIC).await {
            error!(task = FETCH_PERIODIC, error = %e, "failed to cancel periodic sync");
        }
    }

    pub async fn enqueue_push(&self) {
        self.submit(PUSH).await;
    }

    pub async fn enqueue_contact_sync(&self) {
        self.submit(CONTACTS).await;
    }

    pub async fn handle(&self, event: SessionEvent) {
        match event {
            SessionEvent::LoggedIn => self.initialize_data_sync().await,
            SessionEvent::LoggedOut => self.cancel_periodic_sync().await,
        }
    }

    /// Drive the orchestrator from a session event stream until the sender
    /// side is dropped.
    pub fn spawn_session_listener(&self, mut events: mpsc::Receiver<SessionEvent>) -> JoinHandle<()> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                info!(?event, "session event");
                orchestrator.handle(event).await;
            }
        })
    }

    async fn submit(&self, name: &str) {
        if let Err(e) = self.engine.enqueue(name).await {
            error!(task = name, error = %e, "failed to enqueue sync task");
        }
    }
}
