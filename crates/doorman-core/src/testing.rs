//! Test helpers shared by engine and app tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::domain::SyncError;
use crate::ports::SyncUnit;

/// SyncUnit that fails with scripted errors (in order), then succeeds.
/// A gated unit blocks inside `sync` until `open` is called.
pub(crate) struct ScriptedUnit {
    name: &'static str,
    calls: AtomicUsize,
    script: Mutex<VecDeque<SyncError>>,
    gate: Option<Semaphore>,
}

impl ScriptedUnit {
    pub(crate) fn ok(name: &'static str) -> Arc<Self> {
        Self::build(name, Vec::new(), None)
    }

    pub(crate) fn failing(name: &'static str, errors: Vec<SyncError>) -> Arc<Self> {
        Self::build(name, errors, None)
    }

    pub(crate) fn gated(name: &'static str) -> Arc<Self> {
        Self::build(name, Vec::new(), Some(Semaphore::new(0)))
    }

    fn build(name: &'static str, errors: Vec<SyncError>, gate: Option<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            name,
            calls: AtomicUsize::new(0),
            script: Mutex::new(errors.into()),
            gate,
        })
    }

    pub(crate) fn open(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SyncUnit for ScriptedUnit {
    fn name(&self) -> &str {
        self.name
    }

    async fn sync(&self) -> Result<(), SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.expect("gate closed");
        }
        match self.script.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Poll `cond` on the (usually paused) tokio clock until it holds.
pub(crate) async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..20_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("timed out waiting for: {what}");
}
