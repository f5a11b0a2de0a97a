//! Lease: a claimed (Running) instance handed to one worker.

use std::sync::Arc;

use tokio::sync::watch;

use crate::domain::{InstanceId, TaskDefinition, TaskInstance};

/// A leased instance. The worker runs its body and hands it back to
/// [`JobEngine::complete`](super::JobEngine::complete) with the outcome.
///
/// - The instance snapshot is the row as it was when claimed.
/// - `cancel` flips to `true` when the instance is cancelled or superseded
///   while running.
pub struct Lease {
    pub(super) instance: TaskInstance,
    pub(super) definition: Arc<TaskDefinition>,
    pub(super) cancel: watch::Receiver<bool>,
}

impl Lease {
    pub fn id(&self) -> InstanceId {
        self.instance.id
    }

    pub fn name(&self) -> &str {
        &self.instance.name
    }

    pub fn instance(&self) -> &TaskInstance {
        &self.instance
    }

    pub fn definition(&self) -> &TaskDefinition {
        &self.definition
    }

    pub fn cancel_signal(&self) -> &watch::Receiver<bool> {
        &self.cancel
    }
}
