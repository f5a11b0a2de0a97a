//! JobEngine: durable queue and executor for sync tasks.
//!
//! The engine owns the instance table (through a [`TaskStore`]) and is the
//! only writer to it. Workers lease runnable instances, run their bodies and
//! hand the outcome back; the engine then retires, retries or re-arms.
//!
//! Runnable means: `Enqueued`, past `next_eligible_at`, constraints satisfied
//! and no execution of the same name still in flight in this process. The
//! in-flight set also covers a cancelled body that is finishing its current
//! unit, so a replacement never runs alongside it.

mod body;
mod lease;
mod registry;
mod status;
mod worker;

pub use body::run_body;
pub use lease::Lease;
pub use registry::{DefinitionRegistry, RegistryError};
pub use status::InstanceCounts;
pub use worker::WorkerGroup;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify, watch};
use tracing::{debug, error, info, warn};

use crate::domain::definition::add_duration;
use crate::domain::{
    InstanceId, InstanceState, Outcome, OutcomeKind, TaskDefinition, TaskInstance,
};
use crate::error::{EngineError, StoreError};
use crate::ports::{Admission, Clock, Connectivity, IdGenerator, TaskStore, UlidGenerator};

/// Default number of terminal rows kept per name.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// How long to back off after a store error.
const STORE_ERROR_PAUSE: Duration = Duration::from_secs(1);

/// Store writes tried per outcome before the lease is released.
const RECORD_ATTEMPTS: u32 = 3;

const INTERRUPTED: &str = "interrupted before an outcome was recorded";

/// Execution currently owned by a worker.
struct InFlight {
    id: InstanceId,
    cancel: watch::Sender<bool>,
}

enum Claim {
    Leased(Lease),
    Idle { wake_at: Option<DateTime<Utc>> },
}

/// What `recover` did at start-up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Instances found `Running` and rescheduled as retries.
    pub interrupted: Vec<InstanceId>,
    /// Non-terminal instances whose name has no registered definition.
    pub orphaned: Vec<InstanceId>,
    /// Terminal rows pruned from history.
    pub pruned: usize,
}

pub struct JobEngine {
    store: Arc<dyn TaskStore>,
    registry: DefinitionRegistry,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    network: Arc<dyn Connectivity>,
    history_limit: usize,

    in_flight: Mutex<HashMap<String, InFlight>>,
    notify: Notify,
}

impl JobEngine {
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: DefinitionRegistry,
        clock: Arc<dyn Clock>,
        network: Arc<dyn Connectivity>,
    ) -> Self {
        let ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        Self {
            store,
            registry,
            clock,
            ids,
            network,
            history_limit: DEFAULT_HISTORY_LIMIT,
            in_flight: Mutex::new(HashMap::new()),
            notify: Notify::new(),
        }
    }

    pub fn with_history_limit(mut self, history_limit: usize) -> Self {
        self.history_limit = history_limit;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn registry(&self) -> &DefinitionRegistry {
        &self.registry
    }

    /// Recover, then spawn `workers` workers.
    pub async fn start(self: &Arc<Self>, workers: usize) -> Result<WorkerGroup, EngineError> {
        let report = self.recover().await?;
        info!(
            workers,
            interrupted = report.interrupted.len(),
            orphaned = report.orphaned.len(),
            pruned = report.pruned,
            "job engine started"
        );
        Ok(WorkerGroup::spawn(workers, Arc::clone(self)))
    }

    /// Submit an instance of definition `name` under its dedup policy.
    pub async fn enqueue(&self, name: &str) -> Result<Admission, EngineError> {
        let definition = self
            .registry
            .get(name)
            .ok_or_else(|| EngineError::UnknownTask(name.to_string()))?;

        let now = self.clock.now();
        let instance = TaskInstance::new(self.ids.generate_instance_id(), &definition, now);
        let admission = self.store.submit(instance, definition.dedup_policy())?;

        match admission {
            Admission::Installed { id, replaced } => {
                if let Some(old) = replaced {
                    self.signal_cancel(name, old).await;
                    info!(task = name, instance = %id, replaced = %old, "enqueued, replacing previous instance");
                    self.trim_history(name);
                } else {
                    info!(task = name, instance = %id, "enqueued");
                }
                self.notify.notify_one();
            }
            Admission::Kept { id } => {
                debug!(task = name, instance = %id, "already active; keeping existing instance");
            }
            Admission::Appended { id, queued_runs } => {
                info!(task = name, instance = %id, queued_runs, "already active; queued another run");
            }
        }
        Ok(admission)
    }

    /// Cancel the non-terminal instance of `name`. A running body is asked
    /// to stop before its next unit.
    pub async fn cancel(&self, name: &str) -> Result<Option<InstanceId>, EngineError> {
        let cancelled = self.store.cancel_active(name, self.clock.now())?;
        match cancelled {
            Some(id) => {
                self.signal_cancel(name, id).await;
                info!(task = name, instance = %id, "cancelled");
                self.trim_history(name);
                self.notify.notify_one();
            }
            None => debug!(task = name, "nothing to cancel"),
        }
        Ok(cancelled)
    }

    async fn signal_cancel(&self, name: &str, id: InstanceId) {
        let in_flight = self.in_flight.lock().await;
        if let Some(entry) = in_flight.get(name)
            && entry.id == id
        {
            // Ignore send error: the body may already have finished.
            let _ = entry.cancel.send(true);
        }
    }

    /// Wait until an instance is runnable and claim it (`Enqueued -> Running`).
    ///
    /// Cancel-safe: there is no await between claiming a row and returning.
    pub async fn lease(&self) -> Lease {
        loop {
            // subscribe 時点の値は既読扱い。claim 中の変化だけを拾う
            let mut connectivity = self.network.subscribe();

            let wake_at = match self.try_claim().await {
                Ok(Claim::Leased(lease)) => {
                    // Let another worker look for the next runnable instance.
                    self.notify.notify_one();
                    return lease;
                }
                Ok(Claim::Idle { wake_at }) => wake_at,
                Err(err) => {
                    error!(error = %err, "failed to read task store while leasing");
                    Some(add_duration(self.clock.now(), STORE_ERROR_PAUSE))
                }
            };

            let sleep_for =
                wake_at.map(|at| (at - self.clock.now()).to_std().unwrap_or(Duration::ZERO));

            tokio::select! {
                _ = self.notify.notified() => {},
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        // Connectivity source is gone; fall back to timers and notifications.
                        wait(&self.notify, sleep_for).await;
                    }
                },
                _ = sleep_opt(sleep_for) => {},
            }
        }
    }

    // Store calls below are synchronous and run under the `in_flight` lock.
    // Each is one short transaction on a table bounded by the task names of
    // one device plus their pruned history.
    async fn try_claim(&self) -> Result<Claim, StoreError> {
        let mut in_flight = self.in_flight.lock().await;
        let now = self.clock.now();
        self.release_stranded(&in_flight, now)?;
        let mut wake_at = self.promote_due(now)?;
        let online = self.network.is_online();

        for instance in self.store.list_in_state(InstanceState::Enqueued)? {
            if !instance.is_due(now) {
                wake_at = earliest(wake_at, instance.next_eligible_at);
                continue;
            }
            if in_flight.contains_key(&instance.name) {
                continue;
            }
            let Some(definition) = self.registry.get(&instance.name) else {
                continue;
            };
            if definition.constraints().requires_network && !online {
                continue;
            }

            let claimed = self
                .store
                .transition(instance.id, InstanceState::Enqueued, &mut |r| {
                    r.start(now);
                    None
                })?;
            let Some(instance) = claimed else {
                continue;
            };

            let (cancel_tx, cancel_rx) = watch::channel(false);
            in_flight.insert(
                instance.name.clone(),
                InFlight {
                    id: instance.id,
                    cancel: cancel_tx,
                },
            );
            debug!(task = %instance.name, instance = %instance.id, attempts = instance.attempts, "leased");
            return Ok(Claim::Leased(Lease {
                instance,
                definition,
                cancel: cancel_rx,
            }));
        }

        Ok(Claim::Idle { wake_at })
    }

    /// `Running` rows that no worker owns lost their outcome to a store
    /// error. They go back to `Retry` as an interrupted attempt.
    fn release_stranded(
        &self,
        in_flight: &HashMap<String, InFlight>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        for instance in self.store.list_in_state(InstanceState::Running)? {
            let owned = in_flight
                .get(&instance.name)
                .is_some_and(|entry| entry.id == instance.id);
            if owned {
                continue;
            }
            if let Some(r) = self.reschedule_interrupted(&instance, now)? {
                warn!(task = %r.name, instance = %r.id, attempts = r.attempts, "released stranded instance");
            }
        }
        Ok(())
    }

    fn reschedule_interrupted(
        &self,
        instance: &TaskInstance,
        now: DateTime<Utc>,
    ) -> Result<Option<TaskInstance>, StoreError> {
        let Some(definition) = self.registry.get(&instance.name) else {
            return Ok(None);
        };
        let backoff = definition.backoff_policy();
        self.store
            .transition(instance.id, InstanceState::Running, &mut |r| {
                r.schedule_retry(&backoff, INTERRUPTED.to_string(), now);
                None
            })
    }

    /// `Retry -> Enqueued` for every instance whose backoff has elapsed.
    /// Returns the earliest eligibility among retries still waiting.
    fn promote_due(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, StoreError> {
        let mut wake_at = None;
        for instance in self.store.list_in_state(InstanceState::Retry)? {
            if instance.next_eligible_at > now {
                wake_at = earliest(wake_at, instance.next_eligible_at);
                continue;
            }
            self.store
                .transition(instance.id, InstanceState::Retry, &mut |r| {
                    r.promote(now);
                    None
                })?;
        }
        Ok(wake_at)
    }

    /// Record the outcome of a leased instance and release its name.
    ///
    /// A failed store write is retried while the name stays claimed. If it
    /// keeps failing the name is released anyway and the row, still
    /// `Running`, is picked up by the next lease as an interrupted attempt.
    pub async fn complete(&self, lease: Lease, outcome: Outcome) -> Result<(), EngineError> {
        let Lease {
            instance,
            definition,
            ..
        } = lease;

        let mut attempt = 1;
        let recorded = loop {
            match self.record(&instance, &definition, &outcome) {
                Ok(row) => break Ok(row),
                Err(err) if attempt < RECORD_ATTEMPTS => {
                    warn!(task = %instance.name, instance = %instance.id, attempt, error = %err, "failed to record outcome; retrying");
                    attempt += 1;
                    tokio::time::sleep(STORE_ERROR_PAUSE).await;
                }
                Err(err) => break Err(err),
            }
        };

        {
            let mut in_flight = self.in_flight.lock().await;
            if in_flight
                .get(&instance.name)
                .is_some_and(|entry| entry.id == instance.id)
            {
                in_flight.remove(&instance.name);
            }
        }
        self.notify.notify_one();

        match &recorded {
            Ok(Some(_)) => self.trim_history(&instance.name),
            Ok(None) => {
                debug!(task = %instance.name, instance = %instance.id, outcome = ?outcome.kind, "instance no longer running; outcome discarded");
                self.trim_history(&instance.name);
            }
            Err(_) => {}
        }
        recorded.map(|_| ()).map_err(EngineError::from)
    }

    /// Apply `outcome` to the `Running` row in one store transaction,
    /// installing the successor instance when there is one.
    fn record(
        &self,
        instance: &TaskInstance,
        definition: &TaskDefinition,
        outcome: &Outcome,
    ) -> Result<Option<TaskInstance>, StoreError> {
        let now = self.clock.now();
        match outcome.kind {
            OutcomeKind::Success => {
                let next_id = self.ids.generate_instance_id();
                let row = self
                    .store
                    .transition(instance.id, InstanceState::Running, &mut |r| {
                        r.succeed(now);
                        r.successor(next_id, now)
                    })?;
                if let Some(r) = &row {
                    info!(task = %r.name, instance = %r.id, "succeeded");
                }
                Ok(row)
            }
            OutcomeKind::Retry => {
                let backoff = definition.backoff_policy();
                let error_text = outcome.error_text().unwrap_or_default();
                let row = self
                    .store
                    .transition(instance.id, InstanceState::Running, &mut |r| {
                        r.schedule_retry(&backoff, error_text.clone(), now);
                        None
                    })?;
                if let Some(r) = &row {
                    warn!(
                        task = %r.name,
                        instance = %r.id,
                        attempts = r.attempts,
                        next_eligible_at = %r.next_eligible_at,
                        error = %error_text,
                        "attempt failed; retry scheduled"
                    );
                }
                Ok(row)
            }
            OutcomeKind::Failed => {
                let next_id = self.ids.generate_instance_id();
                let error_text = outcome.error_text().unwrap_or_default();
                let row = self
                    .store
                    .transition(instance.id, InstanceState::Running, &mut |r| {
                        r.fail(error_text.clone(), now);
                        r.successor(next_id, now)
                    })?;
                if let Some(r) = &row {
                    warn!(task = %r.name, instance = %r.id, error = %error_text, "permanent failure; not retrying");
                }
                Ok(row)
            }
            OutcomeKind::Cancelled => Ok(None),
        }
    }

    /// Keep at most `history_limit` terminal rows for `name`.
    fn trim_history(&self, name: &str) {
        match self.store.prune_name(name, self.history_limit) {
            Ok(0) => {}
            Ok(pruned) => debug!(task = name, pruned, "pruned history"),
            Err(err) => warn!(task = name, error = %err, "failed to prune history"),
        }
    }

    /// Reconcile the table after a restart.
    ///
    /// - `Running` rows were interrupted mid-attempt: the attempt counts as a
    ///   transient failure and is rescheduled with backoff.
    /// - Non-terminal rows with no registered definition are cancelled.
    /// - Terminal history is pruned to the configured limit.
    ///
    /// Must run before workers start.
    pub async fn recover(&self) -> Result<RecoveryReport, EngineError> {
        let _in_flight = self.in_flight.lock().await;
        let now = self.clock.now();
        let mut report = RecoveryReport::default();

        for instance in self.store.list_in_state(InstanceState::Running)? {
            if let Some(r) = self.reschedule_interrupted(&instance, now)? {
                warn!(task = %r.name, instance = %r.id, attempts = r.attempts, "recovered interrupted instance");
                report.interrupted.push(r.id);
            }
        }

        for state in [
            InstanceState::Enqueued,
            InstanceState::Running,
            InstanceState::Retry,
        ] {
            for instance in self.store.list_in_state(state)? {
                if self.registry.contains(&instance.name) {
                    continue;
                }
                if let Some(id) = self.store.cancel_active(&instance.name, now)? {
                    warn!(task = %instance.name, instance = %id, "no definition registered; cancelled");
                    report.orphaned.push(id);
                }
            }
        }

        report.pruned = self.store.prune_history(self.history_limit)?;
        Ok(report)
    }

    pub fn counts(&self) -> Result<InstanceCounts, EngineError> {
        Ok(InstanceCounts {
            enqueued: self.store.count_in_state(InstanceState::Enqueued)?,
            running: self.store.count_in_state(InstanceState::Running)?,
            retry: self.store.count_in_state(InstanceState::Retry)?,
            success: self.store.count_in_state(InstanceState::Success)?,
            cancelled: self.store.count_in_state(InstanceState::Cancelled)?,
            failed: self.store.count_in_state(InstanceState::Failed)?,
        })
    }

    /// The non-terminal instance of `name`, if any.
    pub fn active(&self, name: &str) -> Result<Option<TaskInstance>, EngineError> {
        Ok(self.store.active(name)?)
    }

    pub fn get(&self, id: InstanceId) -> Result<Option<TaskInstance>, EngineError> {
        Ok(self.store.get(id)?)
    }

    /// Terminal instances of `name`, newest first.
    pub fn history(&self, name: &str, limit: usize) -> Result<Vec<TaskInstance>, EngineError> {
        Ok(self.store.history(name, limit)?)
    }

    /// Names with an execution currently owned by a worker.
    pub async fn in_flight(&self) -> Vec<String> {
        let mut names: Vec<String> = self.in_flight.lock().await.keys().cloned().collect();
        names.sort();
        names
    }
}

fn earliest(current: Option<DateTime<Utc>>, candidate: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Some(current.map_or(candidate, |c| c.min(candidate)))
}

async fn sleep_opt(duration: Option<Duration>) {
    match duration {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}

async fn wait(notify: &Notify, duration: Option<Duration>) {
    tokio::select! {
        _ = notify.notified() => {},
        _ = sleep_opt(duration) => {},
    }
}
