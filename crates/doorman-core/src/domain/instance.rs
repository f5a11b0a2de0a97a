//! Task instance record: one occurrence of a definition.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::backoff::BackoffPolicy;
use super::definition::{TaskDefinition, TriggerKind, add_duration};
use super::ids::InstanceId;
use super::state::InstanceState;

/// Persisted occurrence of a [`TaskDefinition`].
///
/// Design:
/// - This is the single source of truth for instance state.
/// - Stores hold these records; every transition goes through a method here
///   so in-memory and SQLite stores share the same rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInstance {
    pub id: InstanceId,
    pub name: String,
    pub state: InstanceState,

    /// Number of failed attempts so far (0 for a fresh instance).
    pub attempts: u32,

    /// Earliest time the scheduler may start this instance.
    pub next_eligible_at: DateTime<Utc>,

    pub trigger: TriggerKind,
    pub interval: Option<Duration>,

    pub last_error: Option<String>,

    /// Extra full runs requested by `Append` enqueues while this instance
    /// was active. Each becomes a fresh instance once this one retires.
    pub queued_runs: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskInstance {
    pub fn new(id: InstanceId, definition: &TaskDefinition, now: DateTime<Utc>) -> Self {
        let trigger = definition.trigger();
        Self {
            id,
            name: definition.name().to_string(),
            state: InstanceState::Enqueued,
            attempts: 0,
            next_eligible_at: trigger.first_eligible_at(now),
            trigger: trigger.kind(),
            interval: trigger.interval(),
            last_error: None,
            queued_runs: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Enqueued and past its eligibility time.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == InstanceState::Enqueued && self.next_eligible_at <= now
    }

    /// Enqueued -> Running.
    pub fn start(&mut self, now: DateTime<Utc>) {
        self.state = InstanceState::Running;
        self.updated_at = now;
    }

    /// Running -> Success.
    pub fn succeed(&mut self, now: DateTime<Utc>) {
        self.state = InstanceState::Success;
        self.updated_at = now;
    }

    /// Running -> Retry. Returns the delay that was applied.
    pub fn schedule_retry(
        &mut self,
        backoff: &BackoffPolicy,
        error: String,
        now: DateTime<Utc>,
    ) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        let delay = backoff.delay(self.attempts);
        self.state = InstanceState::Retry;
        self.next_eligible_at = add_duration(now, delay);
        self.last_error = Some(error);
        self.updated_at = now;
        delay
    }

    /// Retry -> Enqueued once the backoff has elapsed.
    pub fn promote(&mut self, now: DateTime<Utc>) -> bool {
        if self.state == InstanceState::Retry && self.next_eligible_at <= now {
            self.state = InstanceState::Enqueued;
            self.updated_at = now;
            true
        } else {
            false
        }
    }

    /// Running -> Failed (permanent error).
    pub fn fail(&mut self, error: String, now: DateTime<Utc>) {
        self.state = InstanceState::Failed;
        self.last_error = Some(error);
        self.updated_at = now;
    }

    /// Any non-terminal state -> Cancelled.
    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.state = InstanceState::Cancelled;
        self.updated_at = now;
    }

    /// Next occurrence of a periodic instance, eligible one interval from now.
    pub fn rearm(&self, id: InstanceId, now: DateTime<Utc>) -> Option<TaskInstance> {
        let interval = self.interval?;
        Some(TaskInstance {
            id,
            name: self.name.clone(),
            state: InstanceState::Enqueued,
            attempts: 0,
            next_eligible_at: add_duration(now, interval),
            trigger: self.trigger,
            interval: self.interval,
            last_error: None,
            queued_runs: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Ask for one more full run after this instance retires.
    pub fn queue_run(&mut self, now: DateTime<Utc>) {
        self.queued_runs = self.queued_runs.saturating_add(1);
        self.updated_at = now;
    }

    /// Instance to install when this one retires with `Success` or `Failed`:
    /// the next periodic occurrence, or a queued one-off run that is
    /// eligible immediately.
    pub fn successor(&self, id: InstanceId, now: DateTime<Utc>) -> Option<TaskInstance> {
        if let Some(next) = self.rearm(id, now) {
            return Some(next);
        }
        if self.queued_runs == 0 {
            return None;
        }
        Some(TaskInstance {
            id,
            name: self.name.clone(),
            state: InstanceState::Enqueued,
            attempts: 0,
            next_eligible_at: now,
            trigger: self.trigger,
            interval: None,
            last_error: None,
            queued_runs: self.queued_runs - 1,
            created_at: now,
            updated_at: now,
        })
    }
}
