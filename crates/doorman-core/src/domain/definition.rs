//! TaskDefinition: immutable template for a named schedulable job.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::backoff::BackoffPolicy;
use crate::ports::SyncUnit;

/// When a definition runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Runs once, as soon as constraints allow.
    OneOff,
    /// Re-arms itself `interval` after each completed run.
    Periodic { interval: Duration },
}

/// Persisted discriminant of [`Trigger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    OneOff,
    Periodic,
}

impl TriggerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerKind::OneOff => "one_off",
            TriggerKind::Periodic => "periodic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "one_off" => Some(TriggerKind::OneOff),
            "periodic" => Some(TriggerKind::Periodic),
            _ => None,
        }
    }
}

impl Trigger {
    pub fn kind(&self) -> TriggerKind {
        match self {
            Trigger::OneOff => TriggerKind::OneOff,
            Trigger::Periodic { .. } => TriggerKind::Periodic,
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        match self {
            Trigger::OneOff => None,
            Trigger::Periodic { interval } => Some(*interval),
        }
    }

    /// When a freshly submitted instance becomes eligible.
    ///
    /// Periodic definitions wait one interval: the one-off fetch submitted
    /// alongside them covers the immediate run.
    pub fn first_eligible_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Trigger::OneOff => now,
            Trigger::Periodic { interval } => add_duration(now, *interval),
        }
    }
}

/// `now + delay`, saturating at the far future instead of panicking.
pub fn add_duration(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Execution preconditions gating `Enqueued -> Running`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Constraints {
    pub requires_network: bool,
}

/// How a new enqueue resolves against a non-terminal instance of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupPolicy {
    /// Leave the existing instance alone and report its id.
    Keep,
    /// Cancel the existing instance and install a fresh one.
    Replace,
    /// Leave the existing instance alone and queue one more full run after
    /// it retires. Never supersedes work already waiting or running.
    Append,
}

/// Immutable description of a schedulable job.
///
/// # 使用例
/// ```ignore
/// let def = TaskDefinition::one_off("sync.push")
///     .requires_network()
///     .dedup(DedupPolicy::Replace)
///     .unit(pending_requests)
///     .unit(pending_logs);
/// ```
#[derive(Clone)]
pub struct TaskDefinition {
    name: String,
    trigger: Trigger,
    constraints: Constraints,
    dedup: DedupPolicy,
    backoff: BackoffPolicy,
    units: Vec<Arc<dyn SyncUnit>>,
}

impl TaskDefinition {
    pub fn one_off(name: impl Into<String>) -> Self {
        Self::new(name, Trigger::OneOff)
    }

    pub fn periodic(name: impl Into<String>, interval: Duration) -> Self {
        Self::new(name, Trigger::Periodic { interval })
    }

    fn new(name: impl Into<String>, trigger: Trigger) -> Self {
        Self {
            name: name.into(),
            trigger,
            constraints: Constraints::default(),
            dedup: DedupPolicy::Keep,
            backoff: BackoffPolicy::default(),
            units: Vec::new(),
        }
    }

    pub fn requires_network(mut self) -> Self {
        self.constraints.requires_network = true;
        self
    }

    pub fn dedup(mut self, policy: DedupPolicy) -> Self {
        self.dedup = policy;
        self
    }

    pub fn backoff(mut self, policy: BackoffPolicy) -> Self {
        self.backoff = policy;
        self
    }

    /// Append a unit; units run in the order they were added.
    pub fn unit(mut self, unit: Arc<dyn SyncUnit>) -> Self {
        self.units.push(unit);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn trigger(&self) -> Trigger {
        self.trigger
    }

    pub fn constraints(&self) -> Constraints {
        self.constraints
    }

    pub fn dedup_policy(&self) -> DedupPolicy {
        self.dedup
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        self.backoff
    }

    pub fn units(&self) -> &[Arc<dyn SyncUnit>] {
        &self.units
    }
}

impl fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let units: Vec<&str> = self.units.iter().map(|u| u.name()).collect();
        f.debug_struct("TaskDefinition")
            .field("name", &self.name)
            .field("trigger", &self.trigger)
            .field("constraints", &self.constraints)
            .field("dedup", &self.dedup)
            .field("backoff", &self.backoff)
            .field("units", &units)
            .finish()
    }
}
