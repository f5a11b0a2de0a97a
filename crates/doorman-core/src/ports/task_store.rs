//! TaskStore port - 永続化された instance テーブル（正本）
//!
//! # 設計原則
//! - 各メソッドは 1 トランザクション。同じ name への書き込みは線形化される
//! - 非終端 instance は name ごとに高々 1 つ
//! - 状態遷移のルールは `TaskInstance` のメソッドにあり、store は永続化だけ

use chrono::{DateTime, Utc};

use crate::domain::{DedupPolicy, InstanceId, InstanceState, TaskInstance};
use crate::error::StoreError;

/// Result of submitting an instance against the per-name dedup policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The new instance was installed; `replaced` is the instance it cancelled.
    Installed {
        id: InstanceId,
        replaced: Option<InstanceId>,
    },
    /// `Keep` policy found a non-terminal instance; nothing changed.
    Kept { id: InstanceId },
    /// `Append` policy found a non-terminal instance and queued another run
    /// behind it.
    Appended { id: InstanceId, queued_runs: u32 },
}

impl Admission {
    /// Id of the instance that is now active for the name.
    pub fn id(&self) -> InstanceId {
        match self {
            Admission::Installed { id, .. }
            | Admission::Kept { id }
            | Admission::Appended { id, .. } => *id,
        }
    }
}

/// Callback applied to a row inside a store transaction. May return a
/// follow-up instance to insert in the same transaction (periodic re-arm).
pub type Transition<'a> = &'a mut dyn FnMut(&mut TaskInstance) -> Option<TaskInstance>;

pub trait TaskStore: Send + Sync {
    /// Install `instance` unless a non-terminal instance of the same name
    /// exists; then apply `policy` atomically.
    fn submit(
        &self,
        instance: TaskInstance,
        policy: DedupPolicy,
    ) -> Result<Admission, StoreError>;

    /// Cancel the non-terminal instance of `name`, if any.
    fn cancel_active(
        &self,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<InstanceId>, StoreError>;

    /// Apply `apply` to instance `id` only if it is currently in `from`.
    /// Returns the updated row, or `None` when the guard did not match.
    fn transition(
        &self,
        id: InstanceId,
        from: InstanceState,
        apply: Transition<'_>,
    ) -> Result<Option<TaskInstance>, StoreError>;

    fn get(&self, id: InstanceId) -> Result<Option<TaskInstance>, StoreError>;

    /// The non-terminal instance of `name`, if any.
    fn active(&self, name: &str) -> Result<Option<TaskInstance>, StoreError>;

    /// Instances in `state`, earliest `next_eligible_at` first.
    fn list_in_state(&self, state: InstanceState) -> Result<Vec<TaskInstance>, StoreError>;

    fn count_in_state(&self, state: InstanceState) -> Result<usize, StoreError>;

    /// Terminal instances of `name`, newest first.
    fn history(&self, name: &str, limit: usize) -> Result<Vec<TaskInstance>, StoreError>;

    /// Drop terminal rows beyond the newest `keep_per_name` for each name.
    fn prune_history(&self, keep_per_name: usize) -> Result<usize, StoreError>;

    /// Drop terminal rows of `name` beyond the newest `keep`.
    fn prune_name(&self, name: &str, keep: usize) -> Result<usize, StoreError>;
}
