//! InMemoryTaskStore - テスト・開発用の instance テーブル
//!
//! 再起動を跨いだ永続性はありません。本番は `SqliteTaskStore` を使います。

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::domain::{DedupPolicy, InstanceId, InstanceState, TaskInstance};
use crate::error::StoreError;
use crate::ports::{Admission, TaskStore, Transition};

#[derive(Default)]
pub struct InMemoryTaskStore {
    records: Mutex<HashMap<InstanceId, TaskInstance>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<InstanceId, TaskInstance>> {
        self.records.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn active_id(records: &HashMap<InstanceId, TaskInstance>, name: &str) -> Option<InstanceId> {
    records
        .values()
        .find(|r| r.name == name && !r.state.is_terminal())
        .map(|r| r.id)
}

fn sort_by_eligibility(rows: &mut [TaskInstance]) {
    rows.sort_by(|a, b| {
        a.next_eligible_at
            .cmp(&b.next_eligible_at)
            .then(a.id.cmp(&b.id))
    });
}

impl TaskStore for InMemoryTaskStore {
    fn submit(
        &self,
        instance: TaskInstance,
        policy: DedupPolicy,
    ) -> Result<Admission, StoreError> {
        let mut records = self.lock();
        let existing = active_id(&records, &instance.name);

        let replaced = match (existing, policy) {
            (Some(id), DedupPolicy::Keep) => return Ok(Admission::Kept { id }),
            (Some(id), DedupPolicy::Append) => {
                let Some(active) = records.get_mut(&id) else {
                    return Ok(Admission::Kept { id });
                };
                active.queue_run(instance.created_at);
                let queued_runs = active.queued_runs;
                return Ok(Admission::Appended { id, queued_runs });
            }
            (Some(id), DedupPolicy::Replace) => {
                if let Some(old) = records.get_mut(&id) {
                    old.cancel(instance.created_at);
                }
                Some(id)
            }
            (None, _) => None,
        };

        let id = instance.id;
        records.insert(id, instance);
        Ok(Admission::Installed { id, replaced })
    }

    fn cancel_active(
        &self,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<InstanceId>, StoreError> {
        let mut records = self.lock();
        let Some(id) = active_id(&records, name) else {
            return Ok(None);
        };
        if let Some(record) = records.get_mut(&id) {
            record.cancel(now);
        }
        Ok(Some(id))
    }

    fn transition(
        &self,
        id: InstanceId,
        from: InstanceState,
        apply: Transition<'_>,
    ) -> Result<Option<TaskInstance>, StoreError> {
        let mut records = self.lock();
        let Some(record) = records.get_mut(&id) else {
            return Ok(None);
        };
        if record.state != from {
            return Ok(None);
        }

        let follow_up = apply(record);
        let updated = record.clone();
        if let Some(next) = follow_up {
            records.insert(next.id, next);
        }
        Ok(Some(updated))
    }

    fn get(&self, id: InstanceId) -> Result<Option<TaskInstance>, StoreError> {
        Ok(self.lock().get(&id).cloned())
    }

    fn active(&self, name: &str) -> Result<Option<TaskInstance>, StoreError> {
        let records = self.lock();
        Ok(active_id(&records, name).and_then(|id| records.get(&id).cloned()))
    }

    fn list_in_state(&self, state: InstanceState) -> Result<Vec<TaskInstance>, StoreError> {
        let mut rows: Vec<TaskInstance> = self
            .lock()
            .values()
            .filter(|r| r.state == state)
            .cloned()
            .collect();
        sort_by_eligibility(&mut rows);
        Ok(rows)
    }

    fn count_in_state(&self, state: InstanceState) -> Result<usize, StoreError> {
        Ok(self.lock().values().filter(|r| r.state == state).count())
    }

    fn history(&self, name: &str, limit: usize) -> Result<Vec<TaskInstance>, StoreError> {
        let mut rows: Vec<TaskInstance> = self
            .lock()
            .values()
            .filter(|r| r.name == name && r.state.is_terminal())
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        rows.truncate(limit);
        Ok(rows)
    }

    fn prune_history(&self, keep_per_name: usize) -> Result<usize, StoreError> {
        let mut records = self.lock();

        let mut terminal_by_name: HashMap<String, Vec<InstanceId>> = HashMap::new();
        for record in records.values().filter(|r| r.state.is_terminal()) {
            terminal_by_name
                .entry(record.name.clone())
                .or_default()
                .push(record.id);
        }

        let mut removed = 0;
        for mut ids in terminal_by_name.into_values() {
            removed += drop_oldest(&mut records, ids, keep_per_name);
        }
        Ok(removed)
    }

    fn prune_name(&self, name: &str, keep: usize) -> Result<usize, StoreError> {
        let mut records = self.lock();
        let ids = records
            .values()
            .filter(|r| r.name == name && r.state.is_terminal())
            .map(|r| r.id)
            .collect();
        Ok(drop_oldest(&mut records, ids, keep))
    }
}

fn drop_oldest(
    records: &mut HashMap<InstanceId, TaskInstance>,
    mut ids: Vec<InstanceId>,
    keep: usize,
) -> usize {
    ids.sort_by(|a, b| b.cmp(a));
    let mut removed = 0;
    for id in ids.into_iter().skip(keep) {
        records.remove(&id);
        removed += 1;
    }
    removed
}
