//! SQLite-backed instance table.
//!
//! The [`SqliteTaskStore`] keeps every task instance in one table so state,
//! attempt counts and eligibility survive process restarts. A partial unique
//! index over non-terminal states keeps a name to one active instance even
//! if a caller bypasses the dedup checks. An advisory lock file keeps a
//! second process from opening the same database and recovering instances
//! it does not own.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use fs2::FileExt;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};
use tracing::debug;

use crate::domain::{DedupPolicy, InstanceId, InstanceState, TaskInstance, TriggerKind};
use crate::error::StoreError;
use crate::ports::{Admission, TaskStore, Transition};

/// SQL schema for the instance table.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS task_instances (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    state TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    next_eligible_at TEXT NOT NULL,
    trigger_kind TEXT NOT NULL,
    interval_secs INTEGER,
    last_error TEXT,
    queued_runs INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- At most one non-terminal instance per name
CREATE UNIQUE INDEX IF NOT EXISTS idx_task_instances_active
    ON task_instances(name) WHERE state IN ('enqueued', 'running', 'retry');

CREATE INDEX IF NOT EXISTS idx_task_instances_state
    ON task_instances(state, next_eligible_at);
CREATE INDEX IF NOT EXISTS idx_task_instances_name ON task_instances(name);
"#;

const ACTIVE_STATES: &str = "('enqueued', 'running', 'retry')";
const TERMINAL_STATES: &str = "('success', 'cancelled', 'failed')";

const COLUMNS: &str = "id, name, state, attempts, next_eligible_at, trigger_kind, \
                       interval_secs, last_error, queued_runs, created_at, updated_at";

/// Run schema creation on a connection. Idempotent.
///
/// Databases created before `queued_runs` existed get the column added.
pub fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(SCHEMA)?;
    if !has_column(conn, "task_instances", "queued_runs")? {
        conn.execute_batch(
            "ALTER TABLE task_instances ADD COLUMN queued_runs INTEGER NOT NULL DEFAULT 0",
        )?;
    }
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool, StoreError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>("name"))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names.iter().any(|name| name == column))
}

pub struct SqliteTaskStore {
    conn: Mutex<Connection>,
    _lock: Option<File>,
}

impl SqliteTaskStore {
    /// Open (or create) the database at `path`, taking the owner lock.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let lock_path = lock_path_for(path);
        let lock = acquire_lock(&lock_path)?;

        let conn = Connection::open(path)?;
        run_migrations(&conn)?;
        debug!(path = %path.display(), "opened task store");

        Ok(Self {
            conn: Mutex::new(conn),
            _lock: Some(lock),
        })
    }

    /// Non-durable store for tests and dry runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            _lock: None,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut raw = path.as_os_str().to_owned();
    raw.push(".lock");
    PathBuf::from(raw)
}

fn acquire_lock(lock_path: &Path) -> Result<File, StoreError> {
    let file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(lock_path)?;
    file.try_lock_exclusive()
        .map_err(|_| StoreError::Locked(lock_path.to_path_buf()))?;
    Ok(file)
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn corrupted(message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(StoreError::CorruptedData(message)),
    )
}

fn parse_timestamp(value: &str, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| corrupted(format!("invalid timestamp '{value}' in column '{column}'")))
}

fn row_to_instance(row: &Row<'_>) -> rusqlite::Result<TaskInstance> {
    let id: String = row.get("id")?;
    let state: String = row.get("state")?;
    let attempts: i64 = row.get("attempts")?;
    let next_eligible_at: String = row.get("next_eligible_at")?;
    let trigger_kind: String = row.get("trigger_kind")?;
    let interval_secs: Option<i64> = row.get("interval_secs")?;
    let queued_runs: i64 = row.get("queued_runs")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(TaskInstance {
        id: id
            .parse()
            .map_err(|_| corrupted(format!("invalid instance id '{id}'")))?,
        name: row.get("name")?,
        state: state.parse().map_err(corrupted)?,
        attempts: u32::try_from(attempts)
            .map_err(|_| corrupted(format!("invalid attempts '{attempts}'")))?,
        next_eligible_at: parse_timestamp(&next_eligible_at, "next_eligible_at")?,
        trigger: TriggerKind::parse(&trigger_kind)
            .ok_or_else(|| corrupted(format!("invalid trigger kind '{trigger_kind}'")))?,
        interval: interval_secs
            .map(|secs| u64::try_from(secs).map(Duration::from_secs))
            .transpose()
            .map_err(|_| corrupted("negative interval_secs".to_string()))?,
        last_error: row.get("last_error")?,
        queued_runs: u32::try_from(queued_runs)
            .map_err(|_| corrupted(format!("invalid queued_runs '{queued_runs}'")))?,
        created_at: parse_timestamp(&created_at, "created_at")?,
        updated_at: parse_timestamp(&updated_at, "updated_at")?,
    })
}

fn insert(tx: &Transaction<'_>, instance: &TaskInstance) -> Result<(), StoreError> {
    tx.execute(
        &format!("INSERT INTO task_instances ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"),
        params![
            instance.id.as_ulid().to_string(),
            instance.name,
            instance.state.as_str(),
            instance.attempts,
            format_ts(instance.next_eligible_at),
            instance.trigger.as_str(),
            instance.interval.map(|d| d.as_secs() as i64),
            instance.last_error,
            instance.queued_runs,
            format_ts(instance.created_at),
            format_ts(instance.updated_at),
        ],
    )?;
    Ok(())
}

fn update(tx: &Transaction<'_>, instance: &TaskInstance) -> Result<(), StoreError> {
    tx.execute(
        "UPDATE task_instances
         SET state = ?2, attempts = ?3, next_eligible_at = ?4, last_error = ?5,
             queued_runs = ?6, updated_at = ?7
         WHERE id = ?1",
        params![
            instance.id.as_ulid().to_string(),
            instance.state.as_str(),
            instance.attempts,
            format_ts(instance.next_eligible_at),
            instance.last_error,
            instance.queued_runs,
            format_ts(instance.updated_at),
        ],
    )?;
    Ok(())
}

fn select_active(conn: &Connection, name: &str) -> Result<Option<TaskInstance>, StoreError> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {COLUMNS} FROM task_instances WHERE name = ?1 AND state IN {ACTIVE_STATES}"
            ),
            params![name],
            row_to_instance,
        )
        .optional()?;
    Ok(row)
}

fn select_by_id(conn: &Connection, id: InstanceId) -> Result<Option<TaskInstance>, StoreError> {
    let row = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM task_instances WHERE id = ?1"),
            params![id.as_ulid().to_string()],
            row_to_instance,
        )
        .optional()?;
    Ok(row)
}

impl TaskStore for SqliteTaskStore {
    fn submit(
        &self,
        instance: TaskInstance,
        policy: DedupPolicy,
    ) -> Result<Admission, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let replaced = match (select_active(&tx, &instance.name)?, policy) {
            (Some(existing), DedupPolicy::Keep) => {
                return Ok(Admission::Kept { id: existing.id });
            }
            (Some(mut existing), DedupPolicy::Append) => {
                existing.queue_run(instance.created_at);
                update(&tx, &existing)?;
                tx.commit()?;
                return Ok(Admission::Appended {
                    id: existing.id,
                    queued_runs: existing.queued_runs,
                });
            }
            (Some(mut existing), DedupPolicy::Replace) => {
                existing.cancel(instance.created_at);
                update(&tx, &existing)?;
                Some(existing.id)
            }
            (None, _) => None,
        };

        insert(&tx, &instance)?;
        tx.commit()?;
        Ok(Admission::Installed {
            id: instance.id,
            replaced,
        })
    }

    fn cancel_active(
        &self,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<InstanceId>, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(mut active) = select_active(&tx, name)? else {
            return Ok(None);
        };
        active.cancel(now);
        update(&tx, &active)?;
        tx.commit()?;
        Ok(Some(active.id))
    }

    fn transition(
        &self,
        id: InstanceId,
        from: InstanceState,
        apply: Transition<'_>,
    ) -> Result<Option<TaskInstance>, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(mut record) = select_by_id(&tx, id)? else {
            return Ok(None);
        };
        if record.state != from {
            return Ok(None);
        }

        let follow_up = apply(&mut record);
        update(&tx, &record)?;
        if let Some(next) = follow_up {
            insert(&tx, &next)?;
        }
        tx.commit()?;
        Ok(Some(record))
    }

    fn get(&self, id: InstanceId) -> Result<Option<TaskInstance>, StoreError> {
        select_by_id(&self.lock(), id)
    }

    fn active(&self, name: &str) -> Result<Option<TaskInstance>, StoreError> {
        select_active(&self.lock(), name)
    }

    fn list_in_state(&self, state: InstanceState) -> Result<Vec<TaskInstance>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM task_instances WHERE state = ?1 ORDER BY next_eligible_at, id"
        ))?;
        let rows = stmt
            .query_map(params![state.as_str()], row_to_instance)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn count_in_state(&self, state: InstanceState) -> Result<usize, StoreError> {
        let count: i64 = self.lock().query_row(
            "SELECT COUNT(*) FROM task_instances WHERE state = ?1",
            params![state.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn history(&self, name: &str, limit: usize) -> Result<Vec<TaskInstance>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM task_instances
             WHERE name = ?1 AND state IN {TERMINAL_STATES}
             ORDER BY id DESC LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![name, limit as i64], row_to_instance)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn prune_history(&self, keep_per_name: usize) -> Result<usize, StoreError> {
        let removed = self.lock().execute(
            &format!(
                "DELETE FROM task_instances
                 WHERE state IN {TERMINAL_STATES} AND id NOT IN (
                     SELECT id FROM (
                         SELECT id, ROW_NUMBER() OVER (PARTITION BY name ORDER BY id DESC) AS rn
                         FROM task_instances WHERE state IN {TERMINAL_STATES}
                     ) WHERE rn <= ?1
                 )"
            ),
            params![keep_per_name as i64],
        )?;
        Ok(removed)
    }

    fn prune_name(&self, name: &str, keep: usize) -> Result<usize, StoreError> {
        let removed = self.lock().execute(
            &format!(
                "DELETE FROM task_instances
                 WHERE name = ?1 AND state IN {TERMINAL_STATES} AND id NOT IN (
                     SELECT id FROM task_instances
                     WHERE name = ?1 AND state IN {TERMINAL_STATES}
                     ORDER BY id DESC LIMIT ?2
                 )"
            ),
            params![name, keep as i64],
        )?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BackoffPolicy, TaskDefinition};
    use chrono::TimeZone;
    use ulid::Ulid;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 10, 0, 0).unwrap()
    }

    fn new_instance(def: &TaskDefinition) -> TaskInstance {
        TaskInstance::new(InstanceId::from_ulid(Ulid::new()), def, t0())
    }

    #[test]
    fn rows_roundtrip_through_sqlite() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let def = TaskDefinition::periodic("sync.fetch.hourly", Duration::from_secs(3600));
        let instance = new_instance(&def);

        store.submit(instance.clone(), DedupPolicy::Replace).unwrap();

        assert_eq!(store.get(instance.id).unwrap(), Some(instance));
    }

    #[test]
    fn keep_and_replace_against_sqlite() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let def = TaskDefinition::one_off("sync.contacts");

        let first = store.submit(new_instance(&def), DedupPolicy::Keep).unwrap();
        let kept = store.submit(new_instance(&def), DedupPolicy::Keep).unwrap();
        assert_eq!(kept, Admission::Kept { id: first.id() });

        let replaced = store
            .submit(new_instance(&def), DedupPolicy::Replace)
            .unwrap();
        assert!(matches!(
            replaced,
            Admission::Installed { replaced: Some(old), .. } if old == first.id()
        ));
        assert_eq!(store.count_in_state(InstanceState::Enqueued).unwrap(), 1);
        assert_eq!(store.count_in_state(InstanceState::Cancelled).unwrap(), 1);
    }

    #[test]
    fn append_persists_queued_runs() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let def = TaskDefinition::one_off("sync.fetch.once");

        let first = store.submit(new_instance(&def), DedupPolicy::Append).unwrap();
        let appended = store.submit(new_instance(&def), DedupPolicy::Append).unwrap();

        assert_eq!(
            appended,
            Admission::Appended {
                id: first.id(),
                queued_runs: 1
            }
        );
        assert_eq!(store.get(first.id()).unwrap().unwrap().queued_runs, 1);
        assert_eq!(store.count_in_state(InstanceState::Enqueued).unwrap(), 1);
    }

    #[test]
    fn migration_adds_queued_runs_to_existing_table() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE task_instances (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                state TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                next_eligible_at TEXT NOT NULL,
                trigger_kind TEXT NOT NULL,
                interval_secs INTEGER,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )
        .unwrap();
        assert!(!has_column(&conn, "task_instances", "queued_runs").unwrap());

        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        assert!(has_column(&conn, "task_instances", "queued_runs").unwrap());
    }

    #[test]
    fn unique_index_rejects_second_active_row() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let def = TaskDefinition::one_off("sync.push");
        store.submit(new_instance(&def), DedupPolicy::Keep).unwrap();

        let mut conn = store.lock();
        let tx = conn.transaction().unwrap();
        let err = insert(&tx, &new_instance(&def)).unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));
    }

    #[test]
    fn periodic_success_rearms_in_same_transaction() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let def = TaskDefinition::periodic("sync.fetch.hourly", Duration::from_secs(3600));
        let id = store
            .submit(new_instance(&def), DedupPolicy::Replace)
            .unwrap()
            .id();
        let next_id = InstanceId::from_ulid(Ulid::new());
        let later = t0() + chrono::Duration::hours(1);

        store
            .transition(id, InstanceState::Enqueued, &mut |r| {
                r.start(later);
                None
            })
            .unwrap();
        store
            .transition(id, InstanceState::Running, &mut |r| {
                r.succeed(later);
                r.rearm(next_id, later)
            })
            .unwrap();

        let active = store.active("sync.fetch.hourly").unwrap().unwrap();
        assert_eq!(active.id, next_id);
        assert_eq!(active.next_eligible_at, later + chrono::Duration::hours(1));
        assert_eq!(
            store.get(id).unwrap().unwrap().state,
            InstanceState::Success
        );
    }

    #[test]
    fn state_and_attempts_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.db");
        let def = TaskDefinition::one_off("sync.push");
        let id;
        {
            let store = SqliteTaskStore::open(&path).unwrap();
            id = store
                .submit(new_instance(&def), DedupPolicy::Replace)
                .unwrap()
                .id();
            store
                .transition(id, InstanceState::Enqueued, &mut |r| {
                    r.start(t0());
                    None
                })
                .unwrap();
            store
                .transition(id, InstanceState::Running, &mut |r| {
                    r.schedule_retry(&BackoffPolicy::default(), "503".into(), t0());
                    None
                })
                .unwrap();
        }

        let reopened = SqliteTaskStore::open(&path).unwrap();
        let row = reopened.get(id).unwrap().unwrap();
        assert_eq!(row.state, InstanceState::Retry);
        assert_eq!(row.attempts, 1);
        assert_eq!(row.next_eligible_at, t0() + chrono::Duration::seconds(30));
        assert_eq!(row.last_error.as_deref(), Some("503"));
    }

    #[test]
    fn second_owner_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.db");

        let _owner = SqliteTaskStore::open(&path).unwrap();
        let second = SqliteTaskStore::open(&path);

        assert!(matches!(second, Err(StoreError::Locked(_))));
    }

    #[test]
    fn prune_keeps_newest_rows_per_name() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let def = TaskDefinition::one_off("sync.push");
        for _ in 0..5 {
            store.submit(new_instance(&def), DedupPolicy::Replace).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        store.cancel_active("sync.push", t0()).unwrap();

        let removed = store.prune_history(3).unwrap();

        assert_eq!(removed, 2);
        assert_eq!(store.history("sync.push", 10).unwrap().len(), 3);
    }

    #[test]
    fn prune_name_trims_only_that_name() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let push = TaskDefinition::one_off("sync.push");
        let contacts = TaskDefinition::one_off("sync.contacts");
        for def in [&push, &push, &push, &contacts, &contacts] {
            store.submit(new_instance(def), DedupPolicy::Replace).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        store.cancel_active("sync.push", t0()).unwrap();
        store.cancel_active("sync.contacts", t0()).unwrap();

        assert_eq!(store.prune_name("sync.push", 1).unwrap(), 2);
        assert_eq!(store.history("sync.push", 10).unwrap().len(), 1);
        assert_eq!(store.history("sync.contacts", 10).unwrap().len(), 2);
    }
}
