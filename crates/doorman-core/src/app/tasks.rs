//! Kiosk sync task definitions.
//!
//! | name                | trigger     | network | dedup   | units                                    |
//! |---------------------|-------------|---------|---------|------------------------------------------|
//! | `sync.fetch.once`   | one-off     | yes     | Append  | directory, amenities, home, vacancy      |
//! | `sync.fetch.hourly` | periodic    | yes     | Replace | directory, amenities, home, vacancy      |
//! | `sync.push`         | one-off     | yes     | Replace | pending_requests, pending_logs           |
//! | `sync.contacts`     | one-off     | yes     | Keep    | pending_requests                         |

use std::sync::Arc;

use super::config::SyncConfig;
use crate::domain::{DedupPolicy, TaskDefinition};
use crate::ports::SyncUnit;

pub const FETCH_ONCE: &str = "sync.fetch.once";
pub const FETCH_PERIODIC: &str = "sync.fetch.hourly";
pub const PUSH: &str = "sync.push";
pub const CONTACTS: &str = "sync.contacts";

/// Every task name the orchestrator submits.
pub const ALL_TASKS: [&str; 4] = [FETCH_ONCE, FETCH_PERIODIC, PUSH, CONTACTS];

/// One SyncUnit per data domain.
#[derive(Clone)]
pub struct SyncUnits {
    pub directory: Arc<dyn SyncUnit>,
    pub amenities: Arc<dyn SyncUnit>,
    pub home: Arc<dyn SyncUnit>,
    pub vacancy: Arc<dyn SyncUnit>,
    pub pending_requests: Arc<dyn SyncUnit>,
    pub pending_logs: Arc<dyn SyncUnit>,
}

impl SyncUnits {
    fn with_fetch_units(&self, definition: TaskDefinition) -> TaskDefinition {
        definition
            .unit(Arc::clone(&self.directory))
            .unit(Arc::clone(&self.amenities))
            .unit(Arc::clone(&self.home))
            .unit(Arc::clone(&self.vacancy))
    }

    /// Build all four definitions, ordered as [`ALL_TASKS`].
    pub fn definitions(&self, config: &SyncConfig) -> Vec<TaskDefinition> {
        let backoff = config.backoff();

        let fetch_once = self.with_fetch_units(
            TaskDefinition::one_off(FETCH_ONCE)
                .requires_network()
                .dedup(DedupPolicy::Append)
                .backoff(backoff),
        );

        let fetch_periodic = self.with_fetch_units(
            TaskDefinition::periodic(FETCH_PERIODIC, config.fetch_interval())
                .requires_network()
                .dedup(DedupPolicy::Replace)
                .backoff(backoff),
        );

        let push = TaskDefinition::one_off(PUSH)
            .requires_network()
            .dedup(DedupPolicy::Replace)
            .backoff(backoff)
            .unit(Arc::clone(&self.pending_requests))
            .unit(Arc::clone(&self.pending_logs));

        let contacts = TaskDefinition::one_off(CONTACTS)
            .requires_network()
            .dedup(DedupPolicy::Keep)
            .backoff(backoff)
            .unit(Arc::clone(&self.pending_requests));

        vec![fetch_once, fetch_periodic, push, contacts]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Trigger, TriggerKind};
    use crate::testing::ScriptedUnit;
    use std::time::Duration;

    fn units() -> SyncUnits {
        SyncUnits {
            directory: ScriptedUnit::ok("directory"),
            amenities: ScriptedUnit::ok("amenities"),
            home: ScriptedUnit::ok("home"),
            vacancy: ScriptedUnit::ok("vacancy"),
            pending_requests: ScriptedUnit::ok("pending_requests"),
            pending_logs: ScriptedUnit::ok("pending_logs"),
        }
    }

    fn unit_names(def: &TaskDefinition) -> Vec<&str> {
        def.units().iter().map(|u| u.name()).collect()
    }

    #[test]
    fn definitions_follow_dedup_table() {
        let defs = units().definitions(&SyncConfig::default());
        let names: Vec<&str> = defs.iter().map(|d| d.name()).collect();
        assert_eq!(names, ALL_TASKS);

        let policies: Vec<DedupPolicy> = defs.iter().map(|d| d.dedup_policy()).collect();
        assert_eq!(
            policies,
            vec![
                DedupPolicy::Append,
                DedupPolicy::Replace,
                DedupPolicy::Replace,
                DedupPolicy::Keep
            ]
        );
        assert!(defs.iter().all(|d| d.constraints().requires_network));
    }

    #[test]
    fn fetch_runs_four_domains_in_order() {
        let defs = units().definitions(&SyncConfig::default());

        assert_eq!(
            unit_names(&defs[0]),
            vec!["directory", "amenities", "home", "vacancy"]
        );
        assert_eq!(unit_names(&defs[1]), unit_names(&defs[0]));
        assert_eq!(unit_names(&defs[2]), vec!["pending_requests", "pending_logs"]);
        assert_eq!(unit_names(&defs[3]), vec!["pending_requests"]);
    }

    #[test]
    fn periodic_interval_comes_from_config() {
        let config = SyncConfig {
            fetch_interval_secs: 900,
            ..SyncConfig::default()
        };
        let defs = units().definitions(&config);

        assert_eq!(defs[0].trigger().kind(), TriggerKind::OneOff);
        assert_eq!(
            defs[1].trigger(),
            Trigger::Periodic {
                interval: Duration::from_secs(900)
            }
        );
    }
}
