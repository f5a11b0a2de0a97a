//! EngineBuilder - JobEngine の構築とワイヤリング
//!
//! # 方針
//! - 定義の二重登録は register() の時点でエラー
//! - 起動時検証（Fail-fast）: expect_tasks() の集合が全て登録済みか build() で確認
//! - store / clock / network は差し替え可能（既定はテスト向けの in-memory 構成）

use std::sync::Arc;

use crate::domain::TaskDefinition;
use crate::engine::{DEFAULT_HISTORY_LIMIT, DefinitionRegistry, JobEngine, RegistryError};
use crate::impls::{InMemoryTaskStore, NetworkMonitor};
use crate::ports::{Clock, Connectivity, SystemClock, TaskStore};

/// EngineBuilder は JobEngine を構築
///
/// # 使用例
/// ```ignore
/// let engine = EngineBuilder::new()
///     .store(Arc::new(SqliteTaskStore::open(&path)?))
///     .network(monitor.clone())
///     .register(TaskDefinition::one_off("sync.push"))?
///     .expect_tasks(&["sync.push"])
///     .build()?;
/// ```
pub struct EngineBuilder {
    registry: DefinitionRegistry,
    expected_tasks: Option<Vec<String>>,
    store: Option<Arc<dyn TaskStore>>,
    clock: Option<Arc<dyn Clock>>,
    network: Option<Arc<dyn Connectivity>>,
    history_limit: usize,
}

/// BuildError はエンジン構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing task definitions: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            registry: DefinitionRegistry::new(),
            expected_tasks: None,
            store: None,
            clock: None,
            network: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// TaskDefinition を登録
    pub fn register(mut self, definition: TaskDefinition) -> Result<Self, RegistryError> {
        self.registry.register(definition)?;
        Ok(self)
    }

    pub fn register_all(
        mut self,
        definitions: impl IntoIterator<Item = TaskDefinition>,
    ) -> Result<Self, RegistryError> {
        for definition in definitions {
            self.registry.register(definition)?;
        }
        Ok(self)
    }

    /// 期待される task name のリストを設定
    pub fn expect_tasks(mut self, names: &[&str]) -> Self {
        self.expected_tasks = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn network(mut self, network: Arc<dyn Connectivity>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn history_limit(mut self, history_limit: usize) -> Self {
        self.history_limit = history_limit;
        self
    }

    /// 検証して JobEngine を生成
    ///
    /// - expect_tasks() の name が全て登録されているか
    /// - 不足があれば BuildError::MissingTaskTypes
    pub fn build(self) -> Result<Arc<JobEngine>, BuildError> {
        if let Some(expected_tasks) = &self.expected_tasks {
            let missing_tasks: Vec<String> = expected_tasks
                .iter()
                .filter(|name| !self.registry.contains(name))
                .cloned()
                .collect();
            if !missing_tasks.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing_tasks));
            }
        }

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryTaskStore::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let network = self
            .network
            .unwrap_or_else(|| Arc::new(NetworkMonitor::default()));

        let engine = JobEngine::new(store, self.registry, clock, network)
            .with_history_limit(self.history_limit);
        Ok(Arc::new(engine))
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_success() {
        let engine = EngineBuilder::new()
            .register(TaskDefinition::one_off("sync.push"))
            .unwrap()
            .expect_tasks(&["sync.push"])
            .build()
            .unwrap();

        assert_eq!(engine.registry().names(), vec!["sync.push".to_string()]);
    }

    #[test]
    fn build_missing_task_types() {
        let result = EngineBuilder::new()
            .register(TaskDefinition::one_off("sync.push"))
            .unwrap()
            .expect_tasks(&["sync.push", "sync.contacts"])
            .build();

        assert!(matches!(
            result,
            Err(BuildError::MissingTaskTypes(missing)) if missing == vec!["sync.contacts".to_string()]
        ));
    }

    #[test]
    fn build_without_expectations() {
        assert!(EngineBuilder::new().build().is_ok());
    }

    #[test]
    fn duplicate_registration_fails_early() {
        let result = EngineBuilder::new().register_all([
            TaskDefinition::one_off("sync.push"),
            TaskDefinition::one_off("sync.push"),
        ]);

        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(_))));
    }
}
