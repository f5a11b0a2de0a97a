//! DefinitionRegistry - name から TaskDefinition を引く
//!
//! # 設計
//! - 初期化時に登録（mutable）
//! - 実行時は読み取りのみ（immutable）、ロック不要
//!
//! 再起動後に store から読み戻した instance は body を持たないので、
//! 同じ name の定義がここに登録されている必要があります。

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::TaskDefinition;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("task definition '{0}' is already registered")]
    AlreadyRegistered(String),
}

#[derive(Debug, Default)]
pub struct DefinitionRegistry {
    definitions: HashMap<String, Arc<TaskDefinition>>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: TaskDefinition) -> Result<(), RegistryError> {
        let name = definition.name().to_string();
        if self.definitions.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        self.definitions.insert(name, Arc::new(definition));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<TaskDefinition>> {
        self.definitions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.definitions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn register_and_get() {
        let mut registry = DefinitionRegistry::new();
        registry
            .register(TaskDefinition::one_off("sync.push"))
            .unwrap();

        assert!(registry.get("sync.push").is_some());
        assert!(registry.get("sync.contacts").is_none());
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = DefinitionRegistry::new();
        registry
            .register(TaskDefinition::one_off("sync.push"))
            .unwrap();

        let result = registry.register(TaskDefinition::periodic(
            "sync.push",
            Duration::from_secs(60),
        ));

        assert!(matches!(
            result,
            Err(RegistryError::AlreadyRegistered(name)) if name == "sync.push"
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn names_are_sorted() {
        let mut registry = DefinitionRegistry::new();
        registry.register(TaskDefinition::one_off("b")).unwrap();
        registry.register(TaskDefinition::one_off("a")).unwrap();

        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);
    }
}
