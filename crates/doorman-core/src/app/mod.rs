//! App - アプリケーション層
//!
//! ports と engine を組み合わせて kiosk の同期ポリシーを実装します。
//!
//! # 主要コンポーネント
//! - **EngineBuilder**: JobEngine の構築とワイヤリング（Fail-fast 検証）
//! - **SyncOrchestrator**: session / UI イベントから task を submit
//! - **SyncUnits / tasks**: 4 つの TaskDefinition
//! - **SyncConfig**: TOML 設定

pub mod builder;
pub mod config;
pub mod orchestrator;
pub mod tasks;

pub use self::builder::{BuildError, EngineBuilder};
pub use self::config::{ConfigError, SyncConfig};
pub use self::orchestrator::{SessionEvent, SyncOrchestrator};
pub use self::tasks::SyncUnits;
