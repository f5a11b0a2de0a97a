//! doorman-core
//!
//! Offline-first sync engine for the building kiosk.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, definition, instance, state, outcome, backoff, errors）
//! - **ports**: 抽象化レイヤー（SyncUnit, TaskStore, Clock, IdGenerator, Connectivity）
//! - **impls**: 実装（SqliteTaskStore, InMemoryTaskStore, NetworkMonitor）
//! - **engine**: JobEngine（lease → run → complete, retry/backoff, recovery）
//! - **app**: EngineBuilder, SyncOrchestrator, task 定義, 設定

pub mod app;
pub mod domain;
pub mod engine;
pub mod error;
pub mod impls;
pub mod ports;

#[cfg(test)]
pub(crate) mod testing;

pub use app::{EngineBuilder, SessionEvent, SyncConfig, SyncOrchestrator, SyncUnits};
pub use domain::{ErrorKind, SyncError, TaskDefinition};
pub use engine::{JobEngine, WorkerGroup};
pub use error::{EngineError, StoreError};
pub use ports::SyncUnit;
