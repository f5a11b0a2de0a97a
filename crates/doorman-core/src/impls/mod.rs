//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **SqliteTaskStore**: 本番用の instance テーブル（再起動を跨いで残る）
//! - **InMemoryTaskStore**: テスト用
//! - **NetworkMonitor**: tokio watch ベースの Connectivity

pub mod memory_store;
pub mod network;
pub mod sqlite_store;

pub use self::memory_store::InMemoryTaskStore;
pub use self::network::NetworkMonitor;
pub use self::sqlite_store::SqliteTaskStore;
