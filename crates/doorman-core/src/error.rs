use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by a [`TaskStore`](crate::ports::TaskStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupted data: {0}")]
    CorruptedData(String),

    #[error("task store at {} is owned by another process", .0.display())]
    Locked(PathBuf),
}

/// Errors surfaced by the [`JobEngine`](crate::engine::JobEngine).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no task definition registered for name={0}")]
    UnknownTask(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
