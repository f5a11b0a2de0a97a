//! Errors raised by sync units and their classification.

use thiserror::Error;

/// 実行エラーの分類
///
/// - Transient: 一時的なエラー（リトライする）
/// - Permanent: 恒久的なエラー（リトライ無意味、ログを出して止める）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
}

/// Error returned by [`SyncUnit::sync`](crate::ports::SyncUnit::sync).
///
/// Anything a unit does not explicitly classify is transient.
#[derive(Debug, Error)]
#[error("{kind:?} sync error: {message}")]
pub struct SyncError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SyncError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
            source: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_permanent(&self) -> bool {
        self.kind == ErrorKind::Permanent
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::transient(err.to_string()).with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_transient() {
        let err: SyncError = std::io::Error::other("connection reset").into();
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn display_includes_kind_and_message() {
        let err = SyncError::permanent("malformed payload");
        assert!(err.is_permanent());
        assert_eq!(err.to_string(), "Permanent sync error: malformed payload");
    }
}
