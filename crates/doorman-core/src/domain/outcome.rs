//! Outcome model: the result of one execution attempt of a task body.

use serde::{Deserialize, Serialize};

use super::errors::SyncError;

/// A unified classification of an attempt result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Success,
    Retry,
    Failed,
    Cancelled,
}

/// Result of one attempt. Created once by the body runner, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub kind: OutcomeKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Name of the unit that raised, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_unit: Option<String>,
}

impl Outcome {
    pub fn success() -> Self {
        Self {
            kind: OutcomeKind::Success,
            reason: None,
            failed_unit: None,
        }
    }

    pub fn retry(reason: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Retry,
            reason: Some(reason.into()),
            failed_unit: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Failed,
            reason: Some(reason.into()),
            failed_unit: None,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: OutcomeKind::Cancelled,
            reason: None,
            failed_unit: None,
        }
    }

    /// Map a unit error onto `Retry` or `Failed` by its kind.
    pub fn from_error(unit: &str, err: &SyncError) -> Self {
        let outcome = if err.is_permanent() {
            Self::failed(err.message())
        } else {
            Self::retry(err.message())
        };
        outcome.with_failed_unit(unit)
    }

    pub fn with_failed_unit(mut self, unit: impl Into<String>) -> Self {
        self.failed_unit = Some(unit.into());
        self
    }

    /// Reason formatted for `last_error`, prefixed with the failing unit.
    pub fn error_text(&self) -> Option<String> {
        let reason = self.reason.as_deref()?;
        Some(match &self.failed_unit {
            Some(unit) => format!("{unit}: {reason}"),
            None => reason.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_kind_serializes_as_screaming_snake_case() {
        let s = serde_json::to_string(&OutcomeKind::Retry).unwrap();
        assert_eq!(s, "\"RETRY\"");
        let s = serde_json::to_string(&OutcomeKind::Cancelled).unwrap();
        assert_eq!(s, "\"CANCELLED\"");
    }

    #[test]
    fn transient_error_maps_to_retry() {
        let o = Outcome::from_error("vacancy", &SyncError::transient("503"));
        assert_eq!(o.kind, OutcomeKind::Retry);
        assert_eq!(o.error_text().as_deref(), Some("vacancy: 503"));
    }

    #[test]
    fn permanent_error_maps_to_failed() {
        let o = Outcome::from_error("directory", &SyncError::permanent("bad json"));
        assert_eq!(o.kind, OutcomeKind::Failed);
    }

    #[test]
    fn success_omits_optional_fields() {
        let v = serde_json::to_value(Outcome::success()).unwrap();
        assert_eq!(v, serde_json::json!({"kind": "SUCCESS"}));
    }
}
