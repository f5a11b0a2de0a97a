//! Instance state machine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// State of a task instance.
///
/// State transitions:
/// - Enqueued -> Running -> Success
/// - Enqueued -> Running -> Retry -> Enqueued (until success or cancel)
/// - Enqueued -> Running -> Failed (permanent error)
/// - Enqueued | Retry | Running -> Cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// Waiting for `next_eligible_at` and its constraints.
    Enqueued,

    /// Leased by a worker; body is executing.
    Running,

    /// Waiting out a backoff delay after a transient failure.
    Retry,

    /// Body completed.
    Success,

    /// Cancelled by name or superseded by a `Replace` enqueue.
    Cancelled,

    /// Body raised a permanent error; not retried.
    Failed,
}

impl InstanceState {
    pub const ALL: [InstanceState; 6] = [
        InstanceState::Enqueued,
        InstanceState::Running,
        InstanceState::Retry,
        InstanceState::Success,
        InstanceState::Cancelled,
        InstanceState::Failed,
    ];

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InstanceState::Success | InstanceState::Cancelled | InstanceState::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InstanceState::Enqueued => "enqueued",
            InstanceState::Running => "running",
            InstanceState::Retry => "retry",
            InstanceState::Success => "success",
            InstanceState::Cancelled => "cancelled",
            InstanceState::Failed => "failed",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InstanceState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown instance state '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(InstanceState::Enqueued, false)]
    #[case(InstanceState::Running, false)]
    #[case(InstanceState::Retry, false)]
    #[case(InstanceState::Success, true)]
    #[case(InstanceState::Cancelled, true)]
    #[case(InstanceState::Failed, true)]
    fn terminal_states(#[case] state: InstanceState, #[case] terminal: bool) {
        assert_eq!(state.is_terminal(), terminal);
    }

    #[test]
    fn string_form_matches_serde() {
        for state in InstanceState::ALL {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state.as_str()));
            assert_eq!(state.as_str().parse::<InstanceState>().unwrap(), state);
        }
    }

    #[test]
    fn unknown_state_is_rejected() {
        assert!("dead".parse::<InstanceState>().is_err());
    }
}
