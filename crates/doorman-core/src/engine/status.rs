//! Status - instance の状態別件数

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceCounts {
    pub enqueued: usize,
    pub running: usize,
    pub retry: usize,
    pub success: usize,
    pub cancelled: usize,
    pub failed: usize,
}

impl InstanceCounts {
    /// Instances that can still transition.
    pub fn active(&self) -> usize {
        self.enqueued + self.running + self.retry
    }
}
