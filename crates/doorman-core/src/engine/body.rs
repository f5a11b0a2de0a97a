//! Task body runner: the ordered SyncUnit composition of a definition.
//!
//! Units run sequentially in declared order, without isolation. The first
//! error ends the attempt; the next attempt starts again from the first unit.
//! Cancellation is checked before each unit and never interrupts one.

use tokio::sync::watch;
use tracing::debug;

use crate::domain::{Outcome, TaskDefinition};

pub async fn run_body(definition: &TaskDefinition, cancel: &watch::Receiver<bool>) -> Outcome {
    for unit in definition.units() {
        if *cancel.borrow() {
            debug!(unit = unit.name(), "cancel requested; stopping before unit");
            return Outcome::cancelled();
        }

        debug!(unit = unit.name(), "running sync unit");
        if let Err(err) = unit.sync().await {
            return Outcome::from_error(unit.name(), &err);
        }
    }
    Outcome::success()
}
