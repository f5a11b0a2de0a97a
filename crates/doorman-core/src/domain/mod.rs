//! Domain model (ids, definitions, instances, states, outcomes, errors).

pub mod backoff;
pub mod definition;
pub mod errors;
pub mod ids;
pub mod instance;
pub mod outcome;
pub mod state;

pub use backoff::BackoffPolicy;
pub use definition::{Constraints, DedupPolicy, TaskDefinition, Trigger, TriggerKind};
pub use errors::{ErrorKind, SyncError};
pub use ids::{InstanceId, Id, IdMarker};
pub use instance::TaskInstance;
pub use outcome::{Outcome, OutcomeKind};
pub use state::InstanceState;
