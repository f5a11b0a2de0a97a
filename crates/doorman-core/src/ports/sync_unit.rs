//! SyncUnit port - one data domain's remote reconciliation.

use async_trait::async_trait;

use crate::domain::SyncError;

/// A named, independently failable unit of sync work against one data
/// domain (directory, amenities, home config, vacancy, pending requests,
/// pending logs).
///
/// The engine treats `sync` as opaque: it completes or fails as a whole and
/// is never retried on its own. Implementations must be idempotent because a
/// failed body re-runs every unit from the start.
#[async_trait]
pub trait SyncUnit: Send + Sync {
    /// Stable name used in logs and `last_error`.
    fn name(&self) -> &str;

    async fn sync(&self) -> Result<(), SyncError>;
}
