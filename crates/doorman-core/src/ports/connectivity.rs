//! Connectivity port - "network reachable" 信号
//!
//! JobEngine は requires_network な instance をこの信号でゲートします。
//! 実装は `impls::NetworkMonitor`（tokio watch）。

use tokio::sync::watch;

pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;

    /// Receiver that changes whenever reachability flips.
    fn subscribe(&self) -> watch::Receiver<bool>;
}
