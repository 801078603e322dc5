//! Synchronization engine for HemoLink's offline write queues.
//!
//! This module drains the durable queues kept by `hemolink-store` against
//! a caller-supplied uploader, providing:
//! - Single-flight sync runs with per-queue gating
//! - Sequential, creation-ordered uploads with per-item failure bookkeeping
//! - Temporary-to-server id reconciliation on acknowledgement
//! - A subscribable status channel (`Syncing | Synced | Error`)
//! - Connectivity-triggered auto sync with an immediate catch-up run
//! - Optional in-run retry with exponential backoff
//!
//! # Architecture
//! The engine owns no transport: the embedding layer injects an
//! [`Uploader`] per queue and the host's connectivity signal, and reads
//! outcomes from the [`StatusBroadcaster`] and the queue itself.

pub mod connectivity;
pub mod coordinator;
pub mod engine;
pub mod retry;
pub mod status;
pub mod uploader;

pub use connectivity::{ConnectivityMonitor, ConnectivitySignal};
pub use coordinator::{SyncCoordinator, SyncPermit};
pub use engine::{AutoSyncHandle, SyncConfig, SyncEngine, SyncReport};
pub use retry::{RetryConfig, RetryExecutor};
pub use status::{StatusBroadcaster, StatusSubscription};
pub use uploader::{UploadAck, Uploader};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        // Verify all main types are accessible
        let _config = SyncConfig::default();
        let _retry_config = RetryConfig::default();
        let _coordinator = SyncCoordinator::new();
        let _broadcaster = StatusBroadcaster::new();
        let _signal = ConnectivitySignal::new(false);
    }
}
