//! Per-queue sync session state.

use tokio::sync::{Mutex, MutexGuard};

use hemolink_common::SyncStatus;

use crate::status::{StatusBroadcaster, StatusSubscription};

/// Owns one queue's run gate and status channel.
///
/// Create one coordinator per queue kind and share it: runs on different
/// queues interleave freely, while concurrent runs on the same queue
/// collapse to the one that claimed the gate first.
pub struct SyncCoordinator {
    gate: Mutex<()>,
    status: StatusBroadcaster,
}

impl SyncCoordinator {
    pub fn new() -> Self {
        Self {
            gate: Mutex::new(()),
            status: StatusBroadcaster::new(),
        }
    }

    /// Claim the run gate, or `None` if a run is already in flight.
    /// Dropping the permit releases the gate, whatever happened meanwhile.
    pub fn try_begin(&self) -> Option<SyncPermit<'_>> {
        self.gate
            .try_lock()
            .ok()
            .map(|guard| SyncPermit { _guard: guard })
    }

    /// Listen for this queue's status updates.
    pub fn subscribe(
        &self,
        listener: impl Fn(SyncStatus) + Send + Sync + 'static,
    ) -> StatusSubscription {
        self.status.subscribe(listener)
    }

    /// Report a status update to this queue's listeners.
    pub fn broadcast(&self, status: SyncStatus) {
        self.status.broadcast(status);
    }

    /// The most recent status, if any run has reported yet.
    pub fn last_status(&self) -> Option<SyncStatus> {
        self.status.last()
    }
}

impl Default for SyncCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive claim on a queue's sync gate.
pub struct SyncPermit<'a> {
    _guard: MutexGuard<'a, ()>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_begin_is_exclusive() {
        let coordinator = SyncCoordinator::new();

        let permit = coordinator.try_begin();
        assert!(permit.is_some());
        assert!(coordinator.try_begin().is_none());

        drop(permit);
        assert!(coordinator.try_begin().is_some());
    }

    #[test]
    fn test_status_channel_delegates() {
        let coordinator = SyncCoordinator::new();
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let _sub = coordinator.subscribe({
            let seen = seen.clone();
            move |status| seen.lock().unwrap().push(status)
        });

        coordinator.broadcast(SyncStatus::Syncing);

        assert_eq!(*seen.lock().unwrap(), vec![SyncStatus::Syncing]);
        assert_eq!(coordinator.last_status(), Some(SyncStatus::Syncing));
    }

    #[test]
    fn test_independent_coordinators_do_not_share_gates() {
        let first = SyncCoordinator::new();
        let second = SyncCoordinator::new();

        let _permit = first.try_begin().unwrap();
        assert!(second.try_begin().is_some());
    }
}
