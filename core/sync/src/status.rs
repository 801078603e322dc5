//! Subscribable sync status reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use hemolink_common::SyncStatus;

type Listener = Arc<dyn Fn(SyncStatus) + Send + Sync>;

struct Registry {
    listeners: Vec<(u64, Listener)>,
    last: Option<SyncStatus>,
}

/// Fan-out channel for `Syncing | Synced | Error` updates.
///
/// Listeners are plain callbacks. A broadcast snapshots the registry
/// before invoking anything, so a callback may subscribe or unsubscribe
/// (itself included) mid-delivery without panicking or starving the
/// listeners after it.
pub struct StatusBroadcaster {
    registry: Arc<Mutex<Registry>>,
    next_id: AtomicU64,
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                listeners: Vec::new(),
                last: None,
            })),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a listener. Dropping the returned subscription (or calling
    /// [`StatusSubscription::unsubscribe`]) removes it; updates already in
    /// delivery still arrive.
    pub fn subscribe(
        &self,
        listener: impl Fn(SyncStatus) + Send + Sync + 'static,
    ) -> StatusSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .lock()
            .unwrap()
            .listeners
            .push((id, Arc::new(listener)));
        StatusSubscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver `status` to every listener registered at this moment.
    pub fn broadcast(&self, status: SyncStatus) {
        let snapshot: Vec<Listener> = {
            let mut registry = self.registry.lock().unwrap();
            registry.last = Some(status);
            registry.listeners.iter().map(|(_, l)| l.clone()).collect()
        };
        // Invoke outside the lock so listeners can touch the registry.
        for listener in snapshot {
            listener(status);
        }
    }

    /// The most recently broadcast status, if any run has reported yet.
    pub fn last(&self) -> Option<SyncStatus> {
        self.registry.lock().unwrap().last
    }
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes its listener when dropped.
pub struct StatusSubscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl StatusSubscription {
    /// Remove the listener now. Dropping the subscription has the same
    /// effect; this just names the intent.
    pub fn unsubscribe(self) {}

    fn remove(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry
                .lock()
                .unwrap()
                .listeners
                .retain(|(id, _)| *id != self.id);
        }
    }
}

impl Drop for StatusSubscription {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> (Arc<Mutex<Vec<SyncStatus>>>, impl Fn(SyncStatus) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |status| sink.lock().unwrap().push(status))
    }

    #[test]
    fn test_subscribers_receive_broadcasts() {
        let broadcaster = StatusBroadcaster::new();
        let (seen, listener) = collector();
        let _sub = broadcaster.subscribe(listener);

        broadcaster.broadcast(SyncStatus::Syncing);
        broadcaster.broadcast(SyncStatus::Synced);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![SyncStatus::Syncing, SyncStatus::Synced]
        );
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let broadcaster = StatusBroadcaster::new();
        let (seen, listener) = collector();
        let sub = broadcaster.subscribe(listener);

        broadcaster.broadcast(SyncStatus::Syncing);
        sub.unsubscribe();
        broadcaster.broadcast(SyncStatus::Synced);

        assert_eq!(*seen.lock().unwrap(), vec![SyncStatus::Syncing]);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let broadcaster = StatusBroadcaster::new();
        let (seen, listener) = collector();
        {
            let _sub = broadcaster.subscribe(listener);
            broadcaster.broadcast(SyncStatus::Syncing);
        }
        broadcaster.broadcast(SyncStatus::Error);

        assert_eq!(*seen.lock().unwrap(), vec![SyncStatus::Syncing]);
    }

    #[test]
    fn test_unsubscribe_during_delivery_spares_the_rest() {
        let broadcaster = StatusBroadcaster::new();
        let (seen_first, listener_first) = collector();
        let (seen_second, listener_second) = collector();

        // The first listener tears itself down from inside its callback.
        let slot: Arc<Mutex<Option<StatusSubscription>>> = Arc::new(Mutex::new(None));
        let sub = broadcaster.subscribe({
            let slot = slot.clone();
            move |status| {
                listener_first(status);
                drop(slot.lock().unwrap().take());
            }
        });
        *slot.lock().unwrap() = Some(sub);
        let _second = broadcaster.subscribe(listener_second);

        broadcaster.broadcast(SyncStatus::Syncing);
        broadcaster.broadcast(SyncStatus::Synced);

        assert_eq!(*seen_first.lock().unwrap(), vec![SyncStatus::Syncing]);
        assert_eq!(
            *seen_second.lock().unwrap(),
            vec![SyncStatus::Syncing, SyncStatus::Synced]
        );
    }

    #[test]
    fn test_last_tracks_most_recent_broadcast() {
        let broadcaster = StatusBroadcaster::new();
        assert_eq!(broadcaster.last(), None);

        broadcaster.broadcast(SyncStatus::Syncing);
        broadcaster.broadcast(SyncStatus::Error);
        assert_eq!(broadcaster.last(), Some(SyncStatus::Error));
    }
}
