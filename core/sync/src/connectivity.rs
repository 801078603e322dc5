//! Host connectivity signal consumed by auto-sync.

use tokio::sync::watch;

/// Read side of the platform's online/offline signal.
///
/// The embedding layer owns the real source: browser events, a system
/// network manager, a reachability probe. The sync layer only reads the
/// current state and watches for changes. Watch channels coalesce, so a
/// flap faster than the watcher can wake is observed as its final state.
pub trait ConnectivityMonitor: Send + Sync {
    /// Whether the host currently believes it is online.
    fn is_online(&self) -> bool;

    /// Watch subsequent online/offline changes.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Channel-backed monitor driven by hand, by the embedding layer or a test.
pub struct ConnectivitySignal {
    tx: watch::Sender<bool>,
}

impl ConnectivitySignal {
    /// Create a signal with the given initial state.
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    /// Report the current state. Subscribers are only woken when the
    /// state actually changes.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|state| {
            let changed = *state != online;
            *state = online;
            changed
        });
    }
}

impl ConnectivityMonitor for ConnectivitySignal {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_tracks_state() {
        let signal = ConnectivitySignal::new(false);
        assert!(!signal.is_online());

        signal.set_online(true);
        assert!(signal.is_online());

        signal.set_online(false);
        assert!(!signal.is_online());
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions_only() {
        let signal = ConnectivitySignal::new(false);
        let mut rx = signal.subscribe();

        signal.set_online(true);
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update());

        // Re-reporting the same state is not a transition.
        signal.set_online(true);
        assert!(!rx.has_changed().unwrap());
    }
}
