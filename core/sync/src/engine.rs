//! Core sync engine that drains a write queue against an uploader.
//!
//! One engine per queue kind. A run snapshots the pending set once and
//! uploads items sequentially in creation order; failures are recorded
//! on the item and never abort the run. The coordinator's gate collapses
//! concurrent runs on the same queue to one, and its status channel
//! carries `Syncing` at the start and `Synced`/`Error` at the end.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use hemolink_common::{Error, Result, SyncStatus};
use hemolink_store::{QueueRecord, WriteQueue};

use crate::connectivity::ConnectivityMonitor;
use crate::coordinator::SyncCoordinator;
use crate::retry::{RetryConfig, RetryExecutor};
use crate::uploader::Uploader;

/// Configuration for the sync engine.
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    /// In-run retry policy for individual uploads. The default performs
    /// a single attempt; failed items wait for the next run regardless.
    pub retry: RetryConfig,
}

/// Aggregate outcome of one sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncReport {
    /// Items confirmed by the remote service during this run.
    pub synced: usize,
    /// Items attempted and left pending with an error attached.
    pub failed: usize,
}

/// Drains one durable write queue against an injected uploader.
#[derive(Clone)]
pub struct SyncEngine<R: QueueRecord> {
    queue: WriteQueue<R>,
    coordinator: Arc<SyncCoordinator>,
    retry: Arc<RetryExecutor>,
}

impl<R: QueueRecord> SyncEngine<R> {
    /// Create a new sync engine over `queue`, gated and reported through
    /// `coordinator`.
    pub fn new(
        queue: WriteQueue<R>,
        coordinator: Arc<SyncCoordinator>,
        config: SyncConfig,
    ) -> Self {
        Self {
            queue,
            coordinator,
            retry: Arc::new(RetryExecutor::new(config.retry)),
        }
    }

    /// The coordinator carrying this engine's gate and status channel.
    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    /// Drain the current pending snapshot through `uploader`.
    ///
    /// Items are uploaded one at a time, strictly in creation order. An
    /// accepted item flips to synced (reconciling to the server id when
    /// one is assigned); a failed item keeps its place with the error
    /// attached. Items captured after the snapshot wait for the next run.
    ///
    /// If a run is already in flight this returns `SyncReport::default()`
    /// without touching the queue; the status channel carries the real
    /// run's outcome.
    ///
    /// # Errors
    /// - `Error::Storage` / `Error::Serialization` if the pending snapshot
    ///   cannot be read. Per-item upload failures are tallied, not
    ///   returned.
    pub async fn run_sync(&self, uploader: &dyn Uploader<R>) -> Result<SyncReport> {
        let Some(permit) = self.coordinator.try_begin() else {
            debug!("{}: sync already in flight, skipping", R::QUEUE);
            return Ok(SyncReport::default());
        };

        self.coordinator.broadcast(SyncStatus::Syncing);

        let items = match self.queue.list_pending() {
            Ok(items) => items,
            Err(e) => {
                error!("{}: could not read pending items: {}", R::QUEUE, e);
                drop(permit);
                self.coordinator.broadcast(SyncStatus::Error);
                return Err(e);
            }
        };

        info!("{}: syncing {} pending items", R::QUEUE, items.len());
        let mut report = SyncReport::default();

        for item in &items {
            match self.retry.execute(|| uploader.upload(item)).await {
                Ok(ack) => match self.queue.mark_synced(&item.id, ack.server_id.as_deref()) {
                    Ok(()) => {
                        debug!("{}: uploaded {}", R::QUEUE, item.id);
                        report.synced += 1;
                    }
                    Err(e) => {
                        // The upload landed but the local flip did not;
                        // the item stays pending and uploads again later.
                        error!("{}: could not record sync of {}: {}", R::QUEUE, item.id, e);
                        self.attach_error(&item.id, &e);
                        report.failed += 1;
                    }
                },
                Err(e) => {
                    error!("{}: upload of {} failed: {}", R::QUEUE, item.id, e);
                    self.attach_error(&item.id, &e);
                    report.failed += 1;
                }
            }
        }

        drop(permit);
        let status = if report.failed == 0 {
            SyncStatus::Synced
        } else {
            SyncStatus::Error
        };
        self.coordinator.broadcast(status);

        info!(
            "{}: sync finished: {} synced, {} failed",
            R::QUEUE,
            report.synced,
            report.failed
        );
        Ok(report)
    }

    /// Watch `monitor` and fire one run per offline-to-online transition,
    /// plus one immediately when the host is already online. Runs are
    /// spawned detached: stopping the handle abandons future triggers,
    /// never a run already in flight.
    pub fn auto_sync(
        &self,
        monitor: Arc<dyn ConnectivityMonitor>,
        uploader: Arc<dyn Uploader<R>>,
    ) -> AutoSyncHandle {
        let engine = self.clone();
        let task = tokio::spawn(async move {
            let mut rx = monitor.subscribe();
            let mut online = monitor.is_online();
            debug!("{}: auto-sync watching connectivity (online={})", R::QUEUE, online);

            if online {
                engine.spawn_run(uploader.clone());
            }

            loop {
                if rx.changed().await.is_err() {
                    debug!("{}: connectivity source dropped", R::QUEUE);
                    break;
                }
                let now_online = *rx.borrow_and_update();
                if now_online && !online {
                    info!("{}: connectivity restored, starting sync", R::QUEUE);
                    engine.spawn_run(uploader.clone());
                }
                online = now_online;
            }
        });

        AutoSyncHandle { task }
    }

    fn spawn_run(&self, uploader: Arc<dyn Uploader<R>>) {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.run_sync(uploader.as_ref()).await {
                error!("{}: connectivity-triggered sync failed: {}", R::QUEUE, e);
            }
        });
    }

    fn attach_error(&self, id: &str, err: &Error) {
        // Uploader rejections keep their bare message; anything else keeps
        // its full description.
        let message = match err {
            Error::Upload(msg) => msg.clone(),
            other => other.to_string(),
        };
        if let Err(e) = self.queue.mark_sync_error(id, &message) {
            warn!("{}: could not attach sync error to {}: {}", R::QUEUE, id, e);
        }
    }
}

/// Stops connectivity-triggered runs when dropped or explicitly stopped.
pub struct AutoSyncHandle {
    task: JoinHandle<()>,
}

impl AutoSyncHandle {
    /// Stop watching for transitions. A run already in flight keeps going.
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for AutoSyncHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
