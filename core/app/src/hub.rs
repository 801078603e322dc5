//! The offline hub owning the shared store and per-queue sync sessions.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::warn;

use hemolink_common::{QueueKind, Result, SyncStatus};
use hemolink_store::{
    temp_id, CacheSyncStatus, CachedFacility, Database, DeliveryRecord, EmergencyRequest,
    Facility, FacilityCache, QueueCounts, QueueItem, QueueRecord, WriteQueue,
};
use hemolink_sync::{
    AutoSyncHandle, ConnectivityMonitor, StatusSubscription, SyncConfig, SyncCoordinator,
    SyncEngine, SyncReport, Uploader,
};

/// Configuration for an [`OfflineHub`].
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Where the durable store lives. Parent directories are created on
    /// first open.
    pub db_path: PathBuf,
    /// Sync engine tuning applied to both queues.
    pub sync: SyncConfig,
}

impl HubConfig {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            sync: SyncConfig::default(),
        }
    }

    /// Replace the default sync tuning.
    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }
}

/// Facade over the offline core, one instance per app session.
///
/// The hub lazily opens the durable store on first use and hands every
/// component the same `Arc<Database>`. Each queue kind gets its own
/// [`SyncCoordinator`], so emergency and delivery runs interleave freely
/// while concurrent runs on one queue collapse to a single upload pass.
pub struct OfflineHub {
    config: HubConfig,
    db: OnceCell<Arc<Database>>,
    emergency: Arc<SyncCoordinator>,
    delivery: Arc<SyncCoordinator>,
}

impl OfflineHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            db: OnceCell::new(),
            emergency: Arc::new(SyncCoordinator::new()),
            delivery: Arc::new(SyncCoordinator::new()),
        }
    }

    /// The shared store handle, opened on first use.
    ///
    /// Concurrent first callers converge on one open; when the open
    /// fails the error goes to the caller that triggered it and the next
    /// call tries again.
    async fn store(&self) -> Result<Arc<Database>> {
        self.db
            .get_or_try_init(|| async { Database::open(&self.config.db_path).map(Arc::new) })
            .await
            .cloned()
    }

    async fn queue<R: QueueRecord>(&self) -> Result<WriteQueue<R>> {
        Ok(WriteQueue::new(self.store().await?))
    }

    async fn engine<R: QueueRecord>(&self) -> Result<SyncEngine<R>> {
        Ok(SyncEngine::new(
            self.queue().await?,
            self.coordinator(R::QUEUE).clone(),
            self.config.sync.clone(),
        ))
    }

    async fn facilities(&self) -> Result<FacilityCache> {
        Ok(FacilityCache::new(self.store().await?))
    }

    /// The coordinator carrying `kind`'s run gate and status channel.
    pub fn coordinator(&self, kind: QueueKind) -> &Arc<SyncCoordinator> {
        match kind {
            QueueKind::Emergency => &self.emergency,
            QueueKind::Delivery => &self.delivery,
        }
    }

    /// Capture a write and return its temporary id.
    ///
    /// This never fails: the id comes back even when the durable insert
    /// underneath does not happen, so the caller can proceed
    /// optimistically. A write that failed to persist is logged here and
    /// is gone after a restart; one that persisted surfaces any later
    /// upload failure through its `sync_error` and the status channel.
    pub async fn enqueue<R: QueueRecord>(&self, record: &R) -> String {
        let id = temp_id();
        let stored = match self.queue::<R>().await {
            Ok(queue) => queue.enqueue_with_id(&id, record),
            Err(e) => Err(e),
        };
        if let Err(e) = stored {
            warn!("{}: optimistic enqueue of {} not persisted: {}", R::QUEUE, id, e);
        }
        id
    }

    /// Pending items for `R`'s queue, oldest first.
    pub async fn list_pending<R: QueueRecord>(&self) -> Result<Vec<QueueItem<R>>> {
        self.queue::<R>().await?.list_pending()
    }

    /// Every item for `R`'s queue, synced ones included, oldest first.
    pub async fn list_all<R: QueueRecord>(&self) -> Result<Vec<QueueItem<R>>> {
        self.queue::<R>().await?.list_all()
    }

    /// Drain `R`'s queue through `uploader`.
    ///
    /// See [`SyncEngine::run_sync`] for the single-flight and
    /// partial-failure contract.
    pub async fn run_sync<R: QueueRecord>(
        &self,
        uploader: &dyn Uploader<R>,
    ) -> Result<SyncReport> {
        self.engine::<R>().await?.run_sync(uploader).await
    }

    /// Start connectivity-triggered sync for `R`'s queue.
    ///
    /// Fires one run per offline-to-online transition, plus an immediate
    /// one when the host is already online. Dropping the handle stops
    /// future triggers only.
    pub async fn auto_sync<R: QueueRecord>(
        &self,
        monitor: Arc<dyn ConnectivityMonitor>,
        uploader: Arc<dyn Uploader<R>>,
    ) -> Result<AutoSyncHandle> {
        Ok(self.engine::<R>().await?.auto_sync(monitor, uploader))
    }

    /// Listen for `kind`'s sync status updates.
    pub fn subscribe_status(
        &self,
        kind: QueueKind,
        listener: impl Fn(SyncStatus) + Send + Sync + 'static,
    ) -> StatusSubscription {
        self.coordinator(kind).subscribe(listener)
    }

    /// The most recent status broadcast for `kind`, if any run reported yet.
    pub fn last_status(&self, kind: QueueKind) -> Option<SyncStatus> {
        self.coordinator(kind).last_status()
    }

    /// Pending/failed/synced counts for one queue, for status displays.
    pub async fn queue_counts(&self, kind: QueueKind) -> Result<QueueCounts> {
        // Counting never touches payloads, so any record type of the
        // right kind will do.
        match kind {
            QueueKind::Emergency => self.queue::<EmergencyRequest>().await?.counts(),
            QueueKind::Delivery => self.queue::<DeliveryRecord>().await?.counts(),
        }
    }

    /// Cancel a captured write. User-initiated only; sync runs never
    /// remove items.
    pub async fn cancel<R: QueueRecord>(&self, id: &str) -> Result<()> {
        self.queue::<R>().await?.remove(id)
    }

    /// Replace cached facility listings with a freshly fetched set.
    pub async fn cache_facilities(&self, records: &[Facility]) -> Result<()> {
        self.facilities().await?.cache_records(records)
    }

    /// Cached facility listings, stale ones included.
    pub async fn cached_facilities(&self) -> Result<Vec<CachedFacility>> {
        self.facilities().await?.get_cached()
    }

    /// Advisory freshness signal for the facility cache.
    pub async fn facility_sync_status(&self) -> Result<CacheSyncStatus> {
        self.facilities().await?.sync_status()
    }

    /// Drop facility listings cached longer than `max_age` ago.
    pub async fn cleanup_facility_cache(&self, max_age: Duration) -> Result<usize> {
        self.facilities().await?.cleanup(max_age)
    }
}
