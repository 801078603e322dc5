//! Durable local persistence for HemoLink.
//!
//! This module owns the SQLite store backing the offline write queues and
//! the facility reference cache. Everything a client captures while
//! offline lands here first; the sync layer drains it later.
//!
//! # Design Principles
//! - Writes survive restarts: queue items live in SQLite, never in memory
//! - One store handle per session, shared behind an `Arc`
//! - Payloads are opaque JSON to the queue; only bookkeeping is columnar
//! - Legacy rows are normalized at open, never at read time

pub mod cache;
pub mod database;
pub mod queue;
pub mod records;

pub use cache::{CacheSyncStatus, FacilityCache, DEFAULT_MAX_AGE, STALE_AFTER};
pub use database::{Database, SyncMetadata};
pub use queue::{temp_id, QueueCounts, QueueItem, WriteQueue};
pub use records::{
    CachedFacility, DeliveryRecord, EmergencyRequest, Facility, FacilityKind, QueueRecord,
};
