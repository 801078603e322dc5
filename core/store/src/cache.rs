//! Read-through cache of remote facility listings.
//!
//! Listings are fetched by the embedding app and dropped in here wholesale
//! on each refresh. Reads never consult the staleness window: stale data
//! beats no data when the network is gone, so callers get whatever is
//! cached and may surface the advisory flag from [`FacilityCache::sync_status`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::params;
use tracing::{debug, info};

use hemolink_common::{Error, Result};

use crate::database::{db_err, from_millis, to_millis, write_sync_metadata, Database, SyncMetadata};
use crate::records::{CachedFacility, Facility, FacilityKind};

/// Metadata key under which facility refreshes are tracked.
const FACILITIES_DOMAIN: &str = "facilities";

/// Shape version recorded with the metadata row.
const CACHE_VERSION: u32 = 1;

/// Age past which [`FacilityCache::sync_status`] reports the cache stale.
pub const STALE_AFTER: Duration = Duration::from_secs(30 * 60);

/// Default retention window for [`FacilityCache::cleanup`].
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Freshness signal for the facility cache.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheSyncStatus {
    /// When the cache was last refreshed, if ever.
    pub last_sync: Option<DateTime<Utc>>,
    /// Whether the last refresh is older than the staleness window.
    /// Advisory only; reads serve stale rows regardless.
    pub is_stale: bool,
}

/// Facility listings cached in the durable store.
#[derive(Clone)]
pub struct FacilityCache {
    db: Arc<Database>,
}

impl FacilityCache {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Upsert freshly fetched listings and bump the domain's last-sync
    /// marker, all in one transaction. Every row gets the same stamp.
    pub fn cache_records(&self, records: &[Facility]) -> Result<()> {
        let now = Utc::now();
        self.db.with_conn(|conn| {
            let tx = conn.transaction().map_err(db_err)?;
            for facility in records {
                tx.execute(
                    "INSERT OR REPLACE INTO facility_cache
                         (id, name, kind, city, phone, distance_km, cached_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        facility.id,
                        facility.name,
                        facility.kind.as_str(),
                        facility.city,
                        facility.phone,
                        facility.distance_km,
                        to_millis(now),
                    ],
                )
                .map_err(db_err)?;
            }
            write_sync_metadata(
                &tx,
                &SyncMetadata {
                    key: FACILITIES_DOMAIN.to_string(),
                    last_sync: now,
                    version: CACHE_VERSION,
                },
            )?;
            tx.commit().map_err(db_err)?;
            Ok(())
        })?;

        info!("Cached {} facility listings", records.len());
        Ok(())
    }

    /// Every cached listing, stale ones included.
    pub fn get_cached(&self) -> Result<Vec<CachedFacility>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, name, kind, city, phone, distance_km, cached_at
                     FROM facility_cache ORDER BY name ASC",
                )
                .map_err(db_err)?;

            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<f64>>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                })
                .map_err(db_err)?;

            let mut facilities = Vec::new();
            for row in rows {
                let (id, name, kind, city, phone, distance_km, cached_at) =
                    row.map_err(db_err)?;
                let kind = FacilityKind::parse(&kind).ok_or_else(|| {
                    Error::Serialization(format!("facility {}: unknown kind '{}'", id, kind))
                })?;
                facilities.push(CachedFacility {
                    facility: Facility {
                        id,
                        name,
                        kind,
                        city,
                        phone,
                        distance_km,
                    },
                    cached_at: from_millis(cached_at),
                });
            }
            Ok(facilities)
        })
    }

    /// Last refresh time and the advisory staleness flag. A cache that has
    /// never been refreshed reports stale.
    pub fn sync_status(&self) -> Result<CacheSyncStatus> {
        let meta = self
            .db
            .with_conn(|conn| crate::database::read_sync_metadata(conn, FACILITIES_DOMAIN))?;

        Ok(match meta {
            Some(meta) => {
                let age = Utc::now().signed_duration_since(meta.last_sync);
                CacheSyncStatus {
                    last_sync: Some(meta.last_sync),
                    is_stale: age.num_milliseconds() > STALE_AFTER.as_millis() as i64,
                }
            }
            None => CacheSyncStatus {
                last_sync: None,
                is_stale: true,
            },
        })
    }

    /// Delete listings cached strictly before `now - max_age`, returning
    /// how many went. Queue tables are never touched.
    pub fn cleanup(&self, max_age: Duration) -> Result<usize> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| Error::InvalidInput(format!("max_age: {}", e)))?;
        let cutoff = Utc::now() - max_age;

        let dropped = self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM facility_cache WHERE cached_at < ?1",
                params![to_millis(cutoff)],
            )
            .map_err(db_err)
        })?;

        if dropped > 0 {
            debug!("Dropped {} expired facility listings", dropped);
        }
        Ok(dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::WriteQueue;
    use crate::records::EmergencyRequest;
    use hemolink_common::{BloodType, SyncState, Urgency};

    fn facility(id: &str, name: &str) -> Facility {
        Facility {
            id: id.to_string(),
            name: name.to_string(),
            kind: FacilityKind::Hospital,
            city: "Springfield".to_string(),
            phone: Some("+1-555-0100".to_string()),
            distance_km: Some(3.2),
        }
    }

    fn cache() -> (Arc<Database>, FacilityCache) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        (db.clone(), FacilityCache::new(db))
    }

    fn backdate_rows(db: &Database, by: Duration) {
        let shift = by.as_millis() as i64;
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE facility_cache SET cached_at = cached_at - ?1",
                params![shift],
            )
            .map_err(db_err)?;
            conn.execute(
                "UPDATE sync_metadata SET last_sync = last_sync - ?1",
                params![shift],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_cache_and_read_back() {
        let (_db, cache) = cache();
        cache
            .cache_records(&[facility("f1", "Mercy"), facility("f2", "Central")])
            .unwrap();

        let listed = cache.get_cached().unwrap();
        assert_eq!(listed.len(), 2);
        // Sorted by name.
        assert_eq!(listed[0].facility.name, "Central");
        assert_eq!(listed[1].facility.name, "Mercy");
    }

    #[test]
    fn test_refresh_upserts_existing_rows() {
        let (_db, cache) = cache();
        cache.cache_records(&[facility("f1", "Mercy")]).unwrap();
        cache
            .cache_records(&[facility("f1", "Mercy Medical Center")])
            .unwrap();

        let listed = cache.get_cached().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].facility.name, "Mercy Medical Center");
    }

    #[test]
    fn test_never_refreshed_reports_stale() {
        let (_db, cache) = cache();
        let status = cache.sync_status().unwrap();
        assert_eq!(status.last_sync, None);
        assert!(status.is_stale);
    }

    #[test]
    fn test_fresh_cache_is_not_stale() {
        let (_db, cache) = cache();
        cache.cache_records(&[facility("f1", "Mercy")]).unwrap();

        let status = cache.sync_status().unwrap();
        assert!(status.last_sync.is_some());
        assert!(!status.is_stale);
    }

    #[test]
    fn test_cache_goes_stale_after_window() {
        let (db, cache) = cache();
        cache.cache_records(&[facility("f1", "Mercy")]).unwrap();
        backdate_rows(&db, STALE_AFTER + Duration::from_secs(60));

        let status = cache.sync_status().unwrap();
        assert!(status.is_stale);
        // Stale rows are still served.
        assert_eq!(cache.get_cached().unwrap().len(), 1);
    }

    #[test]
    fn test_cleanup_drops_only_expired_rows() {
        let (db, cache) = cache();
        cache.cache_records(&[facility("old", "Old Site")]).unwrap();
        backdate_rows(&db, DEFAULT_MAX_AGE + Duration::from_secs(3600));
        cache.cache_records(&[facility("new", "New Site")]).unwrap();

        let dropped = cache.cleanup(DEFAULT_MAX_AGE).unwrap();
        assert_eq!(dropped, 1);

        let remaining = cache.get_cached().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].facility.id, "new");
    }

    #[test]
    fn test_cleanup_never_touches_queues() {
        let (db, cache) = cache();
        let queue: WriteQueue<EmergencyRequest> = WriteQueue::new(db.clone());
        let id = queue
            .enqueue(&EmergencyRequest {
                patient_name: "Jane".to_string(),
                hospital: "City General".to_string(),
                blood_type: BloodType::ONegative,
                units: 1,
                urgency: Urgency::Critical,
                contact_phone: None,
                notes: None,
            })
            .unwrap();

        cache.cache_records(&[facility("f1", "Mercy")]).unwrap();
        backdate_rows(&db, DEFAULT_MAX_AGE + Duration::from_secs(3600));
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE emergency_queue SET created_at = 1",
                [],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .unwrap();

        cache.cleanup(DEFAULT_MAX_AGE).unwrap();

        let item = queue.get(&id).unwrap().unwrap();
        assert_eq!(item.state, SyncState::Pending);
    }
}
