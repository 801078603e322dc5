//! Durable write queues with at-least-once upload bookkeeping.
//!
//! Writes captured while offline land here first and survive restarts.
//! Items leave the pending set only when the remote service confirms
//! them; failed uploads keep their place, with the error attached, until
//! a later run succeeds or the user cancels the item.

use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::params;
use tracing::debug;

use hemolink_common::{Error, QueueKind, Result, SyncState};

use crate::database::{db_err, from_millis, to_millis, Database};
use crate::records::QueueRecord;

/// Backing table for a queue kind.
pub(crate) fn table_for(kind: QueueKind) -> &'static str {
    match kind {
        QueueKind::Emergency => "emergency_queue",
        QueueKind::Delivery => "delivery_queue",
    }
}

// The synced column holds 0 or 1 so its index stays orderable. The enum
// maps to the integer here and nowhere else.
fn state_to_flag(state: SyncState) -> i64 {
    match state {
        SyncState::Pending => 0,
        SyncState::Synced => 1,
    }
}

fn flag_to_state(flag: i64) -> SyncState {
    if flag == 0 {
        SyncState::Pending
    } else {
        SyncState::Synced
    }
}

/// Generate a temporary id for a freshly captured write.
///
/// The millisecond stamp keeps ids roughly sortable for debugging; the
/// random suffix keeps same-millisecond captures distinct. The id is
/// replaced by a server-assigned one at reconciliation.
pub fn temp_id() -> String {
    format!(
        "local-{}-{:08x}",
        Utc::now().timestamp_millis(),
        rand::random::<u32>()
    )
}

/// A queued write with its delivery bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem<R> {
    /// Temporary local id, or the server id after reconciliation.
    pub id: String,
    /// The captured payload.
    pub record: R,
    /// When the write was captured locally.
    pub created_at: DateTime<Utc>,
    /// `Pending` items are picked up by the next sync run.
    pub state: SyncState,
    /// Failure message from the most recent upload attempt, if it failed.
    pub sync_error: Option<String>,
}

/// Row counts for one queue, for status displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueCounts {
    /// Items not yet confirmed by the remote service.
    pub pending: usize,
    /// Pending items whose last upload attempt failed.
    pub failed: usize,
    /// Items confirmed by the remote service.
    pub synced: usize,
}

/// Durable FIFO queue of local writes awaiting upload.
///
/// The record type decides which table the queue reads; two queues over
/// the same database never see each other's rows.
#[derive(Clone)]
pub struct WriteQueue<R: QueueRecord> {
    db: Arc<Database>,
    _record: PhantomData<R>,
}

impl<R: QueueRecord> WriteQueue<R> {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            _record: PhantomData,
        }
    }

    fn table() -> &'static str {
        table_for(R::QUEUE)
    }

    /// Insert a new `Pending` item and return its temporary id.
    ///
    /// # Errors
    /// - `Error::Serialization` if the payload cannot be encoded
    /// - `Error::Storage` if the insert fails
    pub fn enqueue(&self, record: &R) -> Result<String> {
        let id = temp_id();
        self.enqueue_with_id(&id, record)?;
        Ok(id)
    }

    /// Insert a new `Pending` item under a caller-provided id.
    ///
    /// The optimistic enqueue path generates its id before touching the
    /// store, so the id survives even when this insert does not. Writes
    /// racing on one id are last-write-wins, like every other row write.
    pub fn enqueue_with_id(&self, id: &str, record: &R) -> Result<()> {
        let now = Utc::now();
        let payload =
            serde_json::to_string(record).map_err(|e| Error::Serialization(e.to_string()))?;

        self.db.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO {} (id, payload, created_at, synced, sync_error)
                     VALUES (?1, ?2, ?3, ?4, NULL)",
                    Self::table()
                ),
                params![id, payload, to_millis(now), state_to_flag(SyncState::Pending)],
            )
            .map_err(db_err)?;
            Ok(())
        })?;

        debug!("{}: enqueued {}", Self::table(), id);
        Ok(())
    }

    /// All `Pending` items, oldest first.
    ///
    /// Creation order is the upload order sync runs follow; ties on the
    /// millisecond stamp fall back to insertion order.
    pub fn list_pending(&self) -> Result<Vec<QueueItem<R>>> {
        self.query_items("WHERE synced = 0 ORDER BY created_at ASC, rowid ASC")
    }

    /// Every item, synced ones included, oldest first.
    pub fn list_all(&self) -> Result<Vec<QueueItem<R>>> {
        self.query_items("ORDER BY created_at ASC, rowid ASC")
    }

    fn query_items(&self, tail: &str) -> Result<Vec<QueueItem<R>>> {
        let sql = format!(
            "SELECT id, payload, created_at, synced, sync_error FROM {} {}",
            Self::table(),
            tail
        );
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql).map_err(db_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                })
                .map_err(db_err)?;

            let mut items = Vec::new();
            for row in rows {
                items.push(item_from_row(row.map_err(db_err)?)?);
            }
            Ok(items)
        })
    }

    /// Fetch one item by id.
    pub fn get(&self, id: &str) -> Result<Option<QueueItem<R>>> {
        let sql = format!(
            "SELECT id, payload, created_at, synced, sync_error FROM {} WHERE id = ?1",
            Self::table()
        );
        self.db.with_conn(|conn| {
            let row = conn.query_row(&sql, [id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            });
            match row {
                Ok(raw) => Ok(Some(item_from_row(raw)?)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(db_err(e)),
            }
        })
    }

    /// Flip an item to `Synced`, reconciling its id when the server
    /// assigned a different one.
    ///
    /// With no server id (or an equal one) the row is updated in place.
    /// Otherwise the row is rewritten under the server id and the old row
    /// deleted, atomically, with payload and capture time intact. Any
    /// stale failure message is cleared either way.
    ///
    /// # Errors
    /// - `Error::NotFound` if no item with `id` exists
    pub fn mark_synced(&self, id: &str, server_id: Option<&str>) -> Result<()> {
        match server_id {
            None => self.flip_in_place(id),
            Some(sid) if sid == id => self.flip_in_place(id),
            Some(sid) => self.reconcile(id, sid),
        }
    }

    fn flip_in_place(&self, id: &str) -> Result<()> {
        self.db.with_conn(|conn| {
            let n = conn
                .execute(
                    &format!(
                        "UPDATE {} SET synced = 1, sync_error = NULL WHERE id = ?1",
                        Self::table()
                    ),
                    [id],
                )
                .map_err(db_err)?;
            if n == 0 {
                return Err(Error::NotFound(format!("queue item {}", id)));
            }
            Ok(())
        })
    }

    fn reconcile(&self, id: &str, server_id: &str) -> Result<()> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction().map_err(db_err)?;
            let n = tx
                .execute(
                    &format!(
                        "INSERT OR REPLACE INTO {t} (id, payload, created_at, synced, sync_error)
                         SELECT ?1, payload, created_at, 1, NULL FROM {t} WHERE id = ?2",
                        t = Self::table()
                    ),
                    params![server_id, id],
                )
                .map_err(db_err)?;
            if n == 0 {
                return Err(Error::NotFound(format!("queue item {}", id)));
            }
            tx.execute(
                &format!("DELETE FROM {} WHERE id = ?1", Self::table()),
                [id],
            )
            .map_err(db_err)?;
            tx.commit().map_err(db_err)?;
            debug!("{}: reconciled {} -> {}", Self::table(), id, server_id);
            Ok(())
        })
    }

    /// Attach a failure message to a pending item. The item stays
    /// eligible for the next run.
    ///
    /// # Errors
    /// - `Error::NotFound` if no item with `id` exists
    pub fn mark_sync_error(&self, id: &str, message: &str) -> Result<()> {
        self.db.with_conn(|conn| {
            let n = conn
                .execute(
                    &format!(
                        "UPDATE {} SET sync_error = ?1 WHERE id = ?2",
                        Self::table()
                    ),
                    params![message, id],
                )
                .map_err(db_err)?;
            if n == 0 {
                return Err(Error::NotFound(format!("queue item {}", id)));
            }
            Ok(())
        })
    }

    /// Hard-delete an item. For user-initiated cancellation; the sync
    /// path itself never removes rows.
    ///
    /// # Errors
    /// - `Error::NotFound` if no item with `id` exists
    pub fn remove(&self, id: &str) -> Result<()> {
        self.db.with_conn(|conn| {
            let n = conn
                .execute(&format!("DELETE FROM {} WHERE id = ?1", Self::table()), [id])
                .map_err(db_err)?;
            if n == 0 {
                return Err(Error::NotFound(format!("queue item {}", id)));
            }
            debug!("{}: removed {}", Self::table(), id);
            Ok(())
        })
    }

    /// Pending/failed/synced row counts.
    pub fn counts(&self) -> Result<QueueCounts> {
        let sql = format!(
            "SELECT
                SUM(CASE WHEN synced = 0 THEN 1 ELSE 0 END),
                SUM(CASE WHEN synced = 0 AND sync_error IS NOT NULL THEN 1 ELSE 0 END),
                SUM(CASE WHEN synced = 1 THEN 1 ELSE 0 END)
             FROM {}",
            Self::table()
        );
        self.db.with_conn(|conn| {
            conn.query_row(&sql, [], |row| {
                Ok(QueueCounts {
                    pending: row.get::<_, Option<i64>>(0)?.unwrap_or(0) as usize,
                    failed: row.get::<_, Option<i64>>(1)?.unwrap_or(0) as usize,
                    synced: row.get::<_, Option<i64>>(2)?.unwrap_or(0) as usize,
                })
            })
            .map_err(db_err)
        })
    }
}

type RawItemRow = (String, String, i64, i64, Option<String>);

fn item_from_row<R: QueueRecord>(raw: RawItemRow) -> Result<QueueItem<R>> {
    let (id, payload, created_at, flag, sync_error) = raw;
    let record = serde_json::from_str(&payload)
        .map_err(|e| Error::Serialization(format!("queue item {}: {}", id, e)))?;
    Ok(QueueItem {
        id,
        record,
        created_at: from_millis(created_at),
        state: flag_to_state(flag),
        sync_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::EmergencyRequest;
    use hemolink_common::{BloodType, Urgency};
    use proptest::prelude::*;

    fn sample_request(patient: &str) -> EmergencyRequest {
        EmergencyRequest {
            patient_name: patient.to_string(),
            hospital: "City General".to_string(),
            blood_type: BloodType::APositive,
            units: 2,
            urgency: Urgency::Urgent,
            contact_phone: None,
            notes: None,
        }
    }

    fn queue() -> WriteQueue<EmergencyRequest> {
        WriteQueue::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    #[test]
    fn test_enqueue_creates_pending_item_with_local_id() {
        let queue = queue();
        let id = queue.enqueue(&sample_request("Jane")).unwrap();
        assert!(id.starts_with("local-"));

        let item = queue.get(&id).unwrap().unwrap();
        assert_eq!(item.state, SyncState::Pending);
        assert_eq!(item.sync_error, None);
        assert_eq!(item.record.patient_name, "Jane");
    }

    #[test]
    fn test_pending_listed_in_creation_order() {
        let queue = queue();
        let a = queue.enqueue(&sample_request("a")).unwrap();
        let b = queue.enqueue(&sample_request("b")).unwrap();
        let c = queue.enqueue(&sample_request("c")).unwrap();

        let ids: Vec<String> = queue
            .list_pending()
            .unwrap()
            .into_iter()
            .map(|item| item.id)
            .collect();
        assert_eq!(ids, vec![a, b, c]);
    }

    #[test]
    fn test_mark_synced_in_place_keeps_id() {
        let queue = queue();
        let id = queue.enqueue(&sample_request("Jane")).unwrap();

        queue.mark_synced(&id, None).unwrap();
        let item = queue.get(&id).unwrap().unwrap();
        assert_eq!(item.state, SyncState::Synced);
        assert!(queue.list_pending().unwrap().is_empty());
    }

    #[test]
    fn test_mark_synced_with_equal_server_id_keeps_row() {
        let queue = queue();
        let id = queue.enqueue(&sample_request("Jane")).unwrap();

        queue.mark_synced(&id, Some(&id)).unwrap();
        let item = queue.get(&id).unwrap().unwrap();
        assert_eq!(item.state, SyncState::Synced);
        assert_eq!(queue.list_all().unwrap().len(), 1);
    }

    #[test]
    fn test_mark_synced_clears_stale_error() {
        let queue = queue();
        let id = queue.enqueue(&sample_request("Jane")).unwrap();
        queue.mark_sync_error(&id, "timeout").unwrap();

        queue.mark_synced(&id, None).unwrap();
        let item = queue.get(&id).unwrap().unwrap();
        assert_eq!(item.sync_error, None);
    }

    #[test]
    fn test_reconcile_rewrites_under_server_id() {
        let queue = queue();
        let local = queue.enqueue(&sample_request("Jane")).unwrap();
        let created_at = queue.get(&local).unwrap().unwrap().created_at;

        queue.mark_synced(&local, Some("srv-42")).unwrap();

        assert!(queue.get(&local).unwrap().is_none());
        let item = queue.get("srv-42").unwrap().unwrap();
        assert_eq!(item.state, SyncState::Synced);
        assert_eq!(item.record.patient_name, "Jane");
        assert_eq!(item.created_at, created_at);
        assert_eq!(queue.list_all().unwrap().len(), 1);
    }

    #[test]
    fn test_mark_synced_unknown_id_fails() {
        let queue = queue();
        let err = queue.mark_synced("local-0-00000000", None).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let err = queue
            .mark_synced("local-0-00000000", Some("srv-1"))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_mark_sync_error_keeps_item_pending() {
        let queue = queue();
        let id = queue.enqueue(&sample_request("Jane")).unwrap();

        queue.mark_sync_error(&id, "conflict").unwrap();

        let pending = queue.list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].sync_error.as_deref(), Some("conflict"));
        assert_eq!(pending[0].state, SyncState::Pending);
    }

    #[test]
    fn test_remove_deletes_item() {
        let queue = queue();
        let id = queue.enqueue(&sample_request("Jane")).unwrap();

        queue.remove(&id).unwrap();
        assert!(queue.get(&id).unwrap().is_none());
        assert!(matches!(queue.remove(&id), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_counts_by_state() {
        let queue = queue();
        let a = queue.enqueue(&sample_request("a")).unwrap();
        let b = queue.enqueue(&sample_request("b")).unwrap();
        let _c = queue.enqueue(&sample_request("c")).unwrap();

        queue.mark_synced(&a, None).unwrap();
        queue.mark_sync_error(&b, "timeout").unwrap();

        let counts = queue.counts().unwrap();
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.synced, 1);
    }

    #[test]
    fn test_corrupt_payload_is_reported_not_dropped() {
        let queue = queue();
        queue
            .db
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO emergency_queue (id, payload, created_at, synced)
                     VALUES ('bad-1', 'not json', 1, 0)",
                    [],
                )
                .map_err(db_err)?;
                Ok(())
            })
            .unwrap();

        let err = queue.list_pending().unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
        assert!(err.to_string().contains("bad-1"));
    }

    proptest! {
        // Queues drain oldest-first no matter how many writes land in the
        // same millisecond.
        #[test]
        fn prop_pending_preserves_enqueue_order(patients in proptest::collection::vec("[a-z]{1,8}", 1..12)) {
            let queue = queue();
            let mut expected = Vec::new();
            for patient in &patients {
                expected.push(queue.enqueue(&sample_request(patient)).unwrap());
            }

            let listed: Vec<String> = queue
                .list_pending()
                .unwrap()
                .into_iter()
                .map(|item| item.id)
                .collect();
            prop_assert_eq!(listed, expected);
        }
    }
}
