//! SQLite-backed durable store shared by the write queues and the
//! facility cache.
//!
//! One database file per app session. Opening brings the schema up to
//! date via `user_version` migrations and rewrites any legacy rows the
//! current schema cannot index.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use tracing::{info, warn};

use hemolink_common::{Error, Result};

/// Current schema version, tracked in SQLite's `user_version` pragma.
/// Migrations are additive only; downgrades are not supported.
const SCHEMA_VERSION: i32 = 2;

/// Map a driver error into the common storage error.
pub(crate) fn db_err(e: rusqlite::Error) -> Error {
    Error::Storage(e.to_string())
}

/// Unix-millisecond encoding used for every timestamp column.
pub(crate) fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

/// Handle to the local durable store.
///
/// Wraps a single SQLite connection behind a mutex; clone the surrounding
/// `Arc` to share it. Statements are short-lived and the lock is never
/// held across an await point.
#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Create or open the store at `path` and migrate it to the current
    /// schema. Parent directories are created as needed.
    ///
    /// # Errors
    /// - `Error::StorageInit` if the file cannot be opened or migrated
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::StorageInit(format!("create {}: {}", parent.display(), e))
                })?;
            }
        }
        let conn = Connection::open(path).map_err(|e| Error::StorageInit(e.to_string()))?;
        Self::from_connection(conn)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| Error::StorageInit(e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        migrate(&conn).map_err(|e| Error::StorageInit(e.to_string()))?;
        if let Err(e) = normalize_legacy_flags(&conn) {
            // A failed rewrite pass must never block opening; unnormalized
            // rows stay invisible to the pending index until the next open.
            warn!("Sync flag normalization incomplete: {}", e);
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` with the connection locked.
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock().unwrap();
        f(&mut conn)
    }
}

/// Bookkeeping row describing the last refresh of one cached domain.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncMetadata {
    /// Domain key, e.g. `"facilities"`.
    pub key: String,
    /// When the domain was last refreshed from the remote service.
    pub last_sync: DateTime<Utc>,
    /// Shape version of the cached rows.
    pub version: u32,
}

pub(crate) fn read_sync_metadata(conn: &Connection, key: &str) -> Result<Option<SyncMetadata>> {
    let mut stmt = conn
        .prepare("SELECT key, last_sync, version FROM sync_metadata WHERE key = ?1")
        .map_err(db_err)?;

    let row = stmt.query_row([key], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
        ))
    });

    match row {
        Ok((key, last_sync, version)) => Ok(Some(SyncMetadata {
            key,
            last_sync: from_millis(last_sync),
            version: version as u32,
        })),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(db_err(e)),
    }
}

pub(crate) fn write_sync_metadata(conn: &Connection, meta: &SyncMetadata) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO sync_metadata (key, last_sync, version) VALUES (?1, ?2, ?3)",
        params![meta.key, to_millis(meta.last_sync), meta.version as i64],
    )
    .map_err(db_err)?;
    Ok(())
}

fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if version < 1 {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS facility_cache (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                city TEXT NOT NULL,
                phone TEXT,
                distance_km REAL,
                cached_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_facility_cache_cached_at
                ON facility_cache(cached_at);

            CREATE TABLE IF NOT EXISTS emergency_queue (
                id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0,
                sync_error TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_emergency_queue_created_at
                ON emergency_queue(created_at);

            CREATE TABLE IF NOT EXISTS delivery_queue (
                id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0,
                sync_error TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_delivery_queue_created_at
                ON delivery_queue(created_at);

            CREATE TABLE IF NOT EXISTS sync_metadata (
                key TEXT PRIMARY KEY,
                last_sync INTEGER NOT NULL,
                version INTEGER NOT NULL
            );
            "#,
        )?;
    }

    if version < 2 {
        conn.execute_batch(
            r#"
            CREATE INDEX IF NOT EXISTS idx_emergency_queue_synced
                ON emergency_queue(synced);
            CREATE INDEX IF NOT EXISTS idx_delivery_queue_synced
                ON delivery_queue(synced);
            "#,
        )?;
    }

    if version < SCHEMA_VERSION {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        info!("Store schema migrated to v{}", SCHEMA_VERSION);
    }

    Ok(())
}

/// Rewrite rows whose `synced` flag was written as the text `'true'` or
/// `'false'` by pre-v2 builds. The synced index only orders integers, so
/// such rows would otherwise never be picked up again.
///
/// Unrecognized text values are logged and left alone; a row that fails
/// to rewrite fails alone, never the whole pass.
fn normalize_legacy_flags(conn: &Connection) -> Result<()> {
    for table in ["emergency_queue", "delivery_queue"] {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT id, synced FROM {} WHERE typeof(synced) = 'text'",
                table
            ))
            .map_err(|e| Error::Normalization(e.to_string()))?;

        let rows: Vec<(String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(|e| Error::Normalization(e.to_string()))?
            .collect::<rusqlite::Result<_>>()
            .map_err(|e| Error::Normalization(e.to_string()))?;

        let mut rewritten = 0usize;
        for (id, raw) in rows {
            let flag = match raw.as_str() {
                "true" => 1i64,
                "false" => 0i64,
                other => {
                    warn!(
                        "{}: skipping row {}: unrecognized sync flag {:?}",
                        table, id, other
                    );
                    continue;
                }
            };
            match conn.execute(
                &format!("UPDATE {} SET synced = ?1 WHERE id = ?2", table),
                params![flag, id],
            ) {
                Ok(_) => rewritten += 1,
                Err(e) => warn!("{}: could not rewrite row {}: {}", table, id, e),
            }
        }

        if rewritten > 0 {
            info!("{}: normalized {} legacy sync flags", table, rewritten);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn raw_v1_store(path: &Path) {
        // Shape written by pre-v2 builds: same tables, boolean flags
        // stored as text, user_version 1.
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE emergency_queue (
                id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0,
                sync_error TEXT
            );
            CREATE TABLE delivery_queue (
                id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0,
                sync_error TEXT
            );
            CREATE TABLE facility_cache (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                city TEXT NOT NULL,
                phone TEXT,
                distance_km REAL,
                cached_at INTEGER NOT NULL
            );
            CREATE TABLE sync_metadata (
                key TEXT PRIMARY KEY,
                last_sync INTEGER NOT NULL,
                version INTEGER NOT NULL
            );
            PRAGMA user_version = 1;
            "#,
        )
        .unwrap();
        conn.execute(
            "INSERT INTO emergency_queue (id, payload, created_at, synced) VALUES
                ('legacy-1', '{}', 1, 'true'),
                ('legacy-2', '{}', 2, 'false'),
                ('legacy-3', '{}', 3, 'maybe')",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_open_creates_store_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("hemolink.db");
        let _db = Database::open(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_open_unusable_path_fails_with_storage_init() {
        let temp = TempDir::new().unwrap();
        // A directory is not a database file.
        let err = Database::open(temp.path()).unwrap_err();
        assert!(matches!(err, Error::StorageInit(_)));
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("hemolink.db");
        drop(Database::open(&path).unwrap());
        drop(Database::open(&path).unwrap());

        let db = Database::open(&path).unwrap();
        let version: i32 = db
            .with_conn(|conn| {
                conn.query_row("PRAGMA user_version", [], |row| row.get(0))
                    .map_err(db_err)
            })
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_legacy_text_flags_are_normalized_on_open() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("hemolink.db");
        raw_v1_store(&path);

        drop(Database::open(&path).unwrap());

        let conn = Connection::open(&path).unwrap();
        let flag: i64 = conn
            .query_row(
                "SELECT synced FROM emergency_queue WHERE id = 'legacy-1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(flag, 1);

        let flag: i64 = conn
            .query_row(
                "SELECT synced FROM emergency_queue WHERE id = 'legacy-2'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(flag, 0);

        // Unrecognized values are skipped, not guessed at.
        let kind: String = conn
            .query_row(
                "SELECT typeof(synced) FROM emergency_queue WHERE id = 'legacy-3'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(kind, "text");

        let version: i32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_sync_metadata_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let meta = SyncMetadata {
            key: "facilities".to_string(),
            last_sync: from_millis(1_700_000_000_000),
            version: 1,
        };

        db.with_conn(|conn| write_sync_metadata(conn, &meta)).unwrap();
        let read = db
            .with_conn(|conn| read_sync_metadata(conn, "facilities"))
            .unwrap()
            .unwrap();
        assert_eq!(read, meta);

        let missing = db
            .with_conn(|conn| read_sync_metadata(conn, "inventory"))
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_millis_roundtrip() {
        let now = Utc::now();
        let back = from_millis(to_millis(now));
        assert_eq!(back.timestamp_millis(), now.timestamp_millis());
    }
}
