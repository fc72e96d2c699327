//! Local SQLite database layer.
//!
//! Uses rusqlite in WAL mode. Provides schema migrations, the shared
//! connection handle, local settings helpers, and the persistent order
//! number counter. The `pending_orders` table backing the offline queue
//! lives here; its operations are in [`crate::queue`].

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::error::StorageError;

/// Shared handle to the local database.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

impl DbState {
    /// Lock the connection, mapping a poisoned mutex to a storage error
    /// instead of panicking.
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Unavailable("connection lock poisoned".into()))
    }
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Initialize the database at `{data_dir}/pos.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(data_dir: &Path) -> Result<DbState, StorageError> {
    fs::create_dir_all(data_dir)
        .map_err(|e| StorageError::Unavailable(format!("create data dir: {e}")))?;

    let db_path = data_dir.join("pos.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                // Also remove WAL/SHM files if present
                let wal = db_path.with_extension("db-wal");
                let shm = db_path.with_extension("db-shm");
                let _ = fs::remove_file(&wal);
                let _ = fs::remove_file(&shm);
            }
            open_and_configure(&db_path)?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection, StorageError> {
    let conn = Connection::open(path)?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<(), StorageError> {
    // Ensure schema_version table exists first
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Migration v1: settings, offline order queue, menu cache.
fn migrate_v1(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        -- local_settings (category/key/value store)
        CREATE TABLE IF NOT EXISTS local_settings (
            id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        -- offline order queue. seq preserves insertion order; local_id is
        -- the client-generated id reused as the service idempotency key.
        CREATE TABLE IF NOT EXISTS pending_orders (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            local_id TEXT NOT NULL UNIQUE,
            order_number TEXT,
            customer_name TEXT,
            items TEXT NOT NULL DEFAULT '[]',
            total REAL NOT NULL DEFAULT 0,
            payment_method TEXT NOT NULL,
            created_at TEXT NOT NULL,
            synced INTEGER NOT NULL DEFAULT 0,
            remote_id TEXT
        );

        -- menu snapshots fetched from the order service
        CREATE TABLE IF NOT EXISTS menu_cache (
            cache_key TEXT PRIMARY KEY,
            data TEXT NOT NULL,
            version TEXT,
            updated_at TEXT DEFAULT (datetime('now'))
        );

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )?;
    Ok(())
}

/// Migration v2: per-entry failure bookkeeping for the reconciliation pass.
fn migrate_v2(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        ALTER TABLE pending_orders ADD COLUMN last_error TEXT;
        ALTER TABLE pending_orders ADD COLUMN last_attempt_at TEXT;
        CREATE INDEX IF NOT EXISTS idx_pending_orders_unsynced
            ON pending_orders (synced, seq);

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Local settings
// ---------------------------------------------------------------------------

/// Read one value from `local_settings`, `None` on miss.
pub fn local_setting_get(db: &DbState, category: &str, key: &str) -> Option<String> {
    let conn = db.conn.lock().ok()?;
    conn.query_row(
        "SELECT setting_value FROM local_settings \
         WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Upsert one value into `local_settings`.
pub fn local_setting_set(
    db: &DbState,
    category: &str,
    key: &str,
    value: &str,
) -> Result<(), StorageError> {
    let conn = db.lock()?;
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at) \
         VALUES (?1, ?2, ?3, datetime('now')) \
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET \
            setting_value = excluded.setting_value, updated_at = excluded.updated_at",
        params![category, key, value],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Order number generation
// ---------------------------------------------------------------------------

/// Generate a sequential order number in format ORD-DDMMYYYY-NNNNN.
///
/// Uses `local_settings` (category='orders', key='order_counter') as a
/// persistent counter so numbering survives restarts.
pub fn next_order_number(db: &DbState) -> Result<String, StorageError> {
    let conn = db.lock()?;

    let today = chrono::Local::now();
    let date_display = today.format("%d%m%Y").to_string();

    let current: i64 = conn
        .query_row(
            "SELECT setting_value FROM local_settings \
             WHERE setting_category = 'orders' AND setting_key = 'order_counter'",
            [],
            |row| {
                row.get::<_, String>(0)
                    .map(|v| v.parse::<i64>().unwrap_or(0))
            },
        )
        .unwrap_or(0);

    let next = current + 1;
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at) \
         VALUES ('orders', 'order_counter', ?1, datetime('now')) \
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET \
            setting_value = excluded.setting_value, updated_at = excluded.updated_at",
        params![next.to_string()],
    )?;

    Ok(format!("ORD-{}-{:05}", date_display, next))
}

/// Run all migrations on the given connection (test helper, not public API).
#[cfg(test)]
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("run_migrations should succeed in test");
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    /// Open an in-memory database and apply pragmas (mirrors open_and_configure).
    fn test_db() -> DbState {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )
        .expect("pragma setup");
        run_migrations_for_test(&conn);
        DbState {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        }
    }

    #[test]
    fn migrations_create_expected_tables() {
        let db = test_db();
        let conn = db.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap();
        let names: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        for expected in ["local_settings", "menu_cache", "pending_orders", "schema_version"] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
    }

    #[test]
    fn migrations_are_idempotent() {
        let db = test_db();
        let conn = db.conn.lock().unwrap();
        run_migrations(&conn).expect("second run is a no-op");
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn local_settings_roundtrip() {
        let db = test_db();
        assert_eq!(local_setting_get(&db, "sync", "cursor"), None);
        local_setting_set(&db, "sync", "cursor", "abc").unwrap();
        assert_eq!(
            local_setting_get(&db, "sync", "cursor").as_deref(),
            Some("abc")
        );
        local_setting_set(&db, "sync", "cursor", "def").unwrap();
        assert_eq!(
            local_setting_get(&db, "sync", "cursor").as_deref(),
            Some("def")
        );
    }

    #[test]
    fn order_numbers_are_sequential_and_persisted() {
        let db = test_db();
        let first = next_order_number(&db).unwrap();
        let second = next_order_number(&db).unwrap();
        assert!(first.starts_with("ORD-"));
        assert!(first.ends_with("-00001"));
        assert!(second.ends_with("-00002"));
        assert_eq!(
            local_setting_get(&db, "orders", "order_counter").as_deref(),
            Some("2")
        );
    }
}
