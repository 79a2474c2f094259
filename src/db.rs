//! Local SQLite database layer for Caja Diaria.
//!
//! Uses rusqlite with WAL mode. Holds the key-value table that carries the
//! ledger's two-tier layout (`caja:index` + `caja:<key>`), the settings table
//! and the sync outbox, plus schema migrations and small helpers shared by
//! the ledger, session and settings modules.

use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::Result;

/// Process-wide database handle.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Current schema version. Bump when adding new migrations.
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

const DB_FILE_NAME: &str = "caja.db";

/// Initialize the database at `{data_dir}/caja.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(data_dir: &Path) -> Result<DbState> {
    fs::create_dir_all(data_dir)?;

    let db_path = data_dir.join(DB_FILE_NAME);
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
                let _ = fs::remove_file(db_path.with_extension("db-wal"));
                let _ = fs::remove_file(db_path.with_extension("db-shm"));
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
fn open_and_configure(path: &Path) -> Result<Connection> {
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
fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current = schema_version(conn);

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

pub fn schema_version(conn: &Connection) -> i32 {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .unwrap_or(0)
}

/// Migration v1: key-value ledger storage and local settings.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- kv_store (mirrors the browser storage layout: caja:index, caja:<key>, caja:draft)
        CREATE TABLE IF NOT EXISTS kv_store (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT DEFAULT (datetime('now'))
        );

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

        CREATE INDEX IF NOT EXISTS idx_local_settings_cat_key ON local_settings(setting_category, setting_key);

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        e
    })?;

    info!("Applied migration v1 (kv_store, local_settings)");
    Ok(())
}

/// Migration v2: outbox of record projections for the remote sync layer.
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sync_outbox (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            record_key TEXT NOT NULL,
            operation TEXT NOT NULL CHECK (operation IN ('upsert', 'delete')),
            payload TEXT NOT NULL,
            idempotency_key TEXT UNIQUE NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT DEFAULT (datetime('now')),
            synced_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_sync_outbox_status ON sync_outbox(status);

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        e
    })?;

    info!("Applied migration v2 (sync_outbox)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Key-value helpers
// ---------------------------------------------------------------------------

pub fn kv_get(conn: &Connection, key: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT value FROM kv_store WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn kv_set(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO kv_store (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at",
        params![key, value],
    )?;
    Ok(())
}

/// Remove a key. Returns whether a row was deleted.
pub fn kv_remove(conn: &Connection, key: &str) -> Result<bool> {
    let n = conn.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
    Ok(n > 0)
}

/// All keys starting with `prefix`, in byte order.
pub fn kv_keys_with_prefix(conn: &Connection, prefix: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT key FROM kv_store WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
    )?;
    let rows = stmt.query_map(params![prefix], |row| row.get::<_, String>(0))?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Get a single setting value.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(conn: &Connection, category: &str, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )?;
    Ok(())
}

/// Delete one setting. Missing settings are ignored.
pub fn delete_setting(conn: &Connection, category: &str, key: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
    )?;
    Ok(())
}

/// All settings of a category as `(key, value)` pairs sorted by key.
pub fn get_category_settings(conn: &Connection, category: &str) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(
        "SELECT setting_key, setting_value FROM local_settings
         WHERE setting_category = ?1 ORDER BY setting_key",
    )?;
    let rows = stmt.query_map(params![category], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// In-memory database with migrations applied (test helper).
#[cfg(test)]
pub fn test_db() -> DbState {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .expect("pragma setup");
    run_migrations(&conn).expect("migrations");
    DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .expect("prepare table list");
        stmt.query_map([], |row| row.get(0))
            .expect("query tables")
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn test_migrations_create_tables() {
        let db = test_db();
        let conn = db.conn.lock().unwrap();
        let tables = table_names(&conn);
        for expected in ["kv_store", "local_settings", "schema_version", "sync_outbox"] {
            assert!(tables.contains(&expected.to_string()), "missing {expected}");
        }
        assert_eq!(schema_version(&conn), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let db = test_db();
        let conn = db.conn.lock().unwrap();
        run_migrations(&conn).expect("second run");
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, CURRENT_SCHEMA_VERSION as i64);
    }

    #[test]
    fn test_wal_mode_on_file_db() {
        let dir = tempfile::tempdir().unwrap();
        let db = init(dir.path()).expect("init file db");
        {
            let conn = db.conn.lock().unwrap();
            let mode: String = conn
                .query_row("PRAGMA journal_mode", [], |row| row.get(0))
                .unwrap();
            assert_eq!(mode.to_lowercase(), "wal");
        }
    }

    #[test]
    fn test_kv_crud() {
        let db = test_db();
        let conn = db.conn.lock().unwrap();
        assert_eq!(kv_get(&conn, "caja:index").unwrap(), None);
        kv_set(&conn, "caja:index", "[]").unwrap();
        kv_set(&conn, "caja:index", "[\"2024-01-01#1\"]").unwrap();
        assert_eq!(
            kv_get(&conn, "caja:index").unwrap().as_deref(),
            Some("[\"2024-01-01#1\"]")
        );
        kv_set(&conn, "caja:2024-01-01#1", "{}").unwrap();
        kv_set(&conn, "otra:cosa", "{}").unwrap();
        assert_eq!(
            kv_keys_with_prefix(&conn, "caja:").unwrap(),
            vec!["caja:2024-01-01#1", "caja:index"]
        );
        assert!(kv_remove(&conn, "caja:index").unwrap());
        assert!(!kv_remove(&conn, "caja:index").unwrap());
    }

    #[test]
    fn test_settings_crud() {
        let db = test_db();
        let conn = db.conn.lock().unwrap();

        set_setting(&conn, "general", "sucursal", "Lliçà d'Amunt").expect("set");
        assert_eq!(
            get_setting(&conn, "general", "sucursal").as_deref(),
            Some("Lliçà d'Amunt")
        );

        set_setting(&conn, "general", "sucursal", "Parets del Vallès").expect("update");
        assert_eq!(
            get_setting(&conn, "general", "sucursal").as_deref(),
            Some("Parets del Vallès")
        );

        set_setting(&conn, "general", "email_to", "a@b.c").unwrap();
        let all = get_category_settings(&conn, "general").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].0, "email_to");

        delete_setting(&conn, "general", "sucursal").expect("delete");
        assert!(get_setting(&conn, "general", "sucursal").is_none());
    }
}
