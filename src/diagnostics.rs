//! Diagnostics for Caja Diaria.
//!
//! Provides:
//! - **About info**: version, build timestamp, git SHA, platform
//! - **Health**: schema version, closings on file, outbox backlog, ledger
//!   consistency, database size
//! - **Log rotation helpers**: used by `lib.rs` to configure rolling log files.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tracing::warn;

use crate::db::{self, DbState};
use crate::error::Result;
use crate::ledger;
use crate::outbox;

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

/// Prefix of the daily log files (`caja.2025-01-01`).
pub const LOG_FILE_PREFIX: &str = "caja";

// ---------------------------------------------------------------------------
// About info
// ---------------------------------------------------------------------------

/// Returns version, build timestamp, git SHA, and platform info.
pub fn get_about_info() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "buildTimestamp": env!("BUILD_TIMESTAMP"),
        "gitSha": env!("BUILD_GIT_SHA"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "rustVersion": env!("CARGO_PKG_RUST_VERSION"),
    })
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

pub fn get_health(db: &DbState) -> Result<Value> {
    // The ledger calls below take the connection lock themselves, so the
    // direct queries run in their own scope first.
    let (schema_version, outbox_backlog, db_size) = {
        let conn = db.conn.lock()?;
        let db_size = fs::metadata(&db.db_path).map(|m| m.len()).unwrap_or(0);
        (
            db::schema_version(&conn),
            outbox::pending_count(&conn),
            db_size,
        )
    };

    let records = ledger::get_index(db)?.len();
    let consistency = ledger::check_consistency(db)?;

    Ok(json!({
        "schemaVersion": schema_version,
        "records": records,
        "outboxBacklog": outbox_backlog,
        "consistent": consistency.is_consistent(),
        "consistency": consistency,
        "dbSizeBytes": db_size,
    }))
}

// ---------------------------------------------------------------------------
// Log rotation
// ---------------------------------------------------------------------------

/// Log directory under the data directory.
pub fn get_log_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

/// Prune old log files, keeping only the most recent `MAX_LOG_FILES`.
pub fn prune_old_logs(log_dir: &Path) {
    if !log_dir.exists() {
        return;
    }

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    if let Ok(entries) = fs::read_dir(log_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let is_log = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&format!("{LOG_FILE_PREFIX}.")));
            if is_log {
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(std::time::UNIX_EPOCH);
                log_files.push((path, modified));
            }
        }
    }

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}
