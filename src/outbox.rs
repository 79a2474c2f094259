//! Outbox of ledger changes waiting to be projected to the remote sheet.
//!
//! Rows are written in the same transaction as the ledger mutation they
//! describe, so the outbox never mentions a change that was rolled back.
//! Delivery, retries and ordering belong to whatever drains the outbox.

use rusqlite::{params, Connection};
use serde::Serialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::db::DbState;
use crate::error::Result;
use crate::keys::DayKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxOp {
    Upsert,
    Delete,
}

impl OutboxOp {
    fn as_str(self) -> &'static str {
        match self {
            OutboxOp::Upsert => "upsert",
            OutboxOp::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    pub id: i64,
    pub record_key: String,
    pub operation: String,
    pub payload: Value,
    pub idempotency_key: String,
    pub created_at: String,
}

pub(crate) fn enqueue(
    conn: &Connection,
    key: &DayKey,
    op: OutboxOp,
    payload: &Value,
) -> Result<()> {
    conn.execute(
        "INSERT INTO sync_outbox (record_key, operation, payload, idempotency_key, status)
         VALUES (?1, ?2, ?3, ?4, 'pending')",
        params![
            key.to_string(),
            op.as_str(),
            payload.to_string(),
            Uuid::new_v4().to_string()
        ],
    )?;
    Ok(())
}

/// Pending entries, oldest first.
pub fn list_pending(db: &DbState) -> Result<Vec<OutboxEntry>> {
    let conn = db.conn.lock()?;
    let mut stmt = conn.prepare(
        "SELECT id, record_key, operation, payload, idempotency_key, created_at
         FROM sync_outbox WHERE status = 'pending' ORDER BY id",
    )?;
    let rows = stmt.query_map([], |row| {
        let payload: String = row.get(3)?;
        Ok(OutboxEntry {
            id: row.get(0)?,
            record_key: row.get(1)?,
            operation: row.get(2)?,
            payload: serde_json::from_str(&payload).unwrap_or(Value::Null),
            idempotency_key: row.get(4)?,
            created_at: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Mark entries as delivered. Returns how many were pending.
pub fn mark_synced(db: &DbState, ids: &[i64]) -> Result<usize> {
    let conn = db.conn.lock()?;
    let mut updated = 0;
    for id in ids {
        updated += conn.execute(
            "UPDATE sync_outbox SET status = 'synced', synced_at = datetime('now')
             WHERE id = ?1 AND status = 'pending'",
            params![id],
        )?;
    }
    info!(requested = ids.len(), updated, "Outbox entries acknowledged");
    Ok(updated)
}

/// Delete delivered entries acknowledged more than `keep_days` days ago.
pub fn prune_synced(db: &DbState, keep_days: u32) -> Result<usize> {
    let conn = db.conn.lock()?;
    let removed = conn.execute(
        "DELETE FROM sync_outbox
         WHERE status = 'synced' AND synced_at < datetime('now', ?1)",
        params![format!("-{keep_days} days")],
    )?;
    if removed > 0 {
        info!(removed, keep_days, "Pruned delivered outbox entries");
    }
    Ok(removed)
}

pub fn pending_count(conn: &Connection) -> i64 {
    conn.query_row(
        "SELECT COUNT(*) FROM sync_outbox WHERE status = 'pending'",
        [],
        |row| row.get(0),
    )
    .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use serde_json::json;

    #[test]
    fn test_enqueue_list_and_ack() {
        let db = db::test_db();
        let key: DayKey = "2024-03-01#1".parse().unwrap();
        {
            let conn = db.conn.lock().unwrap();
            enqueue(&conn, &key, OutboxOp::Upsert, &json!({ "cierre": 10 })).unwrap();
            enqueue(&conn, &key, OutboxOp::Delete, &Value::Null).unwrap();
            assert_eq!(pending_count(&conn), 2);
        }

        let pending = list_pending(&db).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].operation, "upsert");
        assert_eq!(pending[0].payload["cierre"], 10);
        assert_eq!(pending[1].operation, "delete");
        assert_ne!(pending[0].idempotency_key, pending[1].idempotency_key);

        assert_eq!(mark_synced(&db, &[pending[0].id, 999]).unwrap(), 1);
        assert_eq!(mark_synced(&db, &[pending[0].id]).unwrap(), 0);
        let left = list_pending(&db).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].record_key, "2024-03-01#1");
    }

    #[test]
    fn test_prune_drops_only_old_delivered_entries() {
        let db = db::test_db();
        let key: DayKey = "2024-03-01#1".parse().unwrap();
        {
            let conn = db.conn.lock().unwrap();
            for _ in 0..3 {
                enqueue(&conn, &key, OutboxOp::Upsert, &Value::Null).unwrap();
            }
        }
        let ids: Vec<i64> = list_pending(&db).unwrap().iter().map(|e| e.id).collect();
        mark_synced(&db, &ids[..2]).unwrap();
        {
            let conn = db.conn.lock().unwrap();
            conn.execute(
                "UPDATE sync_outbox SET synced_at = datetime('now', '-40 days') WHERE id = ?1",
                params![ids[0]],
            )
            .unwrap();
        }

        assert_eq!(prune_synced(&db, 30).unwrap(), 1);
        assert_eq!(prune_synced(&db, 30).unwrap(), 0);
        let conn = db.conn.lock().unwrap();
        let total: i64 = conn
            .query_row("SELECT COUNT(*) FROM sync_outbox", [], |row| row.get(0))
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(pending_count(&conn), 1);
    }
}
