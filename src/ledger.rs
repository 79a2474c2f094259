//! Ledger store: closings keyed by date and ordinal.
//!
//! Layout inside `kv_store`:
//! - `caja:index` holds a JSON array with every live key, sorted.
//! - `caja:<key>` holds one [`DayRecord`] as JSON.
//!
//! The index is the source of truth for existence. Every mutation rewrites
//! the record row and the index row inside one `BEGIN IMMEDIATE` transaction
//! taken while holding the connection mutex, so two saves for the same date
//! (even from two processes sharing the file) can never be handed the same
//! ordinal and the two tiers never diverge.

use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::db::{self, DbState};
use crate::error::{CajaError, Result};
use crate::keys::DayKey;
use crate::models::DayRecord;
use crate::outbox::{self, OutboxOp};

pub const INDEX_KEY: &str = "caja:index";
pub const DRAFT_KEY: &str = "caja:draft";
const RECORD_PREFIX: &str = "caja:";

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// All live keys, ascending by date then ordinal.
pub fn get_index(db: &DbState) -> Result<Vec<DayKey>> {
    let conn = db.conn.lock()?;
    read_index(&conn)
}

/// The record stored under `key`, or `None` when there is none.
///
/// A record whose key is missing from the index is treated as absent (and
/// logged): existence is decided by the index alone. A record that no longer
/// parses is also reported as absent.
pub fn load_record(db: &DbState, key: &DayKey) -> Result<Option<DayRecord>> {
    let conn = db.conn.lock()?;
    let index = read_index(&conn)?;
    let raw = db::kv_get(&conn, &key.storage_key())?;
    if !index.contains(key) {
        if raw.is_some() {
            warn!(key = %key, "Record present but not indexed, ignoring it");
        }
        return Ok(None);
    }
    match raw {
        Some(raw) => Ok(parse_record(key, &raw)),
        None => {
            warn!(key = %key, "Indexed key has no stored record");
            Ok(None)
        }
    }
}

/// Load several records in one lock. Keys that are not indexed or have no
/// record are skipped.
pub fn load_records(db: &DbState, keys: &[DayKey]) -> Result<Vec<(DayKey, DayRecord)>> {
    let conn = db.conn.lock()?;
    let index = read_index(&conn)?;
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        if !index.contains(key) {
            debug!(key = %key, "Skipping key missing from the index");
            continue;
        }
        if let Some(raw) = db::kv_get(&conn, &key.storage_key())? {
            if let Some(record) = parse_record(key, &raw) {
                out.push((*key, record));
            }
        }
    }
    Ok(out)
}

fn parse_record(key: &DayKey, raw: &str) -> Option<DayRecord> {
    match serde_json::from_str(raw) {
        Ok(record) => Some(record),
        Err(e) => {
            error!(key = %key, error = %e, "Stored record is not valid JSON");
            None
        }
    }
}

fn read_index(conn: &Connection) -> Result<Vec<DayKey>> {
    let Some(raw) = db::kv_get(conn, INDEX_KEY)? else {
        return Ok(Vec::new());
    };
    let entries: Vec<String> = serde_json::from_str(&raw)?;
    let mut keys: Vec<DayKey> = entries
        .iter()
        .filter_map(|entry| match entry.parse() {
            Ok(key) => Some(key),
            Err(_) => {
                warn!(entry = %entry, "Skipping malformed index entry");
                None
            }
        })
        .collect();
    keys.sort();
    keys.dedup();
    Ok(keys)
}

fn write_index(conn: &Connection, keys: &[DayKey]) -> Result<()> {
    let mut sorted = keys.to_vec();
    sorted.sort();
    sorted.dedup();
    let entries: Vec<String> = sorted.iter().map(ToString::to_string).collect();
    db::kv_set(conn, INDEX_KEY, &serde_json::to_string(&entries)?)
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

/// Run `f` inside `BEGIN IMMEDIATE ... COMMIT`, rolling back on error.
fn write_txn<T>(conn: &Connection, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
    conn.execute_batch("BEGIN IMMEDIATE")?;
    match f(conn) {
        Ok(value) => {
            conn.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

/// Insert or update a closing and return the key it lives under.
///
/// - `existing` on the same date: overwritten in place, same key.
/// - `existing` on another date (the date was edited): the old closing is
///   removed and a new key is allocated for `fecha`.
/// - no `existing`: a fresh ordinal is allocated for `fecha`.
pub fn save_record(
    db: &DbState,
    fecha: NaiveDate,
    record: &DayRecord,
    existing: Option<&DayKey>,
) -> Result<DayKey> {
    let conn = db.conn.lock()?;
    let payload = serde_json::to_value(record)?;

    let key = write_txn(&conn, |conn| {
        let mut index = read_index(conn)?;

        if let Some(existing) = existing {
            if existing.same_day(fecha) {
                db::kv_set(conn, &existing.storage_key(), &payload.to_string())?;
                if !index.contains(existing) {
                    warn!(key = %existing, "Updating a key that was not indexed, re-indexing it");
                    index.push(*existing);
                    write_index(conn, &index)?;
                }
                outbox::enqueue(conn, existing, OutboxOp::Upsert, &payload)?;
                return Ok(*existing);
            }

            debug!(old = %existing, fecha = %fecha, "Closing moved to another date");
            remove_in_txn(conn, &mut index, existing)?;
        }

        let key = next_key(&index, fecha)?;
        db::kv_set(conn, &key.storage_key(), &payload.to_string())?;
        index.push(key);
        write_index(conn, &index)?;
        outbox::enqueue(conn, &key, OutboxOp::Upsert, &payload)?;
        Ok(key)
    })?;

    info!(key = %key, sucursal = %record.sucursal, "Closing saved");
    Ok(key)
}

/// Remove a closing and its index entry. Unknown keys are a no-op.
pub fn delete_record(db: &DbState, key: &DayKey) -> Result<()> {
    let conn = db.conn.lock()?;
    let removed = write_txn(&conn, |conn| {
        let mut index = read_index(conn)?;
        remove_in_txn(conn, &mut index, key)
    })?;
    if removed {
        info!(key = %key, "Closing deleted");
    } else {
        debug!(key = %key, "Delete of unknown key ignored");
    }
    Ok(())
}

fn remove_in_txn(conn: &Connection, index: &mut Vec<DayKey>, key: &DayKey) -> Result<bool> {
    let had_record = db::kv_remove(conn, &key.storage_key())?;
    let before = index.len();
    index.retain(|k| k != key);
    let was_indexed = index.len() != before;
    if was_indexed {
        write_index(conn, index)?;
    }
    if had_record || was_indexed {
        outbox::enqueue(conn, key, OutboxOp::Delete, &Value::Null)?;
    }
    Ok(had_record || was_indexed)
}

/// Next free key for `fecha`: one past the number of closings already on
/// that date, bumped past the highest ordinal in use so a gap left by a
/// deleted closing is never reused for a still-live key.
fn next_key(index: &[DayKey], fecha: NaiveDate) -> Result<DayKey> {
    let same_day: Vec<&DayKey> = index.iter().filter(|k| k.same_day(fecha)).collect();
    let highest = same_day.iter().filter_map(|k| k.ordinal).max().unwrap_or(0);
    let ordinal = u32::try_from(same_day.len())
        .ok()
        .and_then(|count| count.checked_add(1))
        .zip(highest.checked_add(1))
        .map(|(by_count, by_highest)| by_count.max(by_highest))
        .ok_or_else(|| {
            CajaError::Validation(format!("No quedan turnos libres para {fecha}"))
        })?;
    Ok(DayKey::new(fecha, ordinal))
}

// ---------------------------------------------------------------------------
// Consistency
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyReport {
    /// Stored records whose key is not in the index.
    pub orphan_records: Vec<DayKey>,
    /// Index entries without a stored record.
    pub dangling_keys: Vec<DayKey>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.orphan_records.is_empty() && self.dangling_keys.is_empty()
    }
}

fn scan(conn: &Connection) -> Result<(Vec<DayKey>, ConsistencyReport)> {
    let index = read_index(conn)?;
    let stored: Vec<DayKey> = db::kv_keys_with_prefix(conn, RECORD_PREFIX)?
        .iter()
        .filter(|k| k.as_str() != INDEX_KEY && k.as_str() != DRAFT_KEY)
        .filter_map(|k| k[RECORD_PREFIX.len()..].parse().ok())
        .collect();

    let report = ConsistencyReport {
        orphan_records: stored.iter().filter(|k| !index.contains(k)).copied().collect(),
        dangling_keys: index.iter().filter(|k| !stored.contains(k)).copied().collect(),
    };
    Ok((index, report))
}

/// Compare the index with the stored records.
pub fn check_consistency(db: &DbState) -> Result<ConsistencyReport> {
    let conn = db.conn.lock()?;
    let (_, report) = scan(&conn)?;
    if !report.is_consistent() {
        warn!(
            orphans = report.orphan_records.len(),
            dangling = report.dangling_keys.len(),
            "Ledger index and records diverged"
        );
    }
    Ok(report)
}

/// Re-index orphan records and drop dangling index entries. Returns what was
/// fixed.
pub fn repair(db: &DbState) -> Result<ConsistencyReport> {
    let conn = db.conn.lock()?;
    let report = write_txn(&conn, |conn| {
        let (mut index, report) = scan(conn)?;
        if report.is_consistent() {
            return Ok(report);
        }
        index.retain(|k| !report.dangling_keys.contains(k));
        index.extend(report.orphan_records.iter().copied());
        write_index(conn, &index)?;
        Ok(report)
    })?;
    if !report.is_consistent() {
        info!(
            reindexed = report.orphan_records.len(),
            dropped = report.dangling_keys.len(),
            "Ledger index repaired"
        );
    }
    Ok(report)
}

/// Fail with [`CajaError::Consistency`] unless index and records agree.
pub fn ensure_consistent(db: &DbState) -> Result<()> {
    let report = check_consistency(db)?;
    if report.is_consistent() {
        Ok(())
    } else {
        Err(CajaError::Consistency(format!(
            "{} orphan record(s), {} dangling key(s)",
            report.orphan_records.len(),
            report.dangling_keys.len()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use crate::keys::parse_date;
    use proptest::prelude::*;

    fn date(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn rec(cierre: f64) -> DayRecord {
        DayRecord {
            fecha: "2024-01-01".into(),
            sucursal: "Lliçà d'Amunt".into(),
            cierre,
            ..Default::default()
        }
    }

    fn key(s: &str) -> DayKey {
        s.parse().unwrap()
    }

    #[test]
    fn test_two_saves_same_date_get_distinct_keys() {
        let db = test_db();
        let k1 = save_record(&db, date("2024-01-01"), &rec(100.0), None).unwrap();
        let k2 = save_record(&db, date("2024-01-01"), &rec(200.0), None).unwrap();
        assert_ne!(k1, k2);
        assert_eq!(k1.to_string(), "2024-01-01#1");
        assert_eq!(k2.to_string(), "2024-01-01#2");
        assert_eq!(get_index(&db).unwrap().len(), 2);
        assert_eq!(load_record(&db, &k1).unwrap().unwrap().cierre, 100.0);
        assert_eq!(load_record(&db, &k2).unwrap().unwrap().cierre, 200.0);
    }

    #[test]
    fn test_save_with_known_key_updates_in_place() {
        let db = test_db();
        let k1 = save_record(&db, date("2024-01-01"), &rec(100.0), None).unwrap();
        let k = save_record(&db, date("2024-01-01"), &rec(150.0), Some(&k1)).unwrap();
        assert_eq!(k, k1);
        assert_eq!(get_index(&db).unwrap(), vec![k1]);
        assert_eq!(load_record(&db, &k1).unwrap().unwrap().cierre, 150.0);
    }

    #[test]
    fn test_update_is_idempotent() {
        let db = test_db();
        let k1 = save_record(&db, date("2024-01-01"), &rec(100.0), None).unwrap();
        for _ in 0..3 {
            save_record(&db, date("2024-01-01"), &rec(100.0), Some(&k1)).unwrap();
        }
        assert_eq!(get_index(&db).unwrap(), vec![k1]);
    }

    #[test]
    fn test_date_change_moves_the_closing() {
        let db = test_db();
        let old = save_record(&db, date("2024-01-01"), &rec(100.0), None).unwrap();
        let other = save_record(&db, date("2024-01-02"), &rec(5.0), None).unwrap();
        let moved = save_record(&db, date("2024-01-02"), &rec(100.0), Some(&old)).unwrap();
        assert_eq!(moved.to_string(), "2024-01-02#2");
        assert!(load_record(&db, &old).unwrap().is_none());
        assert_eq!(get_index(&db).unwrap(), vec![other, moved]);
    }

    #[test]
    fn test_delete_removes_record_and_index_entry_only() {
        let db = test_db();
        let k1 = save_record(&db, date("2024-01-01"), &rec(100.0), None).unwrap();
        let k2 = save_record(&db, date("2024-01-01"), &rec(200.0), None).unwrap();
        delete_record(&db, &k1).unwrap();
        assert!(load_record(&db, &k1).unwrap().is_none());
        assert_eq!(get_index(&db).unwrap(), vec![k2]);
        assert_eq!(load_record(&db, &k2).unwrap().unwrap().cierre, 200.0);

        // Deleting again is harmless.
        delete_record(&db, &k1).unwrap();
        assert_eq!(get_index(&db).unwrap(), vec![k2]);
    }

    #[test]
    fn test_ordinal_never_reuses_a_live_key_after_a_gap() {
        let db = test_db();
        let k1 = save_record(&db, date("2024-01-01"), &rec(1.0), None).unwrap();
        let k2 = save_record(&db, date("2024-01-01"), &rec(2.0), None).unwrap();
        delete_record(&db, &k1).unwrap();
        let k3 = save_record(&db, date("2024-01-01"), &rec(3.0), None).unwrap();
        assert_ne!(k3, k2);
        assert_eq!(k3.to_string(), "2024-01-01#3");
        assert_eq!(load_record(&db, &k2).unwrap().unwrap().cierre, 2.0);
        assert_eq!(get_index(&db).unwrap(), vec![k2, k3]);
    }

    #[test]
    fn test_legacy_bare_date_keys() {
        let db = test_db();
        {
            let conn = db.conn.lock().unwrap();
            db::kv_set(&conn, "caja:2023-12-31", &serde_json::to_string(&rec(50.0)).unwrap())
                .unwrap();
            db::kv_set(&conn, INDEX_KEY, "[\"2023-12-31\"]").unwrap();
        }
        let legacy = key("2023-12-31");
        assert_eq!(load_record(&db, &legacy).unwrap().unwrap().cierre, 50.0);

        let same = save_record(&db, date("2023-12-31"), &rec(60.0), Some(&legacy)).unwrap();
        assert_eq!(same, legacy);

        let next = save_record(&db, date("2023-12-31"), &rec(70.0), None).unwrap();
        assert_eq!(next.to_string(), "2023-12-31#2");
        assert_eq!(get_index(&db).unwrap(), vec![legacy, next]);
    }

    #[test]
    fn test_persisted_layout_is_byte_compatible() {
        let db = test_db();
        save_record(&db, date("2024-01-01"), &rec(1.0), None).unwrap();
        save_record(&db, date("2023-05-05"), &rec(1.0), None).unwrap();
        let conn = db.conn.lock().unwrap();
        assert_eq!(
            db::kv_get(&conn, INDEX_KEY).unwrap().as_deref(),
            Some("[\"2023-05-05#1\",\"2024-01-01#1\"]")
        );
        let raw = db::kv_get(&conn, "caja:2024-01-01#1").unwrap().unwrap();
        let v: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["sucursal"], "Lliçà d'Amunt");
    }

    #[test]
    fn test_unindexed_record_is_invisible_and_repairable() {
        let db = test_db();
        let kept = save_record(&db, date("2024-01-01"), &rec(1.0), None).unwrap();
        {
            let conn = db.conn.lock().unwrap();
            db::kv_set(&conn, "caja:2024-02-02#1", &serde_json::to_string(&rec(9.0)).unwrap())
                .unwrap();
            db::kv_set(&conn, INDEX_KEY, "[\"2024-01-01#1\",\"2024-03-03#1\"]").unwrap();
        }
        let orphan = key("2024-02-02#1");
        assert!(load_record(&db, &orphan).unwrap().is_none());

        let report = check_consistency(&db).unwrap();
        assert_eq!(report.orphan_records, vec![orphan]);
        assert_eq!(report.dangling_keys, vec![key("2024-03-03#1")]);
        assert!(ensure_consistent(&db).is_err());

        repair(&db).unwrap();
        assert!(check_consistency(&db).unwrap().is_consistent());
        assert_eq!(get_index(&db).unwrap(), vec![kept, orphan]);
        assert_eq!(load_record(&db, &orphan).unwrap().unwrap().cierre, 9.0);
    }

    #[test]
    fn test_load_records_skips_unindexed_keys() {
        let db = test_db();
        let kept = save_record(&db, date("2024-01-01"), &rec(1.0), None).unwrap();
        {
            let conn = db.conn.lock().unwrap();
            db::kv_set(&conn, "caja:2024-02-02#1", &serde_json::to_string(&rec(9.0)).unwrap())
                .unwrap();
        }
        let orphan = key("2024-02-02#1");
        let loaded = load_records(&db, &[kept, orphan]).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].0, kept);
        assert!(load_records(&db, &[orphan]).unwrap().is_empty());
    }

    #[test]
    fn test_exhausted_ordinal_is_rejected_without_poisoning_the_store() {
        let db = test_db();
        let last = key("2024-02-02#4294967295");
        {
            let conn = db.conn.lock().unwrap();
            db::kv_set(&conn, &last.storage_key(), &serde_json::to_string(&rec(1.0)).unwrap())
                .unwrap();
            db::kv_set(&conn, INDEX_KEY, "[\"2024-02-02#4294967295\"]").unwrap();
        }
        let err = save_record(&db, date("2024-02-02"), &rec(2.0), None).unwrap_err();
        assert!(matches!(err, CajaError::Validation(_)));

        // The failed save rolled back and left the store usable.
        assert_eq!(get_index(&db).unwrap(), vec![last]);
        let other = save_record(&db, date("2024-02-03"), &rec(3.0), None).unwrap();
        assert_eq!(other.to_string(), "2024-02-03#1");
        assert!(check_consistency(&db).unwrap().is_consistent());
    }

    #[test]
    fn test_mutations_feed_the_outbox() {
        let db = test_db();
        let k = save_record(&db, date("2024-01-01"), &rec(1.0), None).unwrap();
        save_record(&db, date("2024-01-01"), &rec(2.0), Some(&k)).unwrap();
        delete_record(&db, &k).unwrap();
        delete_record(&db, &k).unwrap();
        let ops: Vec<String> = outbox::list_pending(&db)
            .unwrap()
            .into_iter()
            .map(|e| e.operation)
            .collect();
        assert_eq!(ops, vec!["upsert", "upsert", "delete"]);
    }

    #[test]
    fn test_concurrent_saves_on_one_file_get_unique_keys() {
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let first = Arc::new(db::init(dir.path()).unwrap());
        let second = Arc::new(db::init(dir.path()).unwrap());

        let handles: Vec<_> = [first.clone(), second.clone()]
            .into_iter()
            .map(|db| {
                std::thread::spawn(move || {
                    (0..10)
                        .map(|i| save_record(&db, date("2024-06-01"), &rec(i as f64), None).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut keys: Vec<DayKey> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 20);
        assert_eq!(get_index(&first).unwrap(), keys);
        assert!(check_consistency(&first).unwrap().is_consistent());
    }

    #[derive(Debug, Clone)]
    enum Step {
        Save { day: u32 },
        Update { pick: usize, day: u32 },
        Delete { pick: usize },
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (0u32..3).prop_map(|day| Step::Save { day }),
            (any::<usize>(), 0u32..3).prop_map(|(pick, day)| Step::Update { pick, day }),
            any::<usize>().prop_map(|pick| Step::Delete { pick }),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_keys_stay_unique_and_indexed(steps in proptest::collection::vec(step(), 1..25)) {
            let db = test_db();
            let base = date("2024-01-01");
            let mut live: Vec<DayKey> = Vec::new();

            for step in steps {
                match step {
                    Step::Save { day } => {
                        let fecha = base + chrono::Days::new(day as u64);
                        let k = save_record(&db, fecha, &rec(1.0), None).unwrap();
                        prop_assert!(!live.contains(&k));
                        live.push(k);
                    }
                    Step::Update { pick, day } => {
                        if live.is_empty() {
                            continue;
                        }
                        let old = live[pick % live.len()];
                        let fecha = base + chrono::Days::new(day as u64);
                        let before = get_index(&db).unwrap().len();
                        let k = save_record(&db, fecha, &rec(2.0), Some(&old)).unwrap();
                        prop_assert_eq!(get_index(&db).unwrap().len(), before);
                        live.retain(|l| *l != old);
                        if old.same_day(fecha) {
                            prop_assert_eq!(k, old);
                        }
                        prop_assert!(!live.contains(&k));
                        live.push(k);
                    }
                    Step::Delete { pick } => {
                        if live.is_empty() {
                            continue;
                        }
                        let old = live.remove(pick % live.len());
                        delete_record(&db, &old).unwrap();
                    }
                }

                let mut expected = live.clone();
                expected.sort();
                prop_assert_eq!(get_index(&db).unwrap(), expected);
                prop_assert!(check_consistency(&db).unwrap().is_consistent());
            }
        }
    }
}
