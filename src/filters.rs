//! Date-range filters and the history listing.

use chrono::{Datelike, Days, Months, NaiveDate};
use serde::Serialize;

use crate::db::DbState;
use crate::error::{CajaError, Result};
use crate::keys::DayKey;
use crate::ledger;
use crate::models::DayRecord;
use crate::money::format_date;
use crate::totals::{record_totals, Totals};

/// Inclusive range of calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub desde: NaiveDate,
    pub hasta: NaiveDate,
}

impl DateRange {
    pub fn new(desde: NaiveDate, hasta: NaiveDate) -> Result<Self> {
        if desde > hasta {
            return Err(CajaError::Validation(
                "La fecha de inicio no puede ser posterior a la fecha de fin".into(),
            ));
        }
        Ok(Self { desde, hasta })
    }

    pub fn single(day: NaiveDate) -> Self {
        Self {
            desde: day,
            hasta: day,
        }
    }

    /// Monday to Sunday of the week containing `today`.
    pub fn this_week(today: NaiveDate) -> Self {
        let monday = today - Days::new(u64::from(today.weekday().num_days_from_monday()));
        Self {
            desde: monday,
            hasta: monday + Days::new(6),
        }
    }

    /// First to last day of the month containing `today`.
    pub fn this_month(today: NaiveDate) -> Self {
        let first = today.with_day(1).unwrap_or(today);
        let last = first
            .checked_add_months(Months::new(1))
            .and_then(|next| next.pred_opt())
            .unwrap_or(today);
        Self {
            desde: first,
            hasta: last,
        }
    }

    pub fn contains(&self, fecha: NaiveDate) -> bool {
        self.desde <= fecha && fecha <= self.hasta
    }
}

/// Keys whose date falls inside `range`, in index order.
pub fn filter_keys(index: &[DayKey], range: &DateRange) -> Vec<DayKey> {
    index
        .iter()
        .filter(|k| range.contains(k.fecha))
        .copied()
        .collect()
}

/// Newest date first; within a date the latest closing first.
pub fn history_order(keys: &mut [DayKey]) {
    keys.sort_by(|a, b| b.cmp(a));
}

/// `d/m/yyyy`, plus `(Turno N)` for numbered closings.
pub fn key_label(key: &DayKey) -> String {
    let day = format_date(&key.fecha.to_string());
    match key.ordinal {
        Some(n) => format!("{day} (Turno {n})"),
        None => day,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRow {
    pub key: DayKey,
    pub label: String,
    pub record: DayRecord,
    pub totals: Totals,
}

/// Stored closings in history order, optionally limited to a range.
pub fn history(db: &DbState, range: Option<&DateRange>) -> Result<Vec<HistoryRow>> {
    let index = ledger::get_index(db)?;
    let mut keys = match range {
        Some(range) => filter_keys(&index, range),
        None => index,
    };
    history_order(&mut keys);

    Ok(ledger::load_records(db, &keys)?
        .into_iter()
        .map(|(key, record)| HistoryRow {
            label: key_label(&key),
            totals: record_totals(&record),
            key,
            record,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use crate::keys::parse_date;

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn k(s: &str) -> DayKey {
        s.parse().unwrap()
    }

    #[test]
    fn test_range_rejects_inverted_bounds() {
        assert!(DateRange::new(d("2025-01-02"), d("2025-01-01")).is_err());
        assert!(DateRange::new(d("2025-01-01"), d("2025-01-01")).is_ok());
    }

    #[test]
    fn test_week_runs_monday_to_sunday() {
        // 2025-08-10 is a Sunday.
        let w = DateRange::this_week(d("2025-08-10"));
        assert_eq!(w.desde, d("2025-08-04"));
        assert_eq!(w.hasta, d("2025-08-10"));

        let w = DateRange::this_week(d("2025-08-04"));
        assert_eq!(w.desde, d("2025-08-04"));
        assert_eq!(w.hasta, d("2025-08-10"));
    }

    #[test]
    fn test_month_bounds() {
        let m = DateRange::this_month(d("2024-02-15"));
        assert_eq!(m.desde, d("2024-02-01"));
        assert_eq!(m.hasta, d("2024-02-29"));

        let m = DateRange::this_month(d("2025-12-31"));
        assert_eq!(m.desde, d("2025-12-01"));
        assert_eq!(m.hasta, d("2025-12-31"));
    }

    #[test]
    fn test_filter_is_inclusive() {
        let index = vec![
            k("2025-01-01#1"),
            k("2025-01-02"),
            k("2025-01-02#2"),
            k("2025-01-03#1"),
        ];
        let range = DateRange::new(d("2025-01-02"), d("2025-01-03")).unwrap();
        assert_eq!(
            filter_keys(&index, &range),
            vec![k("2025-01-02"), k("2025-01-02#2"), k("2025-01-03#1")]
        );
    }

    #[test]
    fn test_history_order_and_labels() {
        let mut keys = vec![k("2025-01-01#1"), k("2025-01-02#2"), k("2025-01-02#10"), k("2025-01-01")];
        history_order(&mut keys);
        assert_eq!(
            keys,
            vec![k("2025-01-02#10"), k("2025-01-02#2"), k("2025-01-01#1"), k("2025-01-01")]
        );
        assert_eq!(key_label(&k("2025-08-01#2")), "1/8/2025 (Turno 2)");
        assert_eq!(key_label(&k("2025-08-01")), "1/8/2025");
    }

    #[test]
    fn test_history_from_store() {
        let db = test_db();
        let rec = |cierre: f64| DayRecord {
            sucursal: "Parets del Vallès".into(),
            apertura: 100.0,
            cierre,
            ..Default::default()
        };
        ledger::save_record(&db, d("2025-03-01"), &rec(100.0), None).unwrap();
        ledger::save_record(&db, d("2025-03-02"), &rec(90.0), None).unwrap();
        ledger::save_record(&db, d("2025-03-02"), &rec(100.0), None).unwrap();

        let rows = history(&db, None).unwrap();
        let labels: Vec<&str> = rows.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["2/3/2025 (Turno 2)", "2/3/2025 (Turno 1)", "1/3/2025 (Turno 1)"]);
        assert_eq!(rows[1].totals.diff, 10.0);

        let only_first = history(&db, Some(&DateRange::single(d("2025-03-01")))).unwrap();
        assert_eq!(only_first.len(), 1);
        assert!(only_first[0].totals.is_balanced());
    }
}
