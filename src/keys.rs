//! Ledger keys: one per closing.
//!
//! A key is the closing's calendar date plus an optional 1-based ordinal.
//! Records written before multi-closing support carry a bare date; every
//! newer closing is `YYYY-MM-DD#N`. The string form is what gets persisted
//! (`caja:<key>` and the `caja:index` array); in memory the key is a
//! composite so date comparisons never split strings.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CajaError;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DayKey {
    pub fecha: NaiveDate,
    pub ordinal: Option<u32>,
}

impl DayKey {
    pub fn new(fecha: NaiveDate, ordinal: u32) -> Self {
        Self {
            fecha,
            ordinal: Some(ordinal),
        }
    }

    /// A bare-date key as written by single-closing versions.
    pub fn legacy(fecha: NaiveDate) -> Self {
        Self {
            fecha,
            ordinal: None,
        }
    }

    pub fn same_day(&self, fecha: NaiveDate) -> bool {
        self.fecha == fecha
    }

    /// Storage key for the record, e.g. `caja:2024-01-01#2`.
    pub fn storage_key(&self) -> String {
        format!("caja:{self}")
    }
}

impl Ord for DayKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fecha
            .cmp(&other.fecha)
            .then_with(|| self.ordinal.cmp(&other.ordinal))
    }
}

impl PartialOrd for DayKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fecha.format(DATE_FORMAT))?;
        if let Some(n) = self.ordinal {
            write!(f, "#{n}")?;
        }
        Ok(())
    }
}

impl FromStr for DayKey {
    type Err = CajaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (date_part, ordinal_part) = match s.split_once('#') {
            Some((d, n)) => (d, Some(n)),
            None => (s, None),
        };
        let fecha = parse_date(date_part).map_err(|_| CajaError::InvalidKey(s.to_string()))?;
        let ordinal = match ordinal_part {
            None => None,
            Some(n) if !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) => {
                match n.parse::<u32>() {
                    Ok(n) if n >= 1 => Some(n),
                    _ => return Err(CajaError::InvalidKey(s.to_string())),
                }
            }
            Some(_) => return Err(CajaError::InvalidKey(s.to_string())),
        };
        Ok(Self { fecha, ordinal })
    }
}

impl Serialize for DayKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DayKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Parse an ISO calendar date (`YYYY-MM-DD`).
pub fn parse_date(s: &str) -> Result<NaiveDate, CajaError> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
        .map_err(|_| CajaError::InvalidDate(s.to_string()))
}
