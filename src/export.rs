//! Spreadsheet export of the stored closings.
//!
//! One semicolon-separated file with two sections (closings, then treasury
//! movements), UTF-8 with a BOM so spreadsheet tools pick the right encoding,
//! amounts rendered the es-ES way.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::info;

use crate::db::DbState;
use crate::error::{CajaError, Result};
use crate::filters::{self, DateRange};
use crate::keys::{DayKey, DATE_FORMAT};
use crate::ledger;
use crate::models::DayRecord;
use crate::money::{format_currency, format_date};
use crate::totals::record_totals;

const BOM: &str = "\u{FEFF}";
const CAJA_SECTION: &str = "=== DATOS DE CAJA ===";
const MOVIMIENTOS_SECTION: &str = "=== MOVIMIENTOS DE TESORERÍA ===";
const NO_MOVEMENTS: &str = "No hay movimientos registrados";

const CAJA_HEADER: [&str; 11] = [
    "Fecha",
    "Sucursal",
    "Apertura de caja (€)",
    "Responsable apertura de caja",
    "Ingresos en efectivo (€)",
    "Gestión de tesorería (salidas)",
    "Gestión de tesorería (entradas)",
    "Total en caja",
    "Cierre de caja",
    "Diferencia",
    "Responsable de cierre de caja",
];

const MOVIMIENTOS_HEADER: [&str; 4] = ["Fecha", "Tipo", "Quién", "Importe (€)"];

pub fn default_file_name(today: NaiveDate) -> String {
    format!("datos_caja_{}.csv", today.format(DATE_FORMAT))
}

/// Render closings (already in the order they should appear) as the
/// combined CSV document.
pub fn combined_csv(records: &[(DayKey, DayRecord)]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    writeln!(out, "{BOM}{CAJA_SECTION}")?;

    let caja_rows: Vec<Vec<String>> = records
        .iter()
        .map(|(key, rec)| {
            let totals = record_totals(rec);
            vec![
                format_date(&key.to_string()),
                rec.sucursal.clone(),
                format_currency(rec.apertura),
                rec.responsable_apertura.clone(),
                format_currency(rec.ingresos),
                format_currency(totals.salidas),
                format_currency(totals.entradas),
                format_currency(totals.total),
                format_currency(rec.cierre),
                format_currency(totals.diff),
                rec.responsable_cierre.clone(),
            ]
        })
        .collect();
    write_table(&mut out, &CAJA_HEADER, &caja_rows)?;

    writeln!(out)?;
    writeln!(out, "{MOVIMIENTOS_SECTION}")?;

    let mov_rows: Vec<Vec<String>> = records
        .iter()
        .flat_map(|(key, rec)| {
            let fecha = format_date(&key.to_string());
            rec.movimientos.iter().filter_map(move |mov| {
                let tipo = mov.tipo?;
                Some(vec![
                    fecha.clone(),
                    tipo.label().to_string(),
                    mov.quien_or_default().to_string(),
                    format_currency(mov.importe),
                ])
            })
        })
        .collect();
    write_table(&mut out, &MOVIMIENTOS_HEADER, &mov_rows)?;
    if mov_rows.is_empty() {
        writeln!(out, "{NO_MOVEMENTS}")?;
    }

    Ok(out)
}

fn write_table(out: &mut Vec<u8>, header: &[&str], rows: &[Vec<String>]) -> Result<()> {
    let mut csv = csv::WriterBuilder::new()
        .delimiter(b';')
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(out);
    csv.write_record(header)?;
    for row in rows {
        csv.write_record(row)?;
    }
    csv.flush()?;
    Ok(())
}

/// Build the export for every stored closing (or those in `range`), newest
/// first. Fails when there is nothing to export.
pub fn export_combined(db: &DbState, range: Option<&DateRange>) -> Result<Vec<u8>> {
    let index = ledger::get_index(db)?;
    let mut keys = match range {
        Some(range) => filters::filter_keys(&index, range),
        None => index,
    };
    filters::history_order(&mut keys);
    let records = ledger::load_records(db, &keys)?;
    if records.is_empty() {
        return Err(CajaError::Validation("No hay datos para exportar".into()));
    }
    combined_csv(&records)
}

/// Write the export into `dir` under the default name for `today`.
pub fn write_combined(
    db: &DbState,
    range: Option<&DateRange>,
    dir: &Path,
    today: NaiveDate,
) -> Result<PathBuf> {
    let content = export_combined(db, range)?;
    fs::create_dir_all(dir)?;
    let path = dir.join(default_file_name(today));
    fs::write(&path, content)?;
    info!(path = %path.display(), "CSV export written");
    Ok(path)
}
