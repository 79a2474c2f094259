use std::io::Write;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use serde_json::{json, Value};
use tracing::info;

use super::{key_arg, Ctx, RangeArgs};
use crate::filters::{self, HistoryRow};
use crate::keys::DayKey;
use crate::ledger;
use crate::money::{format_currency, is_balanced, RawAmount};
use crate::totals::{self, record_totals};

#[derive(Args, Debug)]
pub struct TotalsArgs {
    /// Opening float
    #[arg(long, default_value = "")]
    pub apertura: String,

    /// Cash income
    #[arg(long, default_value = "")]
    pub ingresos: String,

    /// Counted cash at closing
    #[arg(long, default_value = "")]
    pub cierre: String,

    /// Cash injection (repeatable)
    #[arg(long = "entrada", value_name = "IMPORTE")]
    pub entradas: Vec<String>,

    /// Cash withdrawal (repeatable)
    #[arg(long = "salida", value_name = "IMPORTE")]
    pub salidas: Vec<String>,

    /// Card income according to the POS
    #[arg(long, default_value = "")]
    pub exora: String,

    /// Card income according to the card terminal
    #[arg(long, default_value = "")]
    pub datafono: String,
}

#[derive(Subcommand, Debug)]
pub enum RecordCommand {
    /// List closings, newest first
    List {
        #[command(flatten)]
        range: RangeArgs,
    },

    /// Show one closing with its totals
    Show {
        #[arg(value_parser = key_arg)]
        key: DayKey,
    },

    /// Delete one closing
    Delete {
        #[arg(value_parser = key_arg)]
        key: DayKey,
    },
}

pub fn cmd_totals<W: Write>(ctx: &Ctx<'_>, args: &TotalsArgs, out: &mut W) -> Result<()> {
    let movimientos: Vec<Value> = args
        .entradas
        .iter()
        .map(|importe| json!({ "tipo": "entrada", "importe": importe }))
        .chain(
            args.salidas
                .iter()
                .map(|importe| json!({ "tipo": "salida", "importe": importe })),
        )
        .collect();

    let t = totals::compute_totals_json(
        &RawAmount::from(args.apertura.as_str()),
        &RawAmount::from(args.ingresos.as_str()),
        &Value::Array(movimientos),
        &RawAmount::from(args.cierre.as_str()),
    );
    let card = totals::card_difference(
        &RawAmount::from(args.exora.as_str()),
        &RawAmount::from(args.datafono.as_str()),
    );

    let value = json!({
        "totals": t,
        "balanced": t.is_balanced(),
        "cardDifference": card,
        "cardBalanced": is_balanced(card),
    });
    ctx.emit(out, &value, |out| {
        writeln!(out, "Entradas:        {} €", format_currency(t.entradas))?;
        writeln!(out, "Salidas:         {} €", format_currency(t.salidas))?;
        writeln!(out, "Total en caja:   {} €", format_currency(t.total))?;
        writeln!(out, "Diferencia:      {} € {}", format_currency(t.diff), balance_mark(t.diff))?;
        writeln!(out, "Dif. tarjeta:    {} € {}", format_currency(card), balance_mark(card))
    })
}

pub(super) fn balance_mark(diff: f64) -> &'static str {
    if is_balanced(diff) {
        "✓ CUADRA"
    } else {
        "⚠ NO CUADRA"
    }
}

pub fn run<W: Write>(ctx: &Ctx<'_>, cmd: RecordCommand, out: &mut W) -> Result<()> {
    match cmd {
        RecordCommand::List { range } => {
            let range = range.resolve(ctx.today)?;
            let rows = filters::history(ctx.db, range.as_ref())?;
            ctx.emit(out, &rows, |out| write_history(out, &rows))
        }
        RecordCommand::Show { key } => {
            let Some(record) = ledger::load_record(ctx.db, &key)? else {
                bail!("No existe el cierre {key}");
            };
            let t = record_totals(&record);
            let value = json!({ "key": key, "record": record, "totals": t });
            ctx.emit(out, &value, |out| {
                writeln!(out, "{} · {}", filters::key_label(&key), record.sucursal)?;
                writeln!(
                    out,
                    "Apertura:        {} € ({})",
                    format_currency(record.apertura),
                    record.responsable_apertura
                )?;
                writeln!(out, "Ingresos:        {} €", format_currency(record.ingresos))?;
                for (i, mov) in record.movimientos.iter().enumerate() {
                    writeln!(
                        out,
                        "  {}. {}: {} € ({})",
                        i + 1,
                        mov.tipo.map(|t| t.label()).unwrap_or("?"),
                        format_currency(mov.importe),
                        mov.quien_or_default()
                    )?;
                }
                writeln!(out, "Total en caja:   {} €", format_currency(t.total))?;
                writeln!(
                    out,
                    "Cierre:          {} € ({})",
                    format_currency(record.cierre),
                    record.responsable_cierre
                )?;
                writeln!(out, "Diferencia:      {} € {}", format_currency(t.diff), balance_mark(t.diff))?;
                writeln!(
                    out,
                    "Dif. tarjeta:    {} € {}",
                    format_currency(record.card_difference()),
                    balance_mark(record.card_difference())
                )
            })
        }
        RecordCommand::Delete { key } => {
            if ledger::load_record(ctx.db, &key)?.is_none() {
                bail!("No existe el cierre {key}");
            }
            ledger::delete_record(ctx.db, &key).with_context(|| format!("deleting {key}"))?;
            info!(key = %key, "Closing deleted from the command line");
            ctx.emit(out, &json!({ "deleted": key }), |out| {
                writeln!(out, "Cierre {} eliminado", filters::key_label(&key))
            })
        }
    }
}

fn write_history<W: Write>(out: &mut W, rows: &[HistoryRow]) -> std::io::Result<()> {
    if rows.is_empty() {
        return writeln!(out, "No hay registros");
    }
    for row in rows {
        writeln!(
            out,
            "{:<14} {:<24} {:<22} apertura {:>10}  cierre {:>10}  dif {:>9} {}",
            row.key.to_string(),
            row.label,
            row.record.sucursal,
            format_currency(row.record.apertura),
            format_currency(row.record.cierre),
            format_currency(row.totals.diff),
            balance_mark(row.totals.diff),
        )?;
    }
    Ok(())
}
