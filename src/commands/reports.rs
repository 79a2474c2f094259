use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use serde_json::json;

use super::{key_arg, Ctx, RangeArgs};
use crate::export;
use crate::filters::{self, DateRange};
use crate::keys::DayKey;
use crate::ledger;
use crate::report::{self, Message};
use crate::session::RegisterSession;
use crate::settings;

#[derive(Subcommand, Debug)]
pub enum ExportCommand {
    /// Combined closings + movements CSV
    Csv {
        /// Directory to write into
        #[arg(long, default_value = ".", value_name = "DIR")]
        out: PathBuf,

        #[command(flatten)]
        range: RangeArgs,
    },
}

#[derive(Subcommand, Debug)]
pub enum ReportCommand {
    /// Summary of one closing (the form being filled in if no key is given)
    Day {
        #[arg(value_parser = key_arg)]
        key: Option<DayKey>,
    },

    /// Consolidated summary over a date range
    Range {
        #[command(flatten)]
        range: RangeArgs,
    },

    /// Alerts for closings whose cash does not balance
    Alert {
        #[command(flatten)]
        range: RangeArgs,
    },
}

pub fn run_export<W: Write>(ctx: &Ctx<'_>, cmd: ExportCommand, out: &mut W) -> Result<()> {
    match cmd {
        ExportCommand::Csv { out: dir, range } => {
            let range = range.resolve(ctx.today)?;
            let path = export::write_combined(ctx.db, range.as_ref(), &dir, ctx.today)
                .context("exporting closings")?;
            ctx.emit(out, &json!({ "path": path }), |out| {
                writeln!(
                    out,
                    "Archivo {} generado con datos de caja y movimientos",
                    path.display()
                )
            })
        }
    }
}

pub fn run_report<W: Write>(ctx: &Ctx<'_>, cmd: ReportCommand, out: &mut W) -> Result<()> {
    let to = settings::email_to(ctx.db)?;
    match cmd {
        ReportCommand::Day { key } => {
            let (record, fecha) = match key {
                Some(key) => match ledger::load_record(ctx.db, &key)? {
                    Some(record) => (record, key.fecha),
                    None => bail!("No existe el cierre {key}"),
                },
                None => {
                    let Some(session) = RegisterSession::load_draft(ctx.db)? else {
                        bail!("No hay ningún cierre en curso");
                    };
                    let record = session
                        .to_record(ctx.now)
                        .context("Por favor, completa la fecha y sucursal antes de enviar el email")?;
                    (record, session.fecha_date()?)
                }
            };
            let msg = report::daily_summary(&record, fecha, &to, ctx.today);
            emit_message(ctx, &msg, out)
        }
        ReportCommand::Range { range } => {
            let range = require_range(&range, ctx)?;
            let records = records_in(ctx, &range)?;
            let Some(msg) = report::consolidated_summary(&records, &range, &to, ctx.today) else {
                bail!("No hay datos en el filtro para enviar por email");
            };
            emit_message(ctx, &msg, out)
        }
        ReportCommand::Alert { range } => {
            let range = require_range(&range, ctx)?;
            let alerts = report::alerts(&records_in(ctx, &range)?);
            ctx.emit(out, &alerts, |out| {
                if alerts.is_empty() {
                    return writeln!(out, "Todos los cierres cuadran");
                }
                for alert in &alerts {
                    let msg = alert.to_message(&to);
                    writeln!(out, "{}\n{}\n", msg.subject, msg.body)?;
                }
                Ok(())
            })
        }
    }
}

/// Ranged reports default to today.
fn require_range(args: &RangeArgs, ctx: &Ctx<'_>) -> Result<DateRange> {
    Ok(args
        .resolve(ctx.today)?
        .unwrap_or_else(|| DateRange::single(ctx.today)))
}

fn records_in(
    ctx: &Ctx<'_>,
    range: &DateRange,
) -> Result<Vec<(DayKey, crate::models::DayRecord)>> {
    let keys = filters::filter_keys(&ledger::get_index(ctx.db)?, range);
    Ok(ledger::load_records(ctx.db, &keys)?)
}

fn emit_message<W: Write>(ctx: &Ctx<'_>, msg: &Message, out: &mut W) -> Result<()> {
    ctx.emit(out, msg, |out| {
        writeln!(out, "Para: {}", msg.to)?;
        writeln!(out, "Asunto: {}", msg.subject)?;
        writeln!(out)?;
        writeln!(out, "{}", msg.body)
    })
}
