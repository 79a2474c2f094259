use std::io::Write;

use anyhow::{Context, Result};
use clap::Subcommand;
use serde_json::json;

use super::Ctx;
use crate::diagnostics;
use crate::ledger::{self, ConsistencyReport};
use crate::outbox;

/// Delivered outbox rows are kept this long before `outbox ack` prunes them.
const SYNCED_RETENTION_DAYS: u32 = 30;

#[derive(Subcommand, Debug)]
pub enum OutboxCommand {
    /// Pending changes, oldest first
    List,

    /// Mark changes as delivered
    Ack {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
}

pub fn run_outbox<W: Write>(ctx: &Ctx<'_>, cmd: OutboxCommand, out: &mut W) -> Result<()> {
    match cmd {
        OutboxCommand::List => {
            let entries = outbox::list_pending(ctx.db)?;
            ctx.emit(out, &entries, |out| {
                if entries.is_empty() {
                    return writeln!(out, "Sin cambios pendientes");
                }
                for e in &entries {
                    writeln!(
                        out,
                        "{:>5}  {:<7} {:<14} {}  {}",
                        e.id, e.operation, e.record_key, e.created_at, e.idempotency_key
                    )?;
                }
                Ok(())
            })
        }
        OutboxCommand::Ack { ids } => {
            let updated = outbox::mark_synced(ctx.db, &ids)?;
            outbox::prune_synced(ctx.db, SYNCED_RETENTION_DAYS)?;
            ctx.emit(out, &json!({ "acknowledged": updated }), |out| {
                writeln!(out, "{updated} cambio(s) confirmados")
            })
        }
    }
}

pub fn cmd_check<W: Write>(ctx: &Ctx<'_>, repair: bool, out: &mut W) -> Result<()> {
    let report = if repair {
        ledger::repair(ctx.db)?
    } else {
        ledger::check_consistency(ctx.db)?
    };
    ctx.emit(out, &report, |out| write_report(out, &report, repair))?;
    if !repair {
        ledger::ensure_consistent(ctx.db)
            .context("el índice y los cierres guardados no coinciden (usa --repair)")?;
    }
    Ok(())
}

fn write_report<W: Write>(out: &mut W, report: &ConsistencyReport, repaired: bool) -> std::io::Result<()> {
    if report.is_consistent() {
        return writeln!(out, "Índice y cierres coinciden");
    }
    let verb = if repaired { "reindexado" } else { "sin indexar" };
    for key in &report.orphan_records {
        writeln!(out, "{key}: {verb}")?;
    }
    let verb = if repaired { "quitado del índice" } else { "sin datos" };
    for key in &report.dangling_keys {
        writeln!(out, "{key}: {verb}")?;
    }
    Ok(())
}

pub fn cmd_about<W: Write>(ctx: &Ctx<'_>, out: &mut W) -> Result<()> {
    let about = diagnostics::get_about_info();
    let health = diagnostics::get_health(ctx.db)?;
    let value = json!({
        "about": about,
        "health": health,
        "dbPath": ctx.db.db_path,
    });
    ctx.emit(out, &value, |out| {
        writeln!(
            out,
            "caja {} ({} {}) {}/{}",
            about["version"].as_str().unwrap_or_default(),
            about["gitSha"].as_str().unwrap_or_default(),
            about["buildTimestamp"].as_str().unwrap_or_default(),
            about["platform"].as_str().unwrap_or_default(),
            about["arch"].as_str().unwrap_or_default(),
        )?;
        writeln!(out, "Base de datos:   {}", ctx.db.db_path.display())?;
        writeln!(out, "Esquema:         v{}", health["schemaVersion"])?;
        writeln!(out, "Cierres:         {}", health["records"])?;
        writeln!(out, "Pendientes sync: {}", health["outboxBacklog"])?;
        writeln!(out, "Consistente:     {}", health["consistent"])?;
        writeln!(out, "Tamaño:          {} bytes", health["dbSizeBytes"])
    })
}
