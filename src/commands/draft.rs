use std::io::Write;

use anyhow::{bail, Result};
use clap::Subcommand;
use serde_json::json;

use super::records::balance_mark;
use super::{key_arg, Ctx};
use crate::filters::key_label;
use crate::keys::DayKey;
use crate::models::MovementKind;
use crate::money::{format_currency, format_raw, RawAmount};
use crate::session::{RegisterSession, SessionField};
use crate::settings;

#[derive(Subcommand, Debug)]
pub enum DraftCommand {
    /// Show the form, its movements and live totals
    Show,

    /// Set one field (fecha, sucursal, apertura, responsable-apertura,
    /// ingresos, ingresos-tarjeta-exora, ingresos-tarjeta-datafono, cierre,
    /// responsable-cierre)
    Set {
        #[arg(value_parser = field_arg)]
        field: SessionField,
        value: String,
    },

    /// Add a treasury movement
    AddMov {
        #[arg(value_parser = kind_arg)]
        tipo: MovementKind,
        importe: String,
        /// Who moved the cash
        #[arg(long, default_value = "")]
        quien: String,
    },

    /// Remove a movement by its 1-based position
    RemoveMov { position: usize },

    /// Empty the form, keeping the date and the branch
    Clear,

    /// Load a stored closing into the form for editing
    Edit {
        #[arg(value_parser = key_arg)]
        key: DayKey,
    },

    /// Store the form as a closing
    Save,

    /// Delete the closing being edited
    Delete,

    /// Throw the draft away
    Discard,
}

fn field_arg(s: &str) -> Result<SessionField, String> {
    s.parse().map_err(|e: crate::error::CajaError| e.to_string())
}

fn kind_arg(s: &str) -> Result<MovementKind, String> {
    MovementKind::from_str_loose(s).ok_or_else(|| format!("'{s}' no es entrada ni salida"))
}

/// The stored draft, or a fresh form for today on the active branch.
fn current(ctx: &Ctx<'_>) -> Result<RegisterSession> {
    if let Some(session) = RegisterSession::load_draft(ctx.db)? {
        return Ok(session);
    }
    let sucursal = settings::branch(ctx.db)?.unwrap_or_default();
    Ok(RegisterSession::new(ctx.today, &sucursal))
}

pub fn run<W: Write>(ctx: &Ctx<'_>, cmd: DraftCommand, out: &mut W) -> Result<()> {
    let mut session = current(ctx)?;

    match cmd {
        DraftCommand::Show => {}
        DraftCommand::Set { field, value } => {
            session.set(field, &value);
            if field == SessionField::Sucursal && !value.trim().is_empty() {
                settings::set_branch(ctx.db, &value)?;
            }
        }
        DraftCommand::AddMov {
            tipo,
            importe,
            quien,
        } => {
            session.add_movement(tipo, &quien, &RawAmount::from(importe))?;
        }
        DraftCommand::RemoveMov { position } => {
            if position == 0 || session.remove_movement(position - 1).is_none() {
                bail!("No hay movimiento en la posición {position}");
            }
        }
        DraftCommand::Clear => session.clear(),
        DraftCommand::Edit { key } => {
            let Some(loaded) = RegisterSession::load(ctx.db, &key)? else {
                bail!("No existe el cierre {key}");
            };
            if !loaded.sucursal.trim().is_empty() {
                settings::set_branch(ctx.db, &loaded.sucursal)?;
            }
            session = loaded;
        }
        DraftCommand::Save => {
            let key = session.save(ctx.db, ctx.now)?;
            session.save_draft(ctx.db)?;
            return ctx.emit(out, &json!({ "saved": key }), |out| {
                writeln!(out, "Cierre guardado como {}", key_label(&key))
            });
        }
        DraftCommand::Delete => {
            let Some(key) = session.edit_key else {
                bail!("No se está editando ningún cierre");
            };
            session.delete(ctx.db)?;
            session.save_draft(ctx.db)?;
            return ctx.emit(out, &json!({ "deleted": key }), |out| {
                writeln!(out, "Cierre {} eliminado", key_label(&key))
            });
        }
        DraftCommand::Discard => {
            RegisterSession::discard_draft(ctx.db)?;
            return ctx.emit(out, &json!({ "discarded": true }), |out| {
                writeln!(out, "Borrador descartado")
            });
        }
    }

    session.save_draft(ctx.db)?;
    show(ctx, &session, out)
}

fn show<W: Write>(ctx: &Ctx<'_>, session: &RegisterSession, out: &mut W) -> Result<()> {
    let t = session.totals();
    let card = session.card_difference();
    let employees = settings::employees(ctx.db, &session.sucursal)?;
    let value = json!({
        "draft": session,
        "totals": t,
        "balanced": t.is_balanced(),
        "cardDifference": card,
        "cardBalanced": session.card_balanced(),
        "employees": employees,
    });

    ctx.emit(out, &value, |out| {
        match &session.edit_key {
            Some(key) => writeln!(out, "Editando {}", key_label(key))?,
            None => writeln!(out, "Nuevo cierre")?,
        }
        writeln!(out, "Fecha:           {}", session.fecha)?;
        writeln!(out, "Sucursal:        {}", session.sucursal)?;
        writeln!(
            out,
            "Apertura:        {} € ({})",
            format_raw(&session.apertura),
            session.responsable_apertura
        )?;
        writeln!(out, "Ingresos:        {} €", format_raw(&session.ingresos))?;
        if session.movimientos.is_empty() {
            writeln!(out, "Movimientos:     ninguno")?;
        } else {
            writeln!(out, "Movimientos:")?;
            for (i, mov) in session.movimientos.iter().enumerate() {
                writeln!(
                    out,
                    "  {}. {}: {} € ({})",
                    i + 1,
                    mov.tipo.map(|t| t.label()).unwrap_or("?"),
                    format_currency(mov.importe),
                    mov.quien_or_default()
                )?;
            }
        }
        writeln!(
            out,
            "Cierre:          {} € ({})",
            format_raw(&session.cierre),
            session.responsable_cierre
        )?;
        writeln!(out, "Total en caja:   {} €", format_currency(t.total))?;
        writeln!(out, "Diferencia:      {} € {}", format_currency(t.diff), balance_mark(t.diff))?;
        writeln!(out, "Dif. tarjeta:    {} € {}", format_currency(card), balance_mark(card))?;
        if !employees.is_empty() {
            writeln!(out, "Empleados:       {}", employees.join(", "))?;
        }
        Ok(())
    })
}
