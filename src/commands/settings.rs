use std::io::Write;

use anyhow::{bail, Result};
use clap::{Subcommand, ValueEnum};
use serde_json::json;

use super::Ctx;
use crate::settings;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SettingKey {
    /// Active branch
    Sucursal,
    /// Recipient of summaries
    Email,
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    /// Show every setting
    Get,

    /// Change one setting
    Set { key: SettingKey, value: String },

    /// Show or replace a branch roster (the active branch by default)
    Employees {
        sucursal: Option<String>,

        /// New roster, comma separated
        #[arg(long, value_delimiter = ',', conflicts_with = "reset")]
        set: Option<Vec<String>>,

        /// Go back to the built-in roster
        #[arg(long)]
        reset: bool,
    },
}

pub fn run<W: Write>(ctx: &Ctx<'_>, cmd: SettingsCommand, out: &mut W) -> Result<()> {
    match cmd {
        SettingsCommand::Get => {
            let s = settings::load(ctx.db)?;
            ctx.emit(out, &s, |out| {
                writeln!(out, "Sucursal: {}", s.sucursal.as_deref().unwrap_or("(ninguna)"))?;
                writeln!(out, "Email:    {}", s.email_to)?;
                for (branch, names) in &s.employees {
                    writeln!(out, "{branch}: {}", names.join(", "))?;
                }
                Ok(())
            })
        }
        SettingsCommand::Set { key, value } => {
            match key {
                SettingKey::Sucursal => settings::set_branch(ctx.db, &value)?,
                SettingKey::Email => settings::set_email_to(ctx.db, &value)?,
            }
            ctx.emit(out, &json!({ "updated": true }), |out| writeln!(out, "Guardado"))
        }
        SettingsCommand::Employees {
            sucursal,
            set,
            reset,
        } => {
            let sucursal = match sucursal {
                Some(s) => s,
                None => match settings::branch(ctx.db)? {
                    Some(s) => s,
                    None => bail!("Selecciona una sucursal"),
                },
            };
            if reset {
                settings::reset_employees(ctx.db, &sucursal)?;
            }
            let names = match set {
                Some(names) => settings::set_employees(ctx.db, &sucursal, &names)?,
                None => settings::employees(ctx.db, &sucursal)?,
            };
            ctx.emit(
                out,
                &json!({ "sucursal": sucursal, "employees": names }),
                |out| writeln!(out, "{sucursal}: {}", names.join(", ")),
            )
        }
    }
}
