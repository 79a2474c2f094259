//! Command-line surface.
//!
//! Every subcommand handler takes a [`Ctx`] and a writer, so the handlers
//! run the same against stdout and against a buffer in tests.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use crate::db::DbState;
use crate::filters::DateRange;
use crate::keys::{parse_date, DayKey};

mod draft;
mod records;
mod reports;
mod settings;
mod system;

/// Daily cash-register closings: totals, history, export and reports.
#[derive(Parser, Debug)]
#[command(name = "caja", author, version, about, long_about = None)]
pub struct Cli {
    /// Directory holding the database and the logs
    #[arg(long, env = "CAJA_DATA_DIR", global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compute totals from raw amounts without storing anything
    Totals(records::TotalsArgs),

    /// Stored closings
    #[command(subcommand)]
    Record(records::RecordCommand),

    /// The closing being filled in
    #[command(subcommand)]
    Draft(draft::DraftCommand),

    /// Spreadsheet export
    #[command(subcommand)]
    Export(reports::ExportCommand),

    /// Summaries and discrepancy alerts
    #[command(subcommand)]
    Report(reports::ReportCommand),

    /// Branch, report recipient and employee rosters
    #[command(subcommand)]
    Settings(settings::SettingsCommand),

    /// Changes waiting to be pushed to the remote sheet
    #[command(subcommand)]
    Outbox(system::OutboxCommand),

    /// Verify that the index and the stored closings agree
    Check {
        /// Re-index orphan closings and drop dangling index entries
        #[arg(long)]
        repair: bool,
    },

    /// Version, build and database health
    About,
}

/// Everything a handler needs besides its own arguments.
pub struct Ctx<'a> {
    pub db: &'a DbState,
    pub json: bool,
    pub today: NaiveDate,
    pub now: DateTime<Utc>,
}

impl<'a> Ctx<'a> {
    pub fn new(db: &'a DbState, json: bool) -> Self {
        let now = Utc::now();
        Self {
            db,
            json,
            today: chrono::Local::now().date_naive(),
            now,
        }
    }

    /// Print `value` as JSON, or run `text` for the human-readable form.
    fn emit<W, T, F>(&self, out: &mut W, value: &T, text: F) -> Result<()>
    where
        W: Write,
        T: Serialize,
        F: FnOnce(&mut W) -> std::io::Result<()>,
    {
        if self.json {
            serde_json::to_writer_pretty(&mut *out, value)?;
            writeln!(out)?;
        } else {
            text(out)?;
        }
        Ok(())
    }
}

pub fn dispatch<W: Write>(command: Command, ctx: &Ctx<'_>, out: &mut W) -> Result<()> {
    match command {
        Command::Totals(args) => records::cmd_totals(ctx, &args, out),
        Command::Record(cmd) => records::run(ctx, cmd, out),
        Command::Draft(cmd) => draft::run(ctx, cmd, out),
        Command::Export(cmd) => reports::run_export(ctx, cmd, out),
        Command::Report(cmd) => reports::run_report(ctx, cmd, out),
        Command::Settings(cmd) => settings::run(ctx, cmd, out),
        Command::Outbox(cmd) => system::run_outbox(ctx, cmd, out),
        Command::Check { repair } => system::cmd_check(ctx, repair, out),
        Command::About => system::cmd_about(ctx, out),
    }
}

// ---------------------------------------------------------------------------
// Shared argument types
// ---------------------------------------------------------------------------

pub(crate) fn date_arg(s: &str) -> Result<NaiveDate, String> {
    parse_date(s).map_err(|e| e.to_string())
}

pub(crate) fn key_arg(s: &str) -> Result<DayKey, String> {
    s.parse().map_err(|e: crate::error::CajaError| e.to_string())
}

/// Date filter shared by listing, export and reports.
#[derive(Args, Debug, Clone, Default)]
pub struct RangeArgs {
    /// First day (YYYY-MM-DD), requires --hasta
    #[arg(long, value_parser = date_arg, requires = "hasta")]
    pub desde: Option<NaiveDate>,

    /// Last day (YYYY-MM-DD), requires --desde
    #[arg(long, value_parser = date_arg, requires = "desde")]
    pub hasta: Option<NaiveDate>,

    /// Only today
    #[arg(long, conflicts_with_all = ["desde", "week", "month"])]
    pub today: bool,

    /// Monday to Sunday of the current week
    #[arg(long, conflicts_with_all = ["desde", "month"])]
    pub week: bool,

    /// The current calendar month
    #[arg(long, conflicts_with = "desde")]
    pub month: bool,
}

impl RangeArgs {
    pub fn resolve(&self, today: NaiveDate) -> Result<Option<DateRange>> {
        Ok(match (self.desde, self.hasta) {
            (Some(desde), Some(hasta)) => Some(DateRange::new(desde, hasta)?),
            (None, None) if self.today => Some(DateRange::single(today)),
            (None, None) if self.week => Some(DateRange::this_week(today)),
            (None, None) if self.month => Some(DateRange::this_month(today)),
            (None, None) => None,
            _ => bail!("Por favor selecciona ambas fechas"),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use chrono::TimeZone;

    /// Run a command line against `db`, returning what it printed.
    pub fn run_cli(db: &DbState, args: &[&str]) -> Result<String> {
        let cli = Cli::try_parse_from(std::iter::once("caja").chain(args.iter().copied()))?;
        let ctx = Ctx {
            db,
            json: cli.json,
            today: parse_date("2025-08-06").unwrap(),
            now: Utc.with_ymd_and_hms(2025, 8, 6, 20, 0, 0).unwrap(),
        };
        let mut out = Vec::new();
        dispatch(cli.command, &ctx, &mut out)?;
        Ok(String::from_utf8(out)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(args: &[&str]) -> Result<Option<DateRange>> {
        #[derive(Parser)]
        struct Wrap {
            #[command(flatten)]
            range: RangeArgs,
        }
        let w = Wrap::try_parse_from(std::iter::once("t").chain(args.iter().copied()))?;
        w.range.resolve(parse_date("2025-08-06").unwrap())
    }

    #[test]
    fn test_range_presets() {
        assert_eq!(range(&[]).unwrap(), None);
        let today = range(&["--today"]).unwrap().unwrap();
        assert_eq!(today.desde.to_string(), "2025-08-06");
        let week = range(&["--week"]).unwrap().unwrap();
        assert_eq!(week.desde.to_string(), "2025-08-04");
        assert_eq!(week.hasta.to_string(), "2025-08-10");
        let month = range(&["--month"]).unwrap().unwrap();
        assert_eq!(month.hasta.to_string(), "2025-08-31");
    }

    #[test]
    fn test_range_explicit_bounds() {
        let r = range(&["--desde", "2025-01-01", "--hasta", "2025-01-31"])
            .unwrap()
            .unwrap();
        assert_eq!(r.hasta.to_string(), "2025-01-31");
        assert!(range(&["--desde", "2025-02-01", "--hasta", "2025-01-01"]).is_err());
        assert!(range(&["--desde", "2025-02-01"]).is_err());
        assert!(range(&["--desde", "01/02/2025", "--hasta", "2025-03-01"]).is_err());
        assert!(range(&["--today", "--week"]).is_err());
    }

    #[test]
    fn test_cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["caja", "record", "list", "--json", "--data-dir", "/tmp/x"])
            .unwrap();
        assert!(cli.json);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/x")));
    }
}
