//! Caja Diaria: daily cash-register reconciliation for a small business.
//!
//! The library owns the ledger of closings (SQLite-backed), the lenient
//! monetary parser, the totals engine, filters, export and report builders.
//! The `caja` binary is a thin command-line layer over it.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod export;
pub mod filters;
pub mod keys;
pub mod ledger;
pub mod models;
pub mod money;
pub mod outbox;
pub mod report;
pub mod session;
pub mod settings;
pub mod totals;

pub use error::{CajaError, Result as CajaResult};
pub use keys::DayKey;
pub use models::{DayRecord, Movement, MovementKind};
pub use money::{format_currency, format_date, parse_num, RawAmount};
pub use totals::{compute_totals, Totals};

const APP_DIR_NAME: &str = "caja-diaria";

/// Default data directory: the platform's local data dir, or `./caja-diaria`.
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

/// Console layer on stderr plus a daily rolling file under `<data_dir>/logs`.
/// The returned guard flushes the file writer when dropped.
fn init_logging(data_dir: &Path) -> WorkerGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,caja_diaria_lib=debug"));

    let log_dir = diagnostics::get_log_dir(data_dir);
    diagnostics::prune_old_logs(&log_dir);
    std::fs::create_dir_all(&log_dir).ok();

    let file_appender =
        tracing_appender::rolling::daily(&log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);
    // A second call (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    guard
}

fn run_cli(cli: commands::Cli) -> Result<()> {
    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    let _log_guard = init_logging(&data_dir);
    debug!(data_dir = %data_dir.display(), "Starting caja v{}", env!("CARGO_PKG_VERSION"));

    let db = db::init(&data_dir)
        .with_context(|| format!("opening database in {}", data_dir.display()))?;
    let ctx = commands::Ctx::new(&db, cli.json);

    let mut stdout = std::io::stdout().lock();
    commands::dispatch(cli.command, &ctx, &mut stdout)?;
    debug!("Done");
    Ok(())
}

/// Entry point of the `caja` binary.
pub fn run() -> ExitCode {
    let cli = commands::Cli::parse();
    match run_cli(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_guard_flushes_into_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let guard = init_logging(dir.path());
        tracing::warn!("logging smoke line");
        drop(guard);

        let log_dir = diagnostics::get_log_dir(dir.path());
        assert!(log_dir.is_dir());
        let files = std::fs::read_dir(&log_dir).unwrap().count();
        assert!(files >= 1);
    }
}
