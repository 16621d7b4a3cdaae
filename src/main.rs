mod api;
mod cache;
mod client;
mod commands;
mod config;
mod db;
mod error;
mod event;
mod session;
#[cfg(test)]
mod testing;

use clap::Parser;
use color_eyre::Result;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::client::TodoClient;
use crate::commands::Command;

#[derive(Parser, Debug)]
#[command(name = "todoq")]
#[command(about = "A caching command-line client for the todo task service")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/todoq/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = config::Config::load(args.config.as_deref())?;
  let data_dir = config::Config::data_dir()?;
  std::fs::create_dir_all(&data_dir)?;

  let _log_guard = init_logging(&data_dir.join("logs"));
  tracing::debug!(url = %config.api.url, "starting");

  let password = if args.command.needs_password() {
    Some(config::Config::get_password()?)
  } else {
    None
  };

  let db = db::Database::open(&data_dir.join("state.db"))?;
  let mut client = TodoClient::open(&config, db)?;
  if matches!(args.command, Command::Listen) {
    client.start_gc(Duration::from_secs(config.cache.gc_minutes.max(1) as u64 * 60));
  }

  let outcome = commands::execute(&client, args.command, password).await;
  match client.cache.collect_garbage() {
    Ok(evicted) => tracing::debug!(evicted, "cache swept"),
    Err(e) => tracing::warn!(error = %e, "cache garbage collection failed"),
  }

  Ok(report(outcome))
}

/// Exit status for a finished command; failures are logged and explained on
/// stderr.
fn report(outcome: error::Result<()>) -> ExitCode {
  match outcome {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      tracing::warn!(error = %e, "command failed");
      eprintln!("Error: {}", e.user_message());
      ExitCode::FAILURE
    }
  }
}

/// Log to a daily file under `dir`; stdout belongs to command output.
///
/// Filtered by `TODOQ_LOG`, defaulting to `todoq=info`.
fn init_logging(dir: &Path) -> WorkerGuard {
  let appender = tracing_appender::rolling::daily(dir, "todoq.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = EnvFilter::try_from_env("TODOQ_LOG").unwrap_or_else(|_| EnvFilter::new("todoq=info"));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  guard
}
