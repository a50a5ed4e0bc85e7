mod app;
mod cache;
mod commands;
mod config;
mod credentials;
mod event;
mod helpdesk;
mod rt;
mod stats;
mod sync;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rtstat")]
#[command(about = "Helpdesk statistics over a local cache of Request Tracker tickets")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/rtstat/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Start a cache sync right away
  #[arg(long)]
  sync: bool,
}

/// Log to a daily file; stdout carries replies.
fn init_logging(log_dir: &Path) -> Result<WorkerGuard> {
  std::fs::create_dir_all(log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(log_dir, "rtstat.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = init_logging(&config.log_dir()?)?;

  let credentials = credentials::Credentials::load(&config.credentials_path()?)?;
  let helpdesk = helpdesk::Helpdesk::connect(&config, credentials).await?;

  let events = event::EventHandler::new(config.tick_rate());
  let mut app = app::App::new(helpdesk, args.sync);
  app.run(events).await?;

  Ok(())
}
