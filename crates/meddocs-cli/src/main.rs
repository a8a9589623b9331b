//! `meddocs` — command-line front end for the MedDocs record store.
//!
//! Configuration is read from an optional TOML file (`--config`, default
//! `meddocs.toml`) and then from `MEDDOCS_*` environment variables, e.g.
//! `MEDDOCS_DATA_DIR=/srv/meddocs` or
//! `MEDDOCS_FALLBACK_BACKUP_DIRS=/mnt/usb,/tmp/meddocs`.

mod commands;
mod config;

use std::{path::PathBuf, process::ExitCode, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use meddocs_backup::{ArchiveBuilder, ArchiveRestorer, BackupLocations, FileSettings, Scheduler};
use meddocs_repo::{FileArea, Repository};
use meddocs_store_sqlite::SqliteStore;
use tracing::{debug, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

use crate::{
  commands::{App, Command},
  config::AppConfig,
};

#[derive(Parser)]
#[command(author, version, about = "Patient records with backup and a recycle bin")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "meddocs.toml")]
  config: PathBuf,

  /// Print results as JSON instead of text.
  #[arg(long, global = true)]
  json: bool,

  #[command(subcommand)]
  command: Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let cfg = AppConfig::load(&cli.config)?;
  let app = open(&cfg, cli.json).await?;
  app.run(cli.command).await
}

async fn open(cfg: &AppConfig, json: bool) -> anyhow::Result<App> {
  let store_path = cfg.store_path();
  if let Some(parent) = store_path.parent() {
    tokio::fs::create_dir_all(parent)
      .await
      .with_context(|| format!("failed to create {}", parent.display()))?;
  }
  debug!(store = %store_path.display(), "opening record store");
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {}", store_path.display()))?;

  let repo = Arc::new(Repository::new(store, FileArea::new(cfg.files_dir())));
  let settings = Arc::new(FileSettings::new(cfg.settings_path()));
  let locations = BackupLocations::new(cfg.backup_dir(), cfg.work_dir())
    .with_fallbacks(cfg.fallback_backup_dirs());

  let builder = ArchiveBuilder::new(repo.clone(), settings.clone(), locations.clone())
    .with_device_name(cfg.device_name.clone());
  let restorer = ArchiveRestorer::new(repo.clone(), settings.clone(), locations);

  Ok(App {
    repo,
    settings,
    scheduler: Scheduler::new(builder, restorer),
    retention_days: cfg.retention_days,
    json,
  })
}
