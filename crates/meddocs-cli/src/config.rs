//! Application configuration, layered from an optional TOML file and
//! `MEDDOCS_*` environment variables.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use meddocs_core::recycle::DEFAULT_RETENTION_DAYS;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  /// Root for everything below that is not set explicitly.
  pub data_dir:             PathBuf,
  pub store_path:           Option<PathBuf>,
  pub files_dir:            Option<PathBuf>,
  /// Primary backup directory.
  pub backup_dir:           Option<PathBuf>,
  /// Tried in order when the primary directory is not writable.
  pub fallback_backup_dirs: Vec<PathBuf>,
  /// Where staging and extraction directories are created.
  pub work_dir:             Option<PathBuf>,
  pub settings_path:        Option<PathBuf>,
  /// Days a soft-deleted item stays in the recycle bin.
  pub retention_days:       i64,
  /// Recorded in backup manifests.
  pub device_name:          String,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      data_dir:             PathBuf::from("~/.local/share/meddocs"),
      store_path:           None,
      files_dir:            None,
      backup_dir:           None,
      fallback_backup_dirs: Vec::new(),
      work_dir:             None,
      settings_path:        None,
      retention_days:       DEFAULT_RETENTION_DAYS,
      device_name:          std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".into()),
    }
  }
}

impl AppConfig {
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("MEDDOCS")
          .try_parsing(true)
          .list_separator(",")
          .with_list_parse_key("fallback_backup_dirs"),
      )
      .build()
      .context("failed to read config file")?;

    let cfg: Self = settings
      .try_deserialize()
      .context("failed to deserialise AppConfig")?;
    anyhow::ensure!(
      cfg.retention_days >= 1,
      "retention_days must be at least 1, got {}",
      cfg.retention_days
    );
    Ok(cfg)
  }

  fn under_data(&self, explicit: &Option<PathBuf>, default: &str) -> PathBuf {
    match explicit {
      Some(path) => expand_tilde(path),
      None => expand_tilde(&self.data_dir).join(default),
    }
  }

  pub fn store_path(&self) -> PathBuf { self.under_data(&self.store_path, "meddocs.db") }

  pub fn files_dir(&self) -> PathBuf { self.under_data(&self.files_dir, "files") }

  pub fn backup_dir(&self) -> PathBuf { self.under_data(&self.backup_dir, "backups") }

  pub fn work_dir(&self) -> PathBuf { self.under_data(&self.work_dir, "work") }

  pub fn settings_path(&self) -> PathBuf { self.under_data(&self.settings_path, "settings.toml") }

  pub fn fallback_backup_dirs(&self) -> Vec<PathBuf> {
    self.fallback_backup_dirs.iter().map(|p| expand_tilde(p)).collect()
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
