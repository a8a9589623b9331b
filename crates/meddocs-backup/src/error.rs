//! Error types for `meddocs-backup`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackupError {
  #[error(transparent)]
  Repo(#[from] meddocs_repo::Error),

  #[error("core error: {0}")]
  Core(#[from] meddocs_core::Error),

  #[error("zip error: {0}")]
  Zip(#[from] zip::result::ZipError),

  #[error("i/o error on {}: {source}", path.display())]
  Io {
    path:   PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("settings error: {0}")]
  Settings(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("background task failed: {0}")]
  Join(#[from] tokio::task::JoinError),

  /// Not a single attachment payload could be staged.
  #[error("no files to back up")]
  NoFiles,

  /// Every candidate output directory failed.
  #[error("no writable backup location (tried {tried})")]
  OutputUnavailable { tried: usize },

  #[error("archive has no backup manifest")]
  MissingManifest,

  #[error("archive manifest is unreadable: {0}")]
  CorruptManifest(#[source] meddocs_core::Error),

  #[error("archive has no patient data")]
  MissingPatients,

  #[error("archive entry {entry} is unreadable: {source}")]
  CorruptEntry {
    entry:  &'static str,
    #[source]
    source: meddocs_core::Error,
  },
}

impl BackupError {
  pub(crate) fn settings(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Settings(Box::new(e))
  }

  pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
    let path = path.into();
    move |source| Self::Io { path, source }
  }
}

/// Failures of [`crate::FileSettings`].
#[derive(Debug, Error)]
pub enum SettingsError {
  #[error("i/o error on {}: {source}", path.display())]
  Io {
    path:   PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid settings file: {0}")]
  Parse(#[from] toml::de::Error),

  #[error("cannot serialise settings: {0}")]
  Serialize(#[from] toml::ser::Error),
}

pub type Result<T, E = BackupError> = std::result::Result<T, E>;
