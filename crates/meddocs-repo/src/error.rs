//! Error type for `meddocs-repo`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] meddocs_core::Error),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("i/o error on {}: {source}", path.display())]
  Io {
    path:   PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("patient not found: {0}")]
  PatientNotFound(i64),

  #[error("file not found: {0}")]
  FileNotFound(i64),

  /// A binned file cannot come back because its patient is gone.
  #[error("file {file_id} belongs to patient {patient_id}, which no longer exists")]
  OrphanedFile { file_id: i64, patient_id: i64 },

  #[error("file {file_id} cannot be restored, its payload is gone")]
  MissingPayload { file_id: i64 },
}

impl Error {
  pub(crate) fn store(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Store(Box::new(e))
  }

  pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
    let path = path.into();
    move |source| Self::Io { path, source }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
