//! Error type for `meddocs-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] meddocs_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  /// A millisecond column held a value outside chrono's range.
  #[error("timestamp out of range: {0}")]
  Timestamp(i64),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
