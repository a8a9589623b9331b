//! Error types for `meddocs-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("patient not found: {0}")]
  PatientNotFound(i64),

  #[error("file not found: {0}")]
  FileNotFound(i64),

  #[error("duplicate {entity} id: {id}")]
  DuplicateId { entity: &'static str, id: i64 },

  #[error("required field {0:?} is blank")]
  BlankField(&'static str),

  #[error("unknown patient status: {0:?}")]
  UnknownStatus(String),

  #[error("unknown recycle-bin item kind: {0:?}")]
  UnknownItemKind(String),

  #[error("invalid retention window: {0} days")]
  InvalidRetention(i64),

  #[error("base64 decode error: {0}")]
  Encoding(#[from] base64::DecodeError),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
