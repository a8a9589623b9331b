//! Repository facade for MedDocs.
//!
//! [`Repository`] is the single entry point the binary and the backup engine
//! use. It validates input, keeps payload files in the [`FileArea`] in step
//! with their rows, and implements the soft-delete / restore / purge
//! lifecycle of the recycle bin on top of any [`meddocs_core::store::RecordStore`].

mod files;
mod repository;

pub mod error;

pub use error::{Error, Result};
pub use files::{DEFAULT_MIME, FileArea, StoredPayload, guess_mime};
pub use repository::{PurgeReport, Repository};
