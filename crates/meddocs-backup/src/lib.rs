//! Backup and restore for MedDocs.
//!
//! - [`ArchiveBuilder`] snapshots every patient, file row and payload into a
//!   `MedDocs_Backup_*.zip` archive.
//! - [`ArchiveRestorer`] unpacks an archive and replays it through the
//!   repository facade.
//! - [`BackupLocations`] finds, prunes and sweeps archives on disk.
//! - [`Scheduler`] ties these to startup and periodic maintenance.
//! - [`FileSettings`] persists the backup preferences.

pub mod archive;
pub mod builder;
pub mod error;
pub mod locations;
pub mod restorer;
pub mod scheduler;
pub mod settings;

pub use builder::{ArchiveBuilder, BackupReport};
pub use error::{BackupError, Result, SettingsError};
pub use locations::{BackupInfo, BackupLocations};
pub use restorer::{ArchiveContents, ArchiveRestorer, RestoreReport};
pub use scheduler::{JobOutcome, Scheduler, StartupReport};
pub use settings::FileSettings;
