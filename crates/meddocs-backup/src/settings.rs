//! [`FileSettings`] — backup settings persisted as a TOML file.

use std::{
  fs,
  io::ErrorKind,
  path::{Path, PathBuf},
};

use meddocs_core::settings::{BackupSettings, SettingsStore};

use crate::error::SettingsError;

/// A [`SettingsStore`] backed by a TOML file. A missing file reads as the
/// defaults; writes go through a temporary file and a rename.
#[derive(Debug, Clone)]
pub struct FileSettings {
  path: PathBuf,
}

impl FileSettings {
  pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into() } }

  pub fn path(&self) -> &Path { &self.path }

  fn io_err(&self) -> impl FnOnce(std::io::Error) -> SettingsError + '_ {
    move |source| SettingsError::Io { path: self.path.clone(), source }
  }
}

impl SettingsStore for FileSettings {
  type Error = SettingsError;

  fn load(&self) -> Result<BackupSettings, SettingsError> {
    match fs::read_to_string(&self.path) {
      Ok(text) => Ok(toml::from_str(&text)?),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(BackupSettings::default()),
      Err(e) => Err(self.io_err()(e)),
    }
  }

  fn save(&self, settings: &BackupSettings) -> Result<(), SettingsError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      fs::create_dir_all(parent).map_err(self.io_err())?;
    }
    let text = toml::to_string_pretty(settings)?;
    let temp = self.path.with_extension("toml.tmp");
    fs::write(&temp, text).map_err(self.io_err())?;
    fs::rename(&temp, &self.path).map_err(self.io_err())
  }
}
