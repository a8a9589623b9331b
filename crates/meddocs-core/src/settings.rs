//! Persisted backup settings and the `SettingsStore` abstraction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::schedule::{BackupFrequency, is_backup_due};

/// User-facing backup preferences plus bookkeeping written by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
  pub auto_backup_enabled: bool,
  pub frequency:           BackupFrequency,
  #[serde(with = "chrono::serde::ts_milliseconds_option")]
  pub last_backup_time:    Option<DateTime<Utc>>,
  pub first_launch_done:   bool,
}

impl Default for BackupSettings {
  fn default() -> Self {
    Self {
      auto_backup_enabled: true,
      frequency:           BackupFrequency::default(),
      last_backup_time:    None,
      first_launch_done:   false,
    }
  }
}

impl BackupSettings {
  /// Auto-backup is enabled and the configured interval has elapsed.
  pub fn is_backup_due(&self, now: DateTime<Utc>) -> bool {
    self.auto_backup_enabled
      && is_backup_due(now, self.last_backup_time, self.frequency)
  }
}

/// Get/set access to [`BackupSettings`].
///
/// Implementations only need `load` and `save`; the setters are
/// read-modify-write helpers over them.
pub trait SettingsStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn load(&self) -> Result<BackupSettings, Self::Error>;

  fn save(&self, settings: &BackupSettings) -> Result<(), Self::Error>;

  fn set_auto_backup_enabled(&self, enabled: bool) -> Result<(), Self::Error> {
    self.update(|s| s.auto_backup_enabled = enabled)
  }

  fn set_frequency(&self, frequency: BackupFrequency) -> Result<(), Self::Error> {
    self.update(|s| s.frequency = frequency)
  }

  fn set_last_backup_time(&self, at: DateTime<Utc>) -> Result<(), Self::Error> {
    self.update(|s| s.last_backup_time = Some(at))
  }

  fn mark_first_launch_done(&self) -> Result<(), Self::Error> {
    self.update(|s| s.first_launch_done = true)
  }

  fn update(
    &self,
    change: impl FnOnce(&mut BackupSettings),
  ) -> Result<(), Self::Error> {
    let mut settings = self.load()?;
    change(&mut settings);
    self.save(&settings)
  }
}
