//! [`Scheduler`] — the maintenance jobs run at startup and periodically.

use chrono::{DateTime, Duration, Utc};
use meddocs_core::{settings::SettingsStore, store::RecordStore};
use meddocs_repo::PurgeReport;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::{
  BackupError, Result,
  builder::{ArchiveBuilder, BackupReport},
  restorer::{ArchiveRestorer, RestoreReport},
};

/// Work directories younger than this many hours are assumed to belong to
/// a live run.
pub const STALE_WORK_AGE_HOURS: i64 = 1;

/// Result of a periodic run, mapped by the host onto its own job status.
#[derive(Debug)]
pub enum JobOutcome {
  Completed(BackupReport),
  /// Nothing to do: disabled, not yet due, or no files to archive.
  Skipped,
  /// The backup failed; run again later.
  Retry,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StartupReport {
  pub purged: PurgeReport,
  pub swept:  usize,
}

pub struct Scheduler<S, T> {
  builder:  ArchiveBuilder<S, T>,
  restorer: ArchiveRestorer<S, T>,
}

impl<S: RecordStore, T: SettingsStore> Scheduler<S, T> {
  pub fn new(builder: ArchiveBuilder<S, T>, restorer: ArchiveRestorer<S, T>) -> Self {
    Self { builder, restorer }
  }

  pub fn builder(&self) -> &ArchiveBuilder<S, T> { &self.builder }

  pub fn restorer(&self) -> &ArchiveRestorer<S, T> { &self.restorer }

  /// Purge expired bin items and sweep leftovers of crashed runs.
  pub async fn on_startup(&self, now: DateTime<Utc>) -> Result<StartupReport> {
    let purged = self.builder.repo().purge_expired(now).await?;
    let swept = self
      .builder
      .locations()
      .sweep_stale_work_dirs(now, Duration::hours(STALE_WORK_AGE_HOURS))
      .await?;
    Ok(StartupReport { purged, swept })
  }

  /// Build an archive if auto-backup is on and one is due. Never fails; a
  /// failed build asks to be retried.
  pub async fn run_periodic(&self, now: DateTime<Utc>) -> JobOutcome {
    let settings = match self.builder.settings().load() {
      Ok(settings) => settings,
      Err(e) => {
        error!(error = %e, "cannot load backup settings");
        return JobOutcome::Retry;
      }
    };
    if !settings.is_backup_due(now) {
      debug!(
        enabled = settings.auto_backup_enabled,
        frequency = %settings.frequency,
        "backup not due"
      );
      return JobOutcome::Skipped;
    }

    match self.builder.build_at(now).await {
      Ok(report) => JobOutcome::Completed(report),
      Err(BackupError::NoFiles) => {
        info!("no attached files, skipping scheduled backup");
        JobOutcome::Skipped
      }
      Err(e) => {
        error!(error = %e, "scheduled backup failed");
        JobOutcome::Retry
      }
    }
  }

  /// On the very first launch, with an empty store and an archive on disk,
  /// restore the newest archive. The first launch is marked done whatever
  /// happens.
  pub async fn auto_restore_on_first_launch(&self) -> Result<Option<RestoreReport>> {
    let settings = self
      .builder
      .settings()
      .load()
      .map_err(BackupError::settings)?;
    if settings.first_launch_done {
      return Ok(None);
    }

    let result = self.first_launch_restore().await;
    self
      .builder
      .settings()
      .mark_first_launch_done()
      .map_err(BackupError::settings)?;
    result
  }

  async fn first_launch_restore(&self) -> Result<Option<RestoreReport>> {
    let counts = self.builder.repo().counts().await?;
    if counts.active + counts.discharged > 0 {
      debug!("store not empty, no first-launch restore");
      return Ok(None);
    }
    let Some(latest) = self.builder.locations().latest_backup().await? else {
      return Ok(None);
    };
    info!(path = %latest.path.display(), "restoring newest backup on first launch");
    self.restorer.restore(&latest.path, false).await.map(Some)
  }
}
