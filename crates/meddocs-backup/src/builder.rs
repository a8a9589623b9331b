//! [`ArchiveBuilder`] — snapshot the store and its payloads into a ZIP.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use chrono::{DateTime, Utc};
use meddocs_core::{codec, patient::now_millis, settings::SettingsStore, store::RecordStore};
use meddocs_repo::Repository;
use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::{
  BackupError, Result,
  archive::{
    self, BACKUP_VERSION, FILES_DIR, FILES_METADATA_FILE, FileEntry, MAX_BACKUPS_TO_KEEP,
    METADATA_FILE, Manifest, PARTIAL_SUFFIX, PATIENTS_FILE,
  },
  locations::{BUILD_WORK_PREFIX, BackupLocations},
};

/// Outcome of a successful build.
#[derive(Debug, Clone, Serialize)]
pub struct BackupReport {
  pub path:          PathBuf,
  pub manifest:      Manifest,
  /// Files whose payload could not be staged.
  pub skipped_files: usize,
  /// Written somewhere other than the primary directory.
  pub used_fallback: bool,
  /// Old archives deleted from the primary directory afterwards.
  pub pruned:        usize,
}

pub struct ArchiveBuilder<S, T> {
  repo:        Arc<Repository<S>>,
  settings:    Arc<T>,
  locations:   BackupLocations,
  app_version: String,
  device_name: String,
}

impl<S: RecordStore, T: SettingsStore> ArchiveBuilder<S, T> {
  pub fn new(repo: Arc<Repository<S>>, settings: Arc<T>, locations: BackupLocations) -> Self {
    Self {
      repo,
      settings,
      locations,
      app_version: env!("CARGO_PKG_VERSION").to_owned(),
      device_name: String::from("unknown"),
    }
  }

  pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
    self.device_name = name.into();
    self
  }

  pub fn with_app_version(mut self, version: impl Into<String>) -> Self {
    self.app_version = version.into();
    self
  }

  pub fn repo(&self) -> &Arc<Repository<S>> { &self.repo }

  pub fn settings(&self) -> &Arc<T> { &self.settings }

  pub fn locations(&self) -> &BackupLocations { &self.locations }

  pub async fn build(&self) -> Result<BackupReport> { self.build_at(now_millis()).await }

  /// Build an archive stamped `now`, record it as the last backup and prune
  /// the primary directory.
  pub async fn build_at(&self, now: DateTime<Utc>) -> Result<BackupReport> {
    let work = self.locations.new_work_dir(BUILD_WORK_PREFIX).await?;
    debug!(work = %work.path().display(), "staging backup");

    let (manifest, skipped_files) = self.stage(work.path(), now).await?;
    let (path, used_fallback) = self.write_archive(work.path(), now).await?;
    drop(work);

    self
      .settings
      .set_last_backup_time(now)
      .map_err(BackupError::settings)?;
    let pruned = match self.locations.prune_primary(MAX_BACKUPS_TO_KEEP).await {
      Ok(deleted) => deleted.len(),
      Err(e) => {
        warn!(error = %e, "cannot prune old backups");
        0
      }
    };

    info!(
      path = %path.display(),
      patients = manifest.patient_count,
      files = manifest.file_count,
      skipped_files,
      used_fallback,
      "backup created"
    );
    Ok(BackupReport { path, manifest, skipped_files, used_fallback, pruned })
  }

  /// Copy payloads and write the three documents into `work`.
  async fn stage(&self, work: &Path, now: DateTime<Utc>) -> Result<(Manifest, usize)> {
    let files_dir = work.join(FILES_DIR);
    fs::create_dir_all(&files_dir)
      .await
      .map_err(BackupError::io(&files_dir))?;

    let patients = self.repo.list_patients(None).await?;
    let mut entries = Vec::new();
    let mut skipped = 0;

    for patient in &patients {
      for file in self.repo.list_files(patient.id).await? {
        let Some(source) = file.local_path() else {
          warn!(file_id = file.id, uri = %file.uri, "payload is not a local file, not archived");
          skipped += 1;
          continue;
        };
        let staged_name = FileEntry::staged_name(&file);
        match fs::copy(&source, files_dir.join(&staged_name)).await {
          Ok(_) => entries.push(FileEntry { file, backup_file_name: staged_name }),
          Err(e) => {
            warn!(file_id = file.id, path = %source.display(), error = %e, "payload unavailable, not archived");
            skipped += 1;
          }
        }
      }
    }

    if entries.is_empty() {
      return Err(BackupError::NoFiles);
    }

    let manifest = Manifest {
      version:       BACKUP_VERSION,
      app_version:   self.app_version.clone(),
      created_at:    now,
      patient_count: patients.len(),
      file_count:    entries.len(),
      device_name:   self.device_name.clone(),
    };

    write_document(work, METADATA_FILE, &manifest).await?;
    write_document(work, PATIENTS_FILE, &patients).await?;
    write_document(work, FILES_METADATA_FILE, &entries).await?;
    Ok((manifest, skipped))
  }

  /// Try each candidate directory in turn.
  async fn write_archive(&self, work: &Path, now: DateTime<Utc>) -> Result<(PathBuf, bool)> {
    let mut tried = 0;
    for (index, dir) in self.locations.candidates().enumerate() {
      tried += 1;
      match write_into(work, dir, now).await {
        Ok(path) => return Ok((path, index > 0)),
        Err(e) => warn!(dir = %dir.display(), error = %e, "cannot write backup here"),
      }
    }
    Err(BackupError::OutputUnavailable { tried })
  }
}

async fn write_document<D: Serialize + ?Sized>(work: &Path, name: &str, doc: &D) -> Result<()> {
  let path = work.join(name);
  fs::write(&path, codec::encode(doc)?)
    .await
    .map_err(BackupError::io(&path))
}

/// Zip `work` into a fresh archive in `dir`, via a `.partial` name.
async fn write_into(work: &Path, dir: &Path, now: DateTime<Utc>) -> Result<PathBuf> {
  fs::create_dir_all(dir).await.map_err(BackupError::io(dir))?;

  let mut attempt = 0;
  let target = loop {
    let candidate = dir.join(archive::archive_file_name(now, attempt));
    if !fs::try_exists(&candidate).await.unwrap_or(false) {
      break candidate;
    }
    attempt += 1;
  };
  let mut partial = target.clone().into_os_string();
  partial.push(PARTIAL_SUFFIX);
  let partial = PathBuf::from(partial);

  let (src, dest) = (work.to_path_buf(), partial.clone());
  let result = match tokio::task::spawn_blocking(move || archive::write_zip(&src, &dest)).await {
    Ok(Ok(_)) => fs::rename(&partial, &target)
      .await
      .map_err(BackupError::io(&target)),
    Ok(Err(e)) => Err(e),
    Err(e) => Err(e.into()),
  };

  if let Err(e) = result {
    let _ = fs::remove_file(&partial).await;
    return Err(e);
  }
  Ok(target)
}
