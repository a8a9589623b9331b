//! Where archives are written and found, and where work directories live.

use std::{
  io::ErrorKind,
  path::{Path, PathBuf},
  time::SystemTime,
};

use chrono::{DateTime, Duration, Utc};
use meddocs_core::{codec, patient::now_millis};
use serde::Serialize;
use tempfile::TempDir;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::{
  BackupError, Result,
  archive::{self, ARCHIVE_PREFIX, Manifest, METADATA_FILE, PARTIAL_SUFFIX},
};

/// Prefix of the staging directories used while building an archive.
pub const BUILD_WORK_PREFIX: &str = "backup_temp_";
/// Prefix of the directories an archive is unpacked into.
pub const RESTORE_WORK_PREFIX: &str = "restore_extract_";

/// An archive found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupInfo {
  pub path:     PathBuf,
  pub name:     String,
  pub size:     u64,
  pub modified: DateTime<Utc>,
  /// Only present when requested; see [`BackupLocations::load_manifest`].
  pub manifest: Option<Manifest>,
}

/// Ordered candidate output directories plus the work-directory root.
#[derive(Debug, Clone)]
pub struct BackupLocations {
  primary:   PathBuf,
  fallbacks: Vec<PathBuf>,
  work_root: PathBuf,
}

impl BackupLocations {
  pub fn new(primary: impl Into<PathBuf>, work_root: impl Into<PathBuf>) -> Self {
    Self {
      primary:   primary.into(),
      fallbacks: Vec::new(),
      work_root: work_root.into(),
    }
  }

  pub fn with_fallbacks(mut self, fallbacks: impl IntoIterator<Item = PathBuf>) -> Self {
    self.fallbacks = fallbacks
      .into_iter()
      .filter(|p| *p != self.primary)
      .collect();
    self
  }

  pub fn primary(&self) -> &Path { &self.primary }

  pub fn work_root(&self) -> &Path { &self.work_root }

  /// Primary first, then each fallback in order.
  pub fn candidates(&self) -> impl Iterator<Item = &Path> {
    std::iter::once(self.primary.as_path()).chain(self.fallbacks.iter().map(PathBuf::as_path))
  }

  /// Create a fresh, uniquely named work directory, removed on drop.
  pub async fn new_work_dir(&self, prefix: &str) -> Result<TempDir> {
    fs::create_dir_all(&self.work_root)
      .await
      .map_err(BackupError::io(&self.work_root))?;
    let prefix = format!("{prefix}{}_", now_millis().timestamp_millis());
    tempfile::Builder::new()
      .prefix(&prefix)
      .tempdir_in(&self.work_root)
      .map_err(BackupError::io(&self.work_root))
  }

  // ─── Listing ───────────────────────────────────────────────────────────────

  async fn archives_in(dir: &Path) -> Result<Vec<BackupInfo>> {
    let mut read = match fs::read_dir(dir).await {
      Ok(read) => read,
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => {
        warn!(dir = %dir.display(), error = %e, "cannot list backup directory");
        return Ok(Vec::new());
      }
    };

    let mut found = Vec::new();
    while let Some(entry) = read.next_entry().await.map_err(BackupError::io(dir))? {
      let name = entry.file_name().to_string_lossy().into_owned();
      if !archive::is_archive_name(&name) {
        continue;
      }
      let meta = match entry.metadata().await {
        Ok(meta) if meta.is_file() => meta,
        Ok(_) => continue,
        Err(e) => {
          warn!(name = %name, error = %e, "cannot stat backup archive");
          continue;
        }
      };
      found.push(BackupInfo {
        path: entry.path(),
        name,
        size: meta.len(),
        modified: meta.modified().map(DateTime::from).unwrap_or_default(),
        manifest: None,
      });
    }
    Ok(found)
  }

  /// Archives across every candidate directory, newest first.
  pub async fn list_backups(&self) -> Result<Vec<BackupInfo>> {
    let mut all = Vec::new();
    for dir in self.candidates() {
      all.extend(Self::archives_in(dir).await?);
    }
    all.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.name.cmp(&a.name)));
    Ok(all)
  }

  pub async fn latest_backup(&self) -> Result<Option<BackupInfo>> {
    Ok(self.list_backups().await?.into_iter().next())
  }

  pub async fn has_backup(&self) -> Result<bool> {
    Ok(self.latest_backup().await?.is_some())
  }

  /// Read only the manifest entry of an archive.
  pub async fn load_manifest(&self, path: &Path) -> Result<Manifest> {
    let owned = path.to_path_buf();
    let text = tokio::task::spawn_blocking(move || archive::read_entry(&owned, METADATA_FILE))
      .await??
      .ok_or(BackupError::MissingManifest)?;
    codec::decode(&text).map_err(BackupError::CorruptManifest)
  }

  /// [`Self::list_backups`] with manifests attached where readable.
  pub async fn list_backups_with_manifests(&self) -> Result<Vec<BackupInfo>> {
    let mut all = self.list_backups().await?;
    for info in &mut all {
      match self.load_manifest(&info.path).await {
        Ok(manifest) => info.manifest = Some(manifest),
        Err(e) => warn!(name = %info.name, error = %e, "cannot read backup manifest"),
      }
    }
    Ok(all)
  }

  // ─── Removal ───────────────────────────────────────────────────────────────

  pub async fn delete_backup(&self, path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
      Ok(()) => {
        info!(path = %path.display(), "deleted backup");
        Ok(true)
      }
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
      Err(e) => Err(BackupError::io(path)(e)),
    }
  }

  /// Keep the `keep` newest archives in the primary directory (by name,
  /// which sorts by creation time) and delete the rest.
  pub async fn prune_primary(&self, keep: usize) -> Result<Vec<PathBuf>> {
    let mut archives = Self::archives_in(&self.primary).await?;
    archives.sort_by(|a, b| b.name.cmp(&a.name));

    let mut deleted = Vec::new();
    for old in archives.into_iter().skip(keep) {
      match self.delete_backup(&old.path).await {
        Ok(true) => deleted.push(old.path),
        Ok(false) => {}
        Err(e) => warn!(name = %old.name, error = %e, "cannot prune old backup"),
      }
    }
    if !deleted.is_empty() {
      debug!(count = deleted.len(), keep, "pruned old backups");
    }
    Ok(deleted)
  }

  /// Remove work directories and partial archives older than `older_than`,
  /// left behind by runs that crashed.
  pub async fn sweep_stale_work_dirs(
    &self,
    now: DateTime<Utc>,
    older_than: Duration,
  ) -> Result<usize> {
    let cutoff: SystemTime = (now - older_than).into();
    let mut removed = 0;

    type Matcher = fn(&str) -> bool;
    let mut scan = vec![(self.work_root.as_path(), is_work_dir as Matcher)];
    for dir in self.candidates() {
      scan.push((dir, is_partial_archive as Matcher));
    }

    for (dir, is_leftover) in scan {
      let mut read = match fs::read_dir(dir).await {
        Ok(read) => read,
        Err(e) if e.kind() == ErrorKind::NotFound => continue,
        Err(e) => {
          warn!(dir = %dir.display(), error = %e, "cannot scan for leftovers");
          continue;
        }
      };
      while let Some(entry) = read.next_entry().await.map_err(BackupError::io(dir))? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_leftover(&name) {
          continue;
        }
        let Ok(meta) = entry.metadata().await else { continue };
        if meta.modified().is_ok_and(|m| m > cutoff) {
          continue;
        }
        let path = entry.path();
        let result = if meta.is_dir() {
          fs::remove_dir_all(&path).await
        } else {
          fs::remove_file(&path).await
        };
        match result {
          Ok(()) => removed += 1,
          Err(e) => warn!(path = %path.display(), error = %e, "cannot remove stale leftover"),
        }
      }
    }

    if removed > 0 {
      info!(removed, "swept stale backup leftovers");
    }
    Ok(removed)
  }
}

fn is_work_dir(name: &str) -> bool {
  name.starts_with(BUILD_WORK_PREFIX) || name.starts_with(RESTORE_WORK_PREFIX)
}

fn is_partial_archive(name: &str) -> bool {
  name.starts_with(ARCHIVE_PREFIX) && name.ends_with(PARTIAL_SUFFIX)
}

#[cfg(test)]
mod tests {
  use super::*;

  async fn touch(dir: &Path, name: &str) -> PathBuf {
    fs::create_dir_all(dir).await.unwrap();
    let path = dir.join(name);
    fs::write(&path, b"zip").await.unwrap();
    path
  }

  #[tokio::test]
  async fn lists_archives_across_candidates() {
    let root = tempfile::tempdir().unwrap();
    let locations = BackupLocations::new(root.path().join("primary"), root.path().join("work"))
      .with_fallbacks([root.path().join("fallback")]);

    touch(&root.path().join("primary"), "MedDocs_Backup_20240101_000000_000.zip").await;
    touch(&root.path().join("primary"), "unrelated.zip").await;
    touch(&root.path().join("fallback"), "MedDocs_Backup_20240102_000000_000.zip").await;

    let all = locations.list_backups().await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(locations.has_backup().await.unwrap());
  }

  #[tokio::test]
  async fn missing_directories_list_empty() {
    let root = tempfile::tempdir().unwrap();
    let locations = BackupLocations::new(root.path().join("nope"), root.path().join("work"));
    assert!(locations.list_backups().await.unwrap().is_empty());
    assert!(locations.latest_backup().await.unwrap().is_none());
  }

  #[tokio::test]
  async fn prune_keeps_newest_by_name() {
    let root = tempfile::tempdir().unwrap();
    let locations = BackupLocations::new(root.path(), root.path().join("work"));
    for day in 1..=6 {
      touch(root.path(), &format!("MedDocs_Backup_2024010{day}_000000_000.zip")).await;
    }

    let deleted = locations.prune_primary(5).await.unwrap();
    assert_eq!(deleted.len(), 1);
    assert!(deleted[0].ends_with("MedDocs_Backup_20240101_000000_000.zip"));
    assert_eq!(locations.list_backups().await.unwrap().len(), 5);
  }

  #[tokio::test]
  async fn sweep_removes_only_old_leftovers() {
    let root = tempfile::tempdir().unwrap();
    let locations = BackupLocations::new(root.path().join("out"), root.path().join("work"));
    let work_dir = locations.new_work_dir(BUILD_WORK_PREFIX).await.unwrap();
    let work = work_dir.path().to_path_buf();
    let partial = touch(
      &root.path().join("out"),
      "MedDocs_Backup_20240101_000000_000.zip.partial",
    )
    .await;
    let keeper = touch(&root.path().join("work"), "notes.txt").await;

    let fresh = locations.sweep_stale_work_dirs(Utc::now(), Duration::hours(1)).await.unwrap();
    assert_eq!(fresh, 0);

    let later = Utc::now() + Duration::hours(2);
    let removed = locations.sweep_stale_work_dirs(later, Duration::hours(1)).await.unwrap();
    assert_eq!(removed, 2);
    assert!(!work.exists() && !partial.exists());
    assert!(keeper.exists());
  }

  #[tokio::test]
  async fn delete_backup_is_idempotent() {
    let root = tempfile::tempdir().unwrap();
    let locations = BackupLocations::new(root.path(), root.path().join("work"));
    let path = touch(root.path(), "MedDocs_Backup_20240101_000000_000.zip").await;
    assert!(locations.delete_backup(&path).await.unwrap());
    assert!(!locations.delete_backup(&path).await.unwrap());
  }
}
