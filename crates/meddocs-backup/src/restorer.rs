//! [`ArchiveRestorer`] — unpack an archive and replay it into the store.
//!
//! Restoring is split in two so callers can inspect what an archive holds
//! before anything is written: [`ArchiveRestorer::read_archive`] unpacks and
//! parses, [`ArchiveRestorer::replay`] inserts.

use std::{
  collections::HashMap,
  fs::File,
  io::{ErrorKind, Read, Seek},
  path::{Component, Path, PathBuf},
  sync::Arc,
};

use meddocs_core::{
  codec, file::AttachedFile, patient::Patient, settings::SettingsStore, store::RecordStore,
};
use meddocs_repo::Repository;
use serde::{Serialize, de::DeserializeOwned};
use tempfile::TempDir;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::{
  BackupError, Result,
  archive::{
    self, BACKUP_VERSION, FILES_DIR, FILES_METADATA_FILE, FileEntry, METADATA_FILE, Manifest,
    PATIENTS_FILE,
  },
  locations::{BackupLocations, RESTORE_WORK_PREFIX},
};

/// A parsed archive, still unpacked on disk.
///
/// The extraction directory is removed when this value is dropped.
#[derive(Debug)]
pub struct ArchiveContents {
  pub manifest:         Manifest,
  pub patients:         Vec<Patient>,
  pub files:            Vec<FileEntry>,
  /// Malformed patient entries that were dropped while parsing.
  pub invalid_patients: usize,
  /// Malformed file entries that were dropped while parsing.
  pub invalid_files:    usize,
  work:                 TempDir,
}

impl ArchiveContents {
  /// Where the payload of `entry` was unpacked, if the archive carries one
  /// under a well-formed name.
  pub fn payload_path(&self, entry: &FileEntry) -> Option<PathBuf> {
    let name = Path::new(&entry.backup_file_name);
    let mut components = name.components();
    match (components.next(), components.next()) {
      (Some(Component::Normal(_)), None) => Some(self.work.path().join(FILES_DIR).join(name)),
      _ => None,
    }
  }
}

/// Counts from a completed replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
  pub manifest:          Manifest,
  pub patients_restored: usize,
  pub files_restored:    usize,
  pub patients_skipped:  usize,
  pub files_skipped:     usize,
}

pub struct ArchiveRestorer<S, T> {
  repo:      Arc<Repository<S>>,
  settings:  Arc<T>,
  locations: BackupLocations,
}

impl<S: RecordStore, T: SettingsStore> ArchiveRestorer<S, T> {
  pub fn new(repo: Arc<Repository<S>>, settings: Arc<T>, locations: BackupLocations) -> Self {
    Self { repo, settings, locations }
  }

  /// [`Self::read_archive`] followed by [`Self::replay`].
  pub async fn restore(&self, path: &Path, clear_existing: bool) -> Result<RestoreReport> {
    let contents = self.read_archive(path).await?;
    self.replay(&contents, clear_existing).await
  }

  /// Like [`Self::restore`], reading the archive from any seekable stream.
  pub async fn restore_from_reader<R>(&self, reader: R, clear_existing: bool) -> Result<RestoreReport>
  where
    R: Read + Seek + Send + 'static,
  {
    let contents = self.read_archive_from(reader).await?;
    self.replay(&contents, clear_existing).await
  }

  // ─── Reading ───────────────────────────────────────────────────────────────

  pub async fn read_archive(&self, path: &Path) -> Result<ArchiveContents> {
    let work = self.locations.new_work_dir(RESTORE_WORK_PREFIX).await?;
    let (src, dest) = (path.to_path_buf(), work.path().to_path_buf());
    let extracted = tokio::task::spawn_blocking(move || {
      let file = File::open(&src).map_err(BackupError::io(&src))?;
      archive::extract_zip(file, &dest)
    })
    .await??;
    debug!(path = %path.display(), extracted, "unpacked archive");
    parse(work).await
  }

  pub async fn read_archive_from<R>(&self, reader: R) -> Result<ArchiveContents>
  where
    R: Read + Seek + Send + 'static,
  {
    let work = self.locations.new_work_dir(RESTORE_WORK_PREFIX).await?;
    let dest = work.path().to_path_buf();
    let extracted =
      tokio::task::spawn_blocking(move || archive::extract_zip(reader, &dest)).await??;
    debug!(extracted, "unpacked archive stream");
    parse(work).await
  }

  // ─── Replay ────────────────────────────────────────────────────────────────

  /// Insert the contents as new rows, optionally wiping the store first.
  ///
  /// Patients get fresh ids; files follow their patient through the id map.
  /// A file whose patient was not restored, or whose payload is absent, is
  /// skipped. Marks the first launch done.
  pub async fn replay(
    &self,
    contents: &ArchiveContents,
    clear_existing: bool,
  ) -> Result<RestoreReport> {
    if clear_existing {
      let existing = self.repo.list_patients(None).await?;
      for patient in &existing {
        self.repo.delete_patient(patient.id).await?;
      }
      info!(count = existing.len(), "cleared existing patients before restore");
    }

    let mut report = RestoreReport {
      manifest:          contents.manifest.clone(),
      patients_restored: 0,
      files_restored:    0,
      patients_skipped:  contents.invalid_patients,
      files_skipped:     contents.invalid_files,
    };

    let mut id_map = HashMap::with_capacity(contents.patients.len());
    for patient in &contents.patients {
      if let Err(e) = patient.validate() {
        warn!(id = patient.id, error = %e, "skipping invalid patient");
        report.patients_skipped += 1;
        continue;
      }
      let restored = match self.repo.add_patient(Patient { id: 0, ..patient.clone() }).await {
        Ok(restored) => restored,
        Err(e) => {
          warn!(id = patient.id, error = %e, "cannot restore patient, skipping it and its files");
          report.patients_skipped += 1;
          continue;
        }
      };
      id_map.insert(patient.id, restored.id);
      report.patients_restored += 1;
    }

    for entry in &contents.files {
      let file = &entry.file;
      let Some(&patient_id) = id_map.get(&file.patient_id) else {
        warn!(file_id = file.id, patient_id = file.patient_id, "owner not restored, skipping file");
        report.files_skipped += 1;
        continue;
      };
      let Some(payload) = contents.payload_path(entry) else {
        warn!(file_id = file.id, "no archived payload, skipping file");
        report.files_skipped += 1;
        continue;
      };
      if !fs::try_exists(&payload).await.unwrap_or(false) {
        warn!(file_id = file.id, payload = %payload.display(), "archived payload missing, skipping file");
        report.files_skipped += 1;
        continue;
      }

      let template = AttachedFile { patient_id, ..file.clone() };
      match self.repo.import_file(template, &payload).await {
        Ok(_) => report.files_restored += 1,
        Err(e) => {
          warn!(file_id = file.id, error = %e, "cannot restore file");
          report.files_skipped += 1;
        }
      }
    }

    self
      .settings
      .mark_first_launch_done()
      .map_err(BackupError::settings)?;

    info!(
      patients = report.patients_restored,
      files = report.files_restored,
      patients_skipped = report.patients_skipped,
      files_skipped = report.files_skipped,
      "restore complete"
    );
    Ok(report)
  }
}

// ─── Parsing ─────────────────────────────────────────────────────────────────

async fn read_document(work: &Path, name: &str) -> Result<Option<Vec<u8>>> {
  let path = work.join(name);
  match fs::read(&path).await {
    Ok(bytes) => Ok(Some(bytes)),
    Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
    Err(e) => Err(BackupError::io(&path)(e)),
  }
}

fn into_text(work: &Path, name: &str, bytes: Vec<u8>) -> Result<String> {
  String::from_utf8(bytes)
    .map_err(|e| BackupError::io(work.join(name))(std::io::Error::new(ErrorKind::InvalidData, e)))
}

/// Decode each element of a JSON array on its own, dropping bad ones.
fn decode_each<D: DeserializeOwned>(
  entry: &'static str,
  values: Vec<serde_json::Value>,
) -> (Vec<D>, usize) {
  let mut good = Vec::with_capacity(values.len());
  let mut bad = 0;
  for (index, value) in values.into_iter().enumerate() {
    match serde_json::from_value(value) {
      Ok(item) => good.push(item),
      Err(e) => {
        warn!(entry, index, error = %e, "skipping malformed archive entry");
        bad += 1;
      }
    }
  }
  (good, bad)
}

async fn parse(work: TempDir) -> Result<ArchiveContents> {
  let manifest_bytes = read_document(work.path(), METADATA_FILE)
    .await?
    .ok_or(BackupError::MissingManifest)?;
  let manifest_text = into_text(work.path(), METADATA_FILE, manifest_bytes)?;
  let manifest: Manifest = codec::decode(&manifest_text).map_err(BackupError::CorruptManifest)?;
  if manifest.version != BACKUP_VERSION {
    debug!(version = manifest.version, "archive written by a different format version");
  }

  let patients_bytes = read_document(work.path(), PATIENTS_FILE)
    .await?
    .ok_or(BackupError::MissingPatients)?;
  let patients_text = into_text(work.path(), PATIENTS_FILE, patients_bytes)?;
  let values = codec::decode(&patients_text)
    .map_err(|source| BackupError::CorruptEntry { entry: PATIENTS_FILE, source })?;
  let (patients, invalid_patients) = decode_each(PATIENTS_FILE, values);

  let (files, invalid_files) = match read_document(work.path(), FILES_METADATA_FILE).await? {
    None => (Vec::new(), 0),
    Some(bytes) => match into_text(work.path(), FILES_METADATA_FILE, bytes) {
      Ok(text) => match codec::decode(&text) {
        Ok(values) => decode_each(FILES_METADATA_FILE, values),
        Err(e) => {
          warn!(error = %e, "file metadata unreadable, restoring patients only");
          (Vec::new(), 0)
        }
      },
      Err(e) => {
        warn!(error = %e, "file metadata is not text, restoring patients only");
        (Vec::new(), 0)
      }
    },
  };

  Ok(ArchiveContents { manifest, patients, files, invalid_patients, invalid_files, work })
}
