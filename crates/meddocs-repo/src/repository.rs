//! [`Repository`] — validated CRUD plus the recycle-bin lifecycle.

use std::path::Path;

use chrono::{DateTime, Utc};
use meddocs_core::{
  Error as CoreError,
  file::AttachedFile,
  patient::{Patient, PatientStatus, now_millis},
  recycle::{BinSnapshot, PatientSnapshot, RestoredItem, Tombstone},
  store::{RecordStore, StoreCounts},
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
  Error, Result,
  files::{FileArea, guess_mime},
};

/// What a purge removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
  pub tombstones: usize,
  pub payloads:   usize,
  /// Tombstones left in the bin because a payload could not be removed.
  pub failed:     usize,
}

/// Facade over a [`RecordStore`] and the [`FileArea`] holding its payloads.
#[derive(Clone)]
pub struct Repository<S> {
  store: S,
  files: FileArea,
}

impl<S: RecordStore> Repository<S> {
  pub fn new(store: S, files: FileArea) -> Self { Self { store, files } }

  pub fn store(&self) -> &S { &self.store }

  pub fn file_area(&self) -> &FileArea { &self.files }

  // ─── Patients ──────────────────────────────────────────────────────────────

  pub async fn add_patient(&self, patient: Patient) -> Result<Patient> {
    patient.validate()?;
    let patient = self.store.insert_patient(patient).await.map_err(Error::store)?;
    info!(id = patient.id, "added patient");
    Ok(patient)
  }

  pub async fn update_patient(&self, patient: Patient) -> Result<()> {
    patient.validate()?;
    self.store.update_patient(patient).await.map_err(Error::store)
  }

  pub async fn get_patient(&self, id: i64) -> Result<Option<Patient>> {
    self.store.get_patient(id).await.map_err(Error::store)
  }

  async fn require_patient(&self, id: i64) -> Result<Patient> {
    self.get_patient(id).await?.ok_or(Error::PatientNotFound(id))
  }

  pub async fn list_patients(&self, status: Option<PatientStatus>) -> Result<Vec<Patient>> {
    self.store.list_patients(status).await.map_err(Error::store)
  }

  /// Patients matching `query`; a blank query lists everyone.
  pub async fn search_patients(&self, query: &str) -> Result<Vec<Patient>> {
    let query = query.trim();
    if query.is_empty() {
      return self.list_patients(None).await;
    }
    self
      .store
      .search_patients(query.to_owned())
      .await
      .map_err(Error::store)
  }

  pub async fn counts(&self) -> Result<StoreCounts> {
    self.store.counts().await.map_err(Error::store)
  }

  /// Mark a patient discharged at `at` (default: now). Discharging again
  /// overwrites the date.
  pub async fn discharge_patient(
    &self,
    id: i64,
    at: Option<DateTime<Utc>>,
  ) -> Result<Patient> {
    let mut patient = self.require_patient(id).await?;
    patient.status = PatientStatus::Discharged;
    patient.discharge_date = Some(at.unwrap_or_else(now_millis));
    self.update_patient(patient.clone()).await?;
    info!(id, "discharged patient");
    Ok(patient)
  }

  /// Hard delete, bypassing the bin: removes the row, its file rows and
  /// every payload they referenced.
  pub async fn delete_patient(&self, id: i64) -> Result<bool> {
    let files = self.list_files(id).await?;
    if !self.store.delete_patient(id).await.map_err(Error::store)? {
      return Ok(false);
    }
    for file in &files {
      self.remove_payload(file).await?;
    }
    info!(id, files = files.len(), "deleted patient");
    Ok(true)
  }

  // ─── Files ─────────────────────────────────────────────────────────────────

  pub async fn list_files(&self, patient_id: i64) -> Result<Vec<AttachedFile>> {
    self.store.list_files(patient_id).await.map_err(Error::store)
  }

  pub async fn list_image_files(&self, patient_id: i64) -> Result<Vec<AttachedFile>> {
    self.store.list_image_files(patient_id).await.map_err(Error::store)
  }

  pub async fn get_file(&self, id: i64) -> Result<Option<AttachedFile>> {
    self.store.get_file(id).await.map_err(Error::store)
  }

  /// Copy `source` into the file area and record it against `patient_id`.
  ///
  /// `display_name` defaults to the source file name, `mime_type` to a guess
  /// from the extension.
  pub async fn attach_file(
    &self,
    patient_id: i64,
    source: &Path,
    display_name: Option<&str>,
    mime_type: Option<&str>,
  ) -> Result<AttachedFile> {
    self.require_patient(patient_id).await?;

    let name = match display_name {
      Some(name) => name.to_owned(),
      None => source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default(),
    };
    if name.trim().is_empty() {
      return Err(CoreError::BlankField("file_name").into());
    }

    let file = AttachedFile::new(
      patient_id,
      String::new(),
      mime_type.unwrap_or_else(|| guess_mime(source)),
      name,
      0,
    );
    self.import_file(file, source).await
  }

  /// Copy `source` into the file area and insert `template` pointing at the
  /// copy. The template's id is ignored; its uri and size are replaced.
  ///
  /// The copy is removed again if the row cannot be inserted.
  pub async fn import_file(
    &self,
    template: AttachedFile,
    source: &Path,
  ) -> Result<AttachedFile> {
    let payload = self.files.import(source, &template.file_name).await?;
    let file = AttachedFile {
      id: 0,
      uri: payload.locator(),
      size: payload.size as i64,
      ..template
    };

    match self.store.insert_file(file).await {
      Ok(file) => {
        info!(id = file.id, patient_id = file.patient_id, "attached file");
        Ok(file)
      }
      Err(e) => {
        self.files.remove(&payload.path).await?;
        Err(Error::store(e))
      }
    }
  }

  /// Change the display name only; the payload keeps its name on disk.
  pub async fn rename_file(&self, id: i64, new_name: &str) -> Result<AttachedFile> {
    let new_name = new_name.trim();
    if new_name.is_empty() {
      return Err(CoreError::BlankField("file_name").into());
    }
    let mut file = self.get_file(id).await?.ok_or(Error::FileNotFound(id))?;
    file.file_name = new_name.to_owned();
    self.store.update_file(file.clone()).await.map_err(Error::store)?;
    Ok(file)
  }

  /// Hard delete, bypassing the bin: removes the row and the payload.
  pub async fn delete_file(&self, id: i64) -> Result<bool> {
    let Some(file) = self.get_file(id).await? else {
      return Ok(false);
    };
    if !self.store.delete_file(id).await.map_err(Error::store)? {
      return Ok(false);
    }
    self.remove_payload(&file).await?;
    info!(id, "deleted file");
    Ok(true)
  }

  async fn remove_payload(&self, file: &AttachedFile) -> Result<bool> {
    match file.local_path() {
      Some(path) => self.files.remove(&path).await,
      None => Ok(false),
    }
  }

  // ─── Recycle bin ───────────────────────────────────────────────────────────

  /// Move a patient and its file rows into the bin. Payloads stay on disk
  /// until the tombstone is purged. `None` if the patient is already gone.
  pub async fn soft_delete_patient(
    &self,
    id: i64,
    retention_days: i64,
  ) -> Result<Option<Tombstone>> {
    let Some(patient) = self.get_patient(id).await? else {
      return Ok(None);
    };
    let files = self.list_files(id).await?;
    let snapshot = BinSnapshot::Patient(PatientSnapshot { patient, files });
    self.move_to_bin(&snapshot, retention_days).await
  }

  /// Move a single file row into the bin. `None` if it is already gone.
  pub async fn soft_delete_file(
    &self,
    id: i64,
    retention_days: i64,
  ) -> Result<Option<Tombstone>> {
    let Some(file) = self.get_file(id).await? else {
      return Ok(None);
    };
    self.move_to_bin(&BinSnapshot::File(file), retention_days).await
  }

  async fn move_to_bin(
    &self,
    snapshot: &BinSnapshot,
    retention_days: i64,
  ) -> Result<Option<Tombstone>> {
    let tombstone = Tombstone::new(snapshot, now_millis(), retention_days)?;
    let moved = self.store.move_to_bin(tombstone).await.map_err(Error::store)?;
    if let Some(t) = &moved {
      info!(kind = %t.kind, original_id = t.original_id, expires_at = %t.expires_at, "moved to recycle bin");
    }
    Ok(moved)
  }

  pub async fn list_bin(&self) -> Result<Vec<Tombstone>> {
    self.store.list_tombstones().await.map_err(Error::store)
  }

  pub async fn get_tombstone(&self, id: i64) -> Result<Option<Tombstone>> {
    self.store.get_tombstone(id).await.map_err(Error::store)
  }

  /// Bring a binned item back as new rows.
  ///
  /// For a patient, only files whose payload still exists come back. A
  /// single file without its payload is refused and stays in the bin. A
  /// tombstone that is already gone yields `None`.
  pub async fn restore(&self, tombstone_id: i64) -> Result<Option<RestoredItem>> {
    let Some(tombstone) = self.get_tombstone(tombstone_id).await? else {
      return Ok(None);
    };

    let snapshot = match tombstone.snapshot()? {
      BinSnapshot::Patient(PatientSnapshot { patient, files }) => {
        let mut kept = Vec::with_capacity(files.len());
        for file in files {
          if self.payload_present(&file).await {
            kept.push(file);
          } else {
            warn!(file_id = file.id, uri = %file.uri, "payload missing, not restoring file");
          }
        }
        BinSnapshot::Patient(PatientSnapshot { patient, files: kept })
      }
      BinSnapshot::File(file) => {
        if self.get_patient(file.patient_id).await?.is_none() {
          return Err(Error::OrphanedFile { file_id: file.id, patient_id: file.patient_id });
        }
        if !self.payload_present(&file).await {
          warn!(file_id = file.id, uri = %file.uri, "payload missing, file stays in the bin");
          return Err(Error::MissingPayload { file_id: file.id });
        }
        BinSnapshot::File(file)
      }
    };

    let restored = self
      .store
      .restore_from_bin(tombstone_id, snapshot)
      .await
      .map_err(Error::store)?;
    if restored.is_some() {
      info!(tombstone = tombstone_id, kind = %tombstone.kind, "restored from recycle bin");
    }
    Ok(restored)
  }

  async fn payload_present(&self, file: &AttachedFile) -> bool {
    match file.local_path() {
      Some(path) => self.files.exists(&path).await,
      None => true,
    }
  }

  /// Remove every payload a tombstone references, then the tombstone.
  pub async fn permanently_delete(&self, tombstone_id: i64) -> Result<bool> {
    let Some(tombstone) = self.get_tombstone(tombstone_id).await? else {
      return Ok(false);
    };
    Ok(self.purge(&tombstone).await?.tombstones > 0)
  }

  /// Permanently delete every tombstone with `expires_at <= now`.
  pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<PurgeReport> {
    let expired = self
      .store
      .list_expired_tombstones(now)
      .await
      .map_err(Error::store)?;
    let report = self.purge_all(&expired).await?;
    if report.tombstones > 0 || report.failed > 0 {
      info!(
        tombstones = report.tombstones,
        payloads = report.payloads,
        failed = report.failed,
        "purged expired bin items"
      );
    }
    Ok(report)
  }

  /// Permanently delete everything in the bin.
  pub async fn clear_bin(&self) -> Result<PurgeReport> {
    let all = self.list_bin().await?;
    let report = self.purge_all(&all).await?;
    info!(
      tombstones = report.tombstones,
      payloads = report.payloads,
      failed = report.failed,
      "cleared recycle bin"
    );
    Ok(report)
  }

  /// Purge each tombstone in turn. A tombstone that cannot be purged is
  /// logged, counted as failed and left in the bin.
  async fn purge_all(&self, tombstones: &[Tombstone]) -> Result<PurgeReport> {
    let mut report = PurgeReport::default();
    for tombstone in tombstones {
      match self.purge(tombstone).await {
        Ok(r) => {
          report.tombstones += r.tombstones;
          report.payloads += r.payloads;
        }
        Err(e) => {
          warn!(tombstone = tombstone.id, error = %e, "cannot purge bin item, leaving it in place");
          report.failed += 1;
        }
      }
    }
    Ok(report)
  }

  /// Remove the payloads of one tombstone, then the tombstone itself. The
  /// row stays when any payload is still on disk.
  async fn purge(&self, tombstone: &Tombstone) -> Result<PurgeReport> {
    let mut report = PurgeReport::default();
    match tombstone.snapshot() {
      Ok(snapshot) => {
        for path in snapshot.payload_paths() {
          if self.files.remove(&path).await? {
            report.payloads += 1;
          }
        }
      }
      Err(e) => {
        warn!(tombstone = tombstone.id, error = %e, "undecodable snapshot, payloads left on disk");
      }
    }
    if self
      .store
      .delete_tombstone(tombstone.id)
      .await
      .map_err(Error::store)?
    {
      report.tombstones = 1;
    }
    debug!(tombstone = tombstone.id, payloads = report.payloads, "purged tombstone");
    Ok(report)
  }
}
