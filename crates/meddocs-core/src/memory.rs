//! In-memory implementations of [`RecordStore`] and [`SettingsStore`].
//!
//! Used as test doubles by the higher layers. They honour the same ordering,
//! cascade and atomicity contract as the SQLite backend; every operation runs
//! under a single lock, so the bin operations are trivially atomic.

use std::{
  collections::BTreeMap,
  sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Utc};

use crate::{
  Error, Result,
  file::AttachedFile,
  patient::{Patient, PatientStatus},
  recycle::{BinSnapshot, ItemKind, RestoredItem, Tombstone},
  settings::{BackupSettings, SettingsStore},
  store::{RecordStore, StoreCounts},
};

// ─── Store ───────────────────────────────────────────────────────────────────

#[derive(Default)]
struct State {
  patients:   BTreeMap<i64, Patient>,
  files:      BTreeMap<i64, AttachedFile>,
  tombstones: BTreeMap<i64, Tombstone>,
  last_ids:   [i64; 3],
}

const PATIENTS: usize = 0;
const FILES: usize = 1;
const TOMBSTONES: usize = 2;

impl State {
  /// Pick the id for a new row, mimicking SQLite `AUTOINCREMENT`.
  fn allocate(&mut self, table: usize, requested: i64) -> i64 {
    let id = if requested == 0 { self.last_ids[table] + 1 } else { requested };
    self.last_ids[table] = self.last_ids[table].max(id);
    id
  }

  fn insert_patient(&mut self, mut patient: Patient) -> Result<Patient> {
    if patient.id != 0 && self.patients.contains_key(&patient.id) {
      return Err(Error::DuplicateId { entity: "patient", id: patient.id });
    }
    patient.id = self.allocate(PATIENTS, patient.id);
    self.patients.insert(patient.id, patient.clone());
    Ok(patient)
  }

  fn insert_file(&mut self, mut file: AttachedFile) -> Result<AttachedFile> {
    if !self.patients.contains_key(&file.patient_id) {
      return Err(Error::PatientNotFound(file.patient_id));
    }
    if file.id != 0 && self.files.contains_key(&file.id) {
      return Err(Error::DuplicateId { entity: "file", id: file.id });
    }
    file.id = self.allocate(FILES, file.id);
    self.files.insert(file.id, file.clone());
    Ok(file)
  }

  fn delete_patient(&mut self, id: i64) -> bool {
    let removed = self.patients.remove(&id).is_some();
    if removed {
      self.files.retain(|_, f| f.patient_id != id);
    }
    removed
  }

  fn files_of(&self, patient_id: i64, images_only: bool) -> Vec<AttachedFile> {
    let mut files: Vec<AttachedFile> = self
      .files
      .values()
      .filter(|f| f.patient_id == patient_id && (!images_only || f.is_image()))
      .cloned()
      .collect();
    files.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    files
  }
}

fn sort_patients(patients: &mut [Patient]) {
  patients.sort_by(|a, b| {
    a.status
      .cmp(&b.status)
      .then_with(|| a.name.cmp(&b.name))
      .then(a.id.cmp(&b.id))
  });
}

fn sort_tombstones(tombstones: &mut [Tombstone]) {
  tombstones.sort_by(|a, b| b.deleted_at.cmp(&a.deleted_at).then(b.id.cmp(&a.id)));
}

/// A [`RecordStore`] held entirely in memory.
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone, Default)]
pub struct MemoryStore {
  state: Arc<Mutex<State>>,
}

impl MemoryStore {
  pub fn new() -> Self { Self::default() }

  fn state(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl RecordStore for MemoryStore {
  type Error = Error;

  // ── Patients ──────────────────────────────────────────────────────────────

  async fn insert_patient(&self, patient: Patient) -> Result<Patient> {
    self.state().insert_patient(patient)
  }

  async fn update_patient(&self, patient: Patient) -> Result<()> {
    let mut state = self.state();
    let slot = state
      .patients
      .get_mut(&patient.id)
      .ok_or(Error::PatientNotFound(patient.id))?;
    *slot = patient;
    Ok(())
  }

  async fn delete_patient(&self, id: i64) -> Result<bool> {
    Ok(self.state().delete_patient(id))
  }

  async fn get_patient(&self, id: i64) -> Result<Option<Patient>> {
    Ok(self.state().patients.get(&id).cloned())
  }

  async fn list_patients(&self, status: Option<PatientStatus>) -> Result<Vec<Patient>> {
    let mut patients: Vec<Patient> = self
      .state()
      .patients
      .values()
      .filter(|p| status.is_none_or(|s| p.status == s))
      .cloned()
      .collect();
    sort_patients(&mut patients);
    Ok(patients)
  }

  async fn search_patients(&self, query: String) -> Result<Vec<Patient>> {
    let mut patients: Vec<Patient> = self
      .state()
      .patients
      .values()
      .filter(|p| p.matches(&query))
      .cloned()
      .collect();
    sort_patients(&mut patients);
    Ok(patients)
  }

  // ── Files ─────────────────────────────────────────────────────────────────

  async fn insert_file(&self, file: AttachedFile) -> Result<AttachedFile> {
    self.state().insert_file(file)
  }

  async fn update_file(&self, file: AttachedFile) -> Result<()> {
    let mut state = self.state();
    if !state.patients.contains_key(&file.patient_id) {
      return Err(Error::PatientNotFound(file.patient_id));
    }
    let slot = state
      .files
      .get_mut(&file.id)
      .ok_or(Error::FileNotFound(file.id))?;
    *slot = file;
    Ok(())
  }

  async fn delete_file(&self, id: i64) -> Result<bool> {
    Ok(self.state().files.remove(&id).is_some())
  }

  async fn get_file(&self, id: i64) -> Result<Option<AttachedFile>> {
    Ok(self.state().files.get(&id).cloned())
  }

  async fn list_files(&self, patient_id: i64) -> Result<Vec<AttachedFile>> {
    Ok(self.state().files_of(patient_id, false))
  }

  async fn list_image_files(&self, patient_id: i64) -> Result<Vec<AttachedFile>> {
    Ok(self.state().files_of(patient_id, true))
  }

  async fn counts(&self) -> Result<StoreCounts> {
    let state = self.state();
    let active = state.patients.values().filter(|p| p.is_active()).count() as u64;
    Ok(StoreCounts {
      files: state.files.len() as u64,
      active,
      discharged: state.patients.len() as u64 - active,
      bin_items: state.tombstones.len() as u64,
    })
  }

  // ── Recycle bin ───────────────────────────────────────────────────────────

  async fn move_to_bin(&self, mut tombstone: Tombstone) -> Result<Option<Tombstone>> {
    let mut state = self.state();
    let removed = match tombstone.kind {
      ItemKind::Patient => state.delete_patient(tombstone.original_id),
      ItemKind::File => state.files.remove(&tombstone.original_id).is_some(),
    };
    if !removed {
      return Ok(None);
    }
    tombstone.id = state.allocate(TOMBSTONES, tombstone.id);
    state.tombstones.insert(tombstone.id, tombstone.clone());
    Ok(Some(tombstone))
  }

  async fn restore_from_bin(
    &self,
    tombstone_id: i64,
    snapshot: BinSnapshot,
  ) -> Result<Option<RestoredItem>> {
    let mut state = self.state();
    if !state.tombstones.contains_key(&tombstone_id) {
      return Ok(None);
    }

    let restored = match snapshot {
      BinSnapshot::Patient(snap) => {
        let patient = state.insert_patient(Patient { id: 0, ..snap.patient })?;
        let mut files = Vec::with_capacity(snap.files.len());
        for file in snap.files {
          let file = AttachedFile { id: 0, patient_id: patient.id, ..file };
          files.push(state.insert_file(file)?);
        }
        RestoredItem::Patient { patient, files }
      }
      BinSnapshot::File(file) => {
        if !state.patients.contains_key(&file.patient_id) {
          return Err(Error::PatientNotFound(file.patient_id));
        }
        RestoredItem::File(state.insert_file(AttachedFile { id: 0, ..file })?)
      }
    };

    state.tombstones.remove(&tombstone_id);
    Ok(Some(restored))
  }

  async fn get_tombstone(&self, id: i64) -> Result<Option<Tombstone>> {
    Ok(self.state().tombstones.get(&id).cloned())
  }

  async fn find_tombstone(&self, kind: ItemKind, original_id: i64) -> Result<Option<Tombstone>> {
    Ok(
      self
        .state()
        .tombstones
        .values()
        .find(|t| t.kind == kind && t.original_id == original_id)
        .cloned(),
    )
  }

  async fn list_tombstones(&self) -> Result<Vec<Tombstone>> {
    let mut tombstones: Vec<Tombstone> = self.state().tombstones.values().cloned().collect();
    sort_tombstones(&mut tombstones);
    Ok(tombstones)
  }

  async fn list_expired_tombstones(&self, now: DateTime<Utc>) -> Result<Vec<Tombstone>> {
    let mut tombstones: Vec<Tombstone> = self
      .state()
      .tombstones
      .values()
      .filter(|t| t.is_expired(now))
      .cloned()
      .collect();
    sort_tombstones(&mut tombstones);
    Ok(tombstones)
  }

  async fn delete_tombstone(&self, id: i64) -> Result<bool> {
    Ok(self.state().tombstones.remove(&id).is_some())
  }
}

// ─── Settings ────────────────────────────────────────────────────────────────

/// A [`SettingsStore`] that forgets everything when dropped.
#[derive(Clone, Default)]
pub struct MemorySettings {
  settings: Arc<Mutex<BackupSettings>>,
}

impl MemorySettings {
  pub fn new(settings: BackupSettings) -> Self {
    Self { settings: Arc::new(Mutex::new(settings)) }
  }
}

impl SettingsStore for MemorySettings {
  type Error = std::convert::Infallible;

  fn load(&self) -> Result<BackupSettings, Self::Error> {
    Ok(self.settings.lock().unwrap_or_else(PoisonError::into_inner).clone())
  }

  fn save(&self, settings: &BackupSettings) -> Result<(), Self::Error> {
    *self.settings.lock().unwrap_or_else(PoisonError::into_inner) = settings.clone();
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::recycle::PatientSnapshot;

  fn named(name: &str, status: PatientStatus) -> Patient {
    let mut p = Patient::new(name, "1");
    p.status = status;
    p
  }

  #[tokio::test]
  async fn ids_are_assigned_and_explicit_duplicates_rejected() {
    let s = MemoryStore::new();
    let a = s.insert_patient(Patient::new("A", "1")).await.unwrap();
    let b = s.insert_patient(Patient::new("B", "2")).await.unwrap();
    assert_eq!((a.id, b.id), (1, 2));

    let dup = Patient { id: a.id, ..Patient::new("C", "3") };
    assert!(matches!(
      s.insert_patient(dup).await,
      Err(Error::DuplicateId { entity: "patient", id: 1 })
    ));
  }

  #[tokio::test]
  async fn active_patients_come_first() {
    let s = MemoryStore::new();
    s.insert_patient(named("Zed", PatientStatus::Active)).await.unwrap();
    s.insert_patient(named("Amy", PatientStatus::Discharged)).await.unwrap();
    s.insert_patient(named("Bob", PatientStatus::Active)).await.unwrap();

    let names: Vec<String> = s
      .list_patients(None)
      .await
      .unwrap()
      .into_iter()
      .map(|p| p.name)
      .collect();
    assert_eq!(names, ["Bob", "Zed", "Amy"]);

    let discharged = s.list_patients(Some(PatientStatus::Discharged)).await.unwrap();
    assert_eq!(discharged.len(), 1);
  }

  #[tokio::test]
  async fn file_insert_requires_patient() {
    let s = MemoryStore::new();
    let file = AttachedFile::new(99, "/x", "text/plain", "x", 1);
    assert!(matches!(s.insert_file(file).await, Err(Error::PatientNotFound(99))));
  }

  #[tokio::test]
  async fn bin_round_trip_reassigns_ids() {
    let s = MemoryStore::new();
    let p = s.insert_patient(Patient::new("A", "1")).await.unwrap();
    let f = s
      .insert_file(AttachedFile::new(p.id, "/a", "image/png", "a.png", 3))
      .await
      .unwrap();

    let snapshot = BinSnapshot::Patient(PatientSnapshot { patient: p.clone(), files: vec![f] });
    let t = Tombstone::new(&snapshot, Utc::now(), 7).unwrap();
    let t = s.move_to_bin(t).await.unwrap().unwrap();
    assert!(s.get_patient(p.id).await.unwrap().is_none());
    assert_eq!(s.counts().await.unwrap().files, 0);

    let restored = s.restore_from_bin(t.id, snapshot).await.unwrap().unwrap();
    let RestoredItem::Patient { patient, files } = restored else {
      panic!("expected a patient");
    };
    assert_ne!(patient.id, p.id);
    assert_eq!(files[0].patient_id, patient.id);
    assert!(s.list_tombstones().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn move_to_bin_of_missing_row_writes_nothing() {
    let s = MemoryStore::new();
    let mut ghost = Patient::new("Ghost", "0");
    ghost.id = 42;
    let snapshot = BinSnapshot::Patient(PatientSnapshot { patient: ghost, files: vec![] });
    let t = Tombstone::new(&snapshot, Utc::now(), 7).unwrap();
    assert!(s.move_to_bin(t).await.unwrap().is_none());
    assert_eq!(s.counts().await.unwrap().bin_items, 0);
  }

  #[test]
  fn memory_settings_round_trip() {
    let settings = MemorySettings::default();
    assert!(settings.load().unwrap().auto_backup_enabled);
    settings.mark_first_launch_done().unwrap();
    assert!(settings.load().unwrap().first_launch_done);
  }
}
