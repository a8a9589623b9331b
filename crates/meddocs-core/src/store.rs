//! The `RecordStore` trait and supporting types.
//!
//! The trait is implemented by storage backends (`meddocs-store-sqlite`) and
//! by the in-memory [`crate::memory::MemoryStore`]. Higher layers (the
//! repository facade, the backup engine) depend on this abstraction, not on
//! any concrete backend.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
  file::AttachedFile,
  patient::{Patient, PatientStatus},
  recycle::{BinSnapshot, ItemKind, RestoredItem, Tombstone},
};

/// Aggregate counters for dashboards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
  pub files:      u64,
  pub active:     u64,
  pub discharged: u64,
  pub bin_items:  u64,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a MedDocs record store backend.
///
/// Ids are assigned by the store on insert when the entity carries id `0`.
/// Deletes are idempotent and report whether a row was removed. Patient
/// deletion cascades to the patient's file rows; payload bytes on disk are
/// never touched at this layer.
///
/// Ordering contract:
/// - patients: Active before Discharged, then by name, then by id;
/// - files and tombstones: newest first.
///
/// All methods return `Send` futures so the trait can be used from
/// multi-threaded async runtimes.
pub trait RecordStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Patients ──────────────────────────────────────────────────────────

  /// Insert a patient and return it with its assigned id. An explicit,
  /// already used id is rejected.
  fn insert_patient(
    &self,
    patient: Patient,
  ) -> impl Future<Output = Result<Patient, Self::Error>> + Send + '_;

  /// Overwrite the row with `patient.id`. Errors if no such row exists.
  fn update_patient(
    &self,
    patient: Patient,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Delete a patient and, by cascade, its file rows. Returns `false` if
  /// there was nothing to delete.
  fn delete_patient(
    &self,
    id: i64,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn get_patient(
    &self,
    id: i64,
  ) -> impl Future<Output = Result<Option<Patient>, Self::Error>> + Send + '_;

  /// List patients, optionally restricted to one status.
  fn list_patients(
    &self,
    status: Option<PatientStatus>,
  ) -> impl Future<Output = Result<Vec<Patient>, Self::Error>> + Send + '_;

  /// Case-insensitive substring search over name, bed label and patient
  /// identifier.
  fn search_patients(
    &self,
    query: String,
  ) -> impl Future<Output = Result<Vec<Patient>, Self::Error>> + Send + '_;

  // ── Files ─────────────────────────────────────────────────────────────

  /// Insert a file row. The owning patient must exist.
  fn insert_file(
    &self,
    file: AttachedFile,
  ) -> impl Future<Output = Result<AttachedFile, Self::Error>> + Send + '_;

  /// Overwrite the row with `file.id`. Errors if no such row exists.
  fn update_file(
    &self,
    file: AttachedFile,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn delete_file(
    &self,
    id: i64,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn get_file(
    &self,
    id: i64,
  ) -> impl Future<Output = Result<Option<AttachedFile>, Self::Error>> + Send + '_;

  fn list_files(
    &self,
    patient_id: i64,
  ) -> impl Future<Output = Result<Vec<AttachedFile>, Self::Error>> + Send + '_;

  /// Like [`Self::list_files`], restricted to `image/*` MIME types.
  fn list_image_files(
    &self,
    patient_id: i64,
  ) -> impl Future<Output = Result<Vec<AttachedFile>, Self::Error>> + Send + '_;

  fn counts(
    &self,
  ) -> impl Future<Output = Result<StoreCounts, Self::Error>> + Send + '_;

  // ── Recycle bin ───────────────────────────────────────────────────────

  /// Atomically insert `tombstone` and delete the row it describes.
  ///
  /// Returns `None`, writing nothing, when that row no longer exists.
  fn move_to_bin(
    &self,
    tombstone: Tombstone,
  ) -> impl Future<Output = Result<Option<Tombstone>, Self::Error>> + Send + '_;

  /// Atomically insert the entities of `snapshot` as new rows and delete the
  /// tombstone. Files of a patient snapshot are re-pointed at the patient's
  /// new id.
  ///
  /// Returns `None`, writing nothing, when the tombstone no longer exists.
  fn restore_from_bin(
    &self,
    tombstone_id: i64,
    snapshot: BinSnapshot,
  ) -> impl Future<Output = Result<Option<RestoredItem>, Self::Error>> + Send + '_;

  fn get_tombstone(
    &self,
    id: i64,
  ) -> impl Future<Output = Result<Option<Tombstone>, Self::Error>> + Send + '_;

  fn find_tombstone(
    &self,
    kind: ItemKind,
    original_id: i64,
  ) -> impl Future<Output = Result<Option<Tombstone>, Self::Error>> + Send + '_;

  fn list_tombstones(
    &self,
  ) -> impl Future<Output = Result<Vec<Tombstone>, Self::Error>> + Send + '_;

  /// Tombstones with `expires_at <= now`.
  fn list_expired_tombstones(
    &self,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<Tombstone>, Self::Error>> + Send + '_;

  fn delete_tombstone(
    &self,
    id: i64,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;
}
