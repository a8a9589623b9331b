//! Recycle-bin tombstones.
//!
//! Soft-deleting an entity replaces its row with a tombstone holding a
//! self-contained snapshot. The snapshot is encoded with [`crate::codec`], so
//! it needs no foreign-key validity and outlives the rows it describes.

use std::{fmt, path::PathBuf, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result, codec, file::AttachedFile, patient::Patient};

/// Retention window applied when the caller does not choose one.
pub const DEFAULT_RETENTION_DAYS: i64 = 7;

// ─── Kind ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
  Patient,
  File,
}

impl ItemKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Patient => "patient",
      Self::File => "file",
    }
  }
}

impl fmt::Display for ItemKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ItemKind {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "patient" => Ok(Self::Patient),
      "file" => Ok(Self::File),
      other => Err(Error::UnknownItemKind(other.to_owned())),
    }
  }
}

// ─── Snapshot ────────────────────────────────────────────────────────────────

/// A binned patient together with the files attached at deletion time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientSnapshot {
  pub patient: Patient,
  #[serde(default)]
  pub files:   Vec<AttachedFile>,
}

/// Everything needed to reconstruct a soft-deleted entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "itemType", content = "item", rename_all = "lowercase")]
pub enum BinSnapshot {
  Patient(PatientSnapshot),
  File(AttachedFile),
}

impl BinSnapshot {
  pub fn kind(&self) -> ItemKind {
    match self {
      Self::Patient(_) => ItemKind::Patient,
      Self::File(_) => ItemKind::File,
    }
  }

  pub fn original_id(&self) -> i64 {
    match self {
      Self::Patient(s) => s.patient.id,
      Self::File(f) => f.id,
    }
  }

  /// Patient name or file name, cached on the tombstone for listings.
  pub fn label(&self) -> &str {
    match self {
      Self::Patient(s) => &s.patient.name,
      Self::File(f) => &f.file_name,
    }
  }

  /// Local paths of every payload this snapshot keeps alive.
  pub fn payload_paths(&self) -> Vec<PathBuf> {
    match self {
      Self::Patient(s) => s.files.iter().filter_map(AttachedFile::local_path).collect(),
      Self::File(f) => f.local_path().into_iter().collect(),
    }
  }
}

// ─── Tombstone ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
  /// Store-assigned id; `0` until inserted.
  pub id:          i64,
  pub kind:        ItemKind,
  pub original_id: i64,
  /// [`BinSnapshot`] encoded with [`crate::codec`].
  pub item_data:   String,
  pub label:       String,
  pub deleted_at:  DateTime<Utc>,
  /// Always strictly after `deleted_at`.
  pub expires_at:  DateTime<Utc>,
}

impl Tombstone {
  /// Encode `snapshot` into an uninserted tombstone expiring
  /// `retention_days` after `deleted_at`.
  pub fn new(
    snapshot: &BinSnapshot,
    deleted_at: DateTime<Utc>,
    retention_days: i64,
  ) -> Result<Self> {
    if retention_days < 1 {
      return Err(Error::InvalidRetention(retention_days));
    }
    let expires_at = Duration::try_days(retention_days)
      .and_then(|window| deleted_at.checked_add_signed(window))
      .ok_or(Error::InvalidRetention(retention_days))?;
    Ok(Self {
      id: 0,
      kind: snapshot.kind(),
      original_id: snapshot.original_id(),
      item_data: codec::encode(snapshot)?,
      label: snapshot.label().to_owned(),
      deleted_at,
      expires_at,
    })
  }

  pub fn snapshot(&self) -> Result<BinSnapshot> { codec::decode(&self.item_data) }

  pub fn is_expired(&self, now: DateTime<Utc>) -> bool { self.expires_at <= now }
}

/// What [`crate::store::RecordStore::restore_from_bin`] put back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoredItem {
  Patient {
    patient: Patient,
    files:   Vec<AttachedFile>,
  },
  File(AttachedFile),
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::patient::now_millis;

  fn patient_snapshot() -> BinSnapshot {
    let mut patient = Patient::new("John Doe", "3A");
    patient.id = 11;
    let mut file = AttachedFile::new(11, "file:///f/1_xray.png", "image/png", "xray.png", 5);
    file.id = 4;
    BinSnapshot::Patient(PatientSnapshot { patient, files: vec![file] })
  }

  #[test]
  fn tombstone_expires_after_retention() {
    let now = now_millis();
    let t = Tombstone::new(&patient_snapshot(), now, DEFAULT_RETENTION_DAYS).unwrap();
    assert_eq!(t.kind, ItemKind::Patient);
    assert_eq!(t.original_id, 11);
    assert_eq!(t.label, "John Doe");
    assert!(t.expires_at > t.deleted_at);
    assert!(!t.is_expired(now));
    assert!(t.is_expired(now + Duration::days(7)));
  }

  #[test]
  fn zero_retention_is_rejected() {
    let err = Tombstone::new(&patient_snapshot(), now_millis(), 0).unwrap_err();
    assert!(matches!(err, Error::InvalidRetention(0)));
  }

  #[test]
  fn retention_past_the_calendar_is_rejected() {
    let err = Tombstone::new(&patient_snapshot(), now_millis(), 1_000_000_000).unwrap_err();
    assert!(matches!(err, Error::InvalidRetention(1_000_000_000)));
    let err = Tombstone::new(&patient_snapshot(), now_millis(), i64::MAX).unwrap_err();
    assert!(matches!(err, Error::InvalidRetention(i64::MAX)));
  }

  #[test]
  fn snapshot_survives_the_codec() {
    let snapshot = patient_snapshot();
    let t = Tombstone::new(&snapshot, now_millis(), 3).unwrap();
    assert_eq!(t.snapshot().unwrap(), snapshot);
    assert_eq!(
      snapshot.payload_paths(),
      vec![PathBuf::from("/f/1_xray.png")]
    );
  }

  #[test]
  fn item_kind_strings() {
    assert_eq!("file".parse::<ItemKind>().unwrap(), ItemKind::File);
    assert!("folder".parse::<ItemKind>().is_err());
    assert_eq!(ItemKind::Patient.to_string(), "patient");
  }
}
