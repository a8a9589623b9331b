//! Conversions between domain types and SQLite column values.
//!
//! Timestamps are stored as epoch milliseconds. Enums are stored by their
//! canonical string form and parsed back through the core `FromStr` impls.

use chrono::{DateTime, Utc};
use meddocs_core::{file::AttachedFile, patient::Patient, recycle::Tombstone};
use rusqlite::Row;

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_ms(dt: DateTime<Utc>) -> i64 { dt.timestamp_millis() }

pub fn decode_ms(ms: i64) -> Result<DateTime<Utc>> {
  DateTime::from_timestamp_millis(ms).ok_or(Error::Timestamp(ms))
}

fn decode_opt_ms(ms: Option<i64>) -> Result<Option<DateTime<Utc>>> {
  ms.map(decode_ms).transpose()
}

/// Wrap a user query for a `LIKE … ESCAPE '\'` substring match.
pub fn like_pattern(query: &str) -> String {
  let mut out = String::with_capacity(query.len() + 2);
  out.push('%');
  for c in query.chars() {
    if matches!(c, '%' | '_' | '\\') {
      out.push('\\');
    }
    out.push(c);
  }
  out.push('%');
  out
}

// ─── Row types ───────────────────────────────────────────────────────────────

pub const PATIENT_COLUMNS: &str = "id, patient_id_number, name, bed_number, status, gender, \
                                   dob, problem, tags, admission_date, discharge_date, created_at";

/// Raw values read directly from a `patients` row.
pub struct RawPatient {
  pub id:                i64,
  pub patient_id_number: Option<String>,
  pub name:              String,
  pub bed_number:        String,
  pub status:            String,
  pub gender:            Option<String>,
  pub dob:               Option<String>,
  pub problem:           Option<String>,
  pub tags:              Option<String>,
  pub admission_date:    Option<i64>,
  pub discharge_date:    Option<i64>,
  pub created_at:        i64,
}

impl RawPatient {
  /// Read the columns listed in [`PATIENT_COLUMNS`], in order.
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:                row.get(0)?,
      patient_id_number: row.get(1)?,
      name:              row.get(2)?,
      bed_number:        row.get(3)?,
      status:            row.get(4)?,
      gender:            row.get(5)?,
      dob:               row.get(6)?,
      problem:           row.get(7)?,
      tags:              row.get(8)?,
      admission_date:    row.get(9)?,
      discharge_date:    row.get(10)?,
      created_at:        row.get(11)?,
    })
  }

  pub fn into_patient(self) -> Result<Patient> {
    Ok(Patient {
      id:                self.id,
      patient_id_number: self.patient_id_number,
      name:              self.name,
      bed_number:        self.bed_number,
      status:            self.status.parse()?,
      gender:            self.gender,
      dob:               self.dob,
      problem:           self.problem,
      tags:              self.tags,
      admission_date:    decode_opt_ms(self.admission_date)?,
      discharge_date:    decode_opt_ms(self.discharge_date)?,
      created_at:        decode_ms(self.created_at)?,
    })
  }
}

pub const FILE_COLUMNS: &str =
  "id, patient_id, uri, mime_type, file_name, size, created_at";

/// Raw values read directly from a `patient_files` row.
pub struct RawFile {
  pub id:         i64,
  pub patient_id: i64,
  pub uri:        String,
  pub mime_type:  String,
  pub file_name:  String,
  pub size:       i64,
  pub created_at: i64,
}

impl RawFile {
  /// Read the columns listed in [`FILE_COLUMNS`], in order.
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:         row.get(0)?,
      patient_id: row.get(1)?,
      uri:        row.get(2)?,
      mime_type:  row.get(3)?,
      file_name:  row.get(4)?,
      size:       row.get(5)?,
      created_at: row.get(6)?,
    })
  }

  pub fn into_file(self) -> Result<AttachedFile> {
    Ok(AttachedFile {
      id:         self.id,
      patient_id: self.patient_id,
      uri:        self.uri,
      mime_type:  self.mime_type,
      file_name:  self.file_name,
      size:       self.size,
      created_at: decode_ms(self.created_at)?,
    })
  }
}

pub const TOMBSTONE_COLUMNS: &str =
  "id, item_type, original_id, item_data, label, deleted_at, expires_at";

/// Raw values read directly from a `recycle_bin` row.
pub struct RawTombstone {
  pub id:          i64,
  pub item_type:   String,
  pub original_id: i64,
  pub item_data:   String,
  pub label:       String,
  pub deleted_at:  i64,
  pub expires_at:  i64,
}

impl RawTombstone {
  /// Read the columns listed in [`TOMBSTONE_COLUMNS`], in order.
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:          row.get(0)?,
      item_type:   row.get(1)?,
      original_id: row.get(2)?,
      item_data:   row.get(3)?,
      label:       row.get(4)?,
      deleted_at:  row.get(5)?,
      expires_at:  row.get(6)?,
    })
  }

  pub fn into_tombstone(self) -> Result<Tombstone> {
    Ok(Tombstone {
      id:          self.id,
      kind:        self.item_type.parse()?,
      original_id: self.original_id,
      item_data:   self.item_data,
      label:       self.label,
      deleted_at:  decode_ms(self.deleted_at)?,
      expires_at:  decode_ms(self.expires_at)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn like_pattern_escapes_wildcards() {
    assert_eq!(like_pattern("ab"), "%ab%");
    assert_eq!(like_pattern("50%_x"), "%50\\%\\_x%");
  }

  #[test]
  fn millis_round_trip() {
    let dt = decode_ms(1_700_000_000_123).unwrap();
    assert_eq!(encode_ms(dt), 1_700_000_000_123);
    assert!(matches!(decode_ms(i64::MAX), Err(Error::Timestamp(_))));
  }
}
