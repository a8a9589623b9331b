//! Patient — the root entity of the record store.
//!
//! A patient owns its attached files; deleting the patient row cascades to
//! them. Serialisation uses camelCase field names and epoch-millisecond
//! timestamps, the shape found in existing backup archives.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ─── Status ──────────────────────────────────────────────────────────────────

/// Where a patient is in the admission workflow.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize,
  Deserialize,
)]
pub enum PatientStatus {
  #[default]
  Active,
  Discharged,
}

impl PatientStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Active => "Active",
      Self::Discharged => "Discharged",
    }
  }
}

impl fmt::Display for PatientStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for PatientStatus {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "Active" | "active" => Ok(Self::Active),
      "Discharged" | "discharged" => Ok(Self::Discharged),
      other => Err(Error::UnknownStatus(other.to_owned())),
    }
  }
}

// ─── Date of birth ───────────────────────────────────────────────────────────

/// Interpretation of the free-form date-of-birth field.
///
/// The field holds either a formatted date or a raw age. A value made only of
/// ASCII digits is read as an age, so an unseparated date like `19900115`
/// comes back as `Age(19900115)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BirthInfo {
  Age(u32),
  Date(String),
}

// ─── Patient ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
  /// Store-assigned id; `0` until inserted.
  #[serde(default)]
  pub id:                i64,
  /// Hospital or clinic identifier supplied by the user.
  #[serde(default)]
  pub patient_id_number: Option<String>,
  pub name:              String,
  /// Bed, room or ward label.
  pub bed_number:        String,
  #[serde(default)]
  pub status:            PatientStatus,
  #[serde(default)]
  pub gender:            Option<String>,
  #[serde(default)]
  pub dob:               Option<String>,
  /// Problem or diagnosis, free text.
  #[serde(default)]
  pub problem:           Option<String>,
  /// Comma-separated free-text tags.
  #[serde(default)]
  pub tags:              Option<String>,
  #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
  pub admission_date:    Option<DateTime<Utc>>,
  #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
  pub discharge_date:    Option<DateTime<Utc>>,
  /// Set once at construction and never changed afterwards.
  #[serde(with = "chrono::serde::ts_milliseconds")]
  pub created_at:        DateTime<Utc>,
}

impl Patient {
  /// A new, not yet inserted, active patient with the two required fields.
  pub fn new(name: impl Into<String>, bed_number: impl Into<String>) -> Self {
    Self {
      id:                0,
      patient_id_number: None,
      name:              name.into(),
      bed_number:        bed_number.into(),
      status:            PatientStatus::Active,
      gender:            None,
      dob:               None,
      problem:           None,
      tags:              None,
      admission_date:    None,
      discharge_date:    None,
      created_at:        now_millis(),
    }
  }

  /// Reject records whose required fields are blank.
  pub fn validate(&self) -> Result<()> {
    if self.name.trim().is_empty() {
      return Err(Error::BlankField("name"));
    }
    if self.bed_number.trim().is_empty() {
      return Err(Error::BlankField("bed_number"));
    }
    Ok(())
  }

  pub fn is_active(&self) -> bool { self.status == PatientStatus::Active }

  pub fn birth_info(&self) -> Option<BirthInfo> {
    let dob = self.dob.as_deref()?.trim();
    if dob.is_empty() {
      return None;
    }
    if dob.bytes().all(|b| b.is_ascii_digit())
      && let Ok(age) = dob.parse()
    {
      return Some(BirthInfo::Age(age));
    }
    Some(BirthInfo::Date(dob.to_owned()))
  }

  pub fn tag_list(&self) -> Vec<&str> {
    self
      .tags
      .as_deref()
      .unwrap_or_default()
      .split(',')
      .map(str::trim)
      .filter(|t| !t.is_empty())
      .collect()
  }

  /// Case-insensitive substring match over name, bed label and identifier.
  pub fn matches(&self, query: &str) -> bool {
    let needle = query.to_lowercase();
    self.name.to_lowercase().contains(&needle)
      || self.bed_number.to_lowercase().contains(&needle)
      || self
        .patient_id_number
        .as_deref()
        .is_some_and(|n| n.to_lowercase().contains(&needle))
  }
}

/// The current instant truncated to millisecond precision, so values survive
/// a round trip through the millisecond-based storage formats unchanged.
pub fn now_millis() -> DateTime<Utc> {
  let now = Utc::now();
  DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}
