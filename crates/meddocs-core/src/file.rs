//! Attached files — metadata rows pointing at payloads in the file area.
//!
//! No binary data lives in the record store. The `uri` column locates the
//! payload; the repository facade owns its lifetime on disk.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::patient::now_millis;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedFile {
  /// Store-assigned id; `0` until inserted.
  #[serde(default)]
  pub id:         i64,
  pub patient_id: i64,
  /// `file://` URI or plain filesystem path of the payload.
  pub uri:        String,
  pub mime_type:  String,
  /// Display name; the only field that changes after insert (rename).
  pub file_name:  String,
  pub size:       i64,
  #[serde(with = "chrono::serde::ts_milliseconds")]
  pub created_at: DateTime<Utc>,
}

impl AttachedFile {
  pub fn new(
    patient_id: i64,
    uri: impl Into<String>,
    mime_type: impl Into<String>,
    file_name: impl Into<String>,
    size: i64,
  ) -> Self {
    Self {
      id: 0,
      patient_id,
      uri: uri.into(),
      mime_type: mime_type.into(),
      file_name: file_name.into(),
      size,
      created_at: now_millis(),
    }
  }

  pub fn is_image(&self) -> bool { self.mime_type.starts_with("image/") }

  /// Filesystem path of the payload, if the locator is a local one.
  pub fn local_path(&self) -> Option<PathBuf> { locator_path(&self.uri) }
}

/// Resolve a content locator (`file://…` URI or bare path) to a path.
pub fn locator_path(uri: &str) -> Option<PathBuf> {
  let path = match uri.strip_prefix("file://") {
    Some(rest) => rest,
    None if uri.contains("://") => return None,
    None => uri,
  };
  (!path.is_empty()).then(|| PathBuf::from(path))
}

/// Make a display name usable as a single path component.
pub fn safe_file_name(name: &str) -> String {
  let cleaned: String = name
    .chars()
    .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
    .collect();
  match cleaned.trim() {
    "" | "." | ".." => "file".to_owned(),
    _ => cleaned,
  }
}

/// Build the content locator stored for a payload path.
pub fn path_locator(path: &std::path::Path) -> String {
  format!("file://{}", path.display())
}

#[cfg(test)]
mod tests {
  use std::path::Path;

  use super::*;

  #[test]
  fn locator_round_trip() {
    let uri = path_locator(Path::new("/data/files/123_scan.jpg"));
    assert_eq!(uri, "file:///data/files/123_scan.jpg");
    assert_eq!(
      locator_path(&uri).as_deref(),
      Some(Path::new("/data/files/123_scan.jpg"))
    );
  }

  #[test]
  fn bare_paths_and_foreign_schemes() {
    assert_eq!(
      locator_path("/tmp/a.pdf").as_deref(),
      Some(Path::new("/tmp/a.pdf"))
    );
    assert!(locator_path("content://media/external/1").is_none());
    assert!(locator_path("file://").is_none());
  }

  #[test]
  fn unsafe_names_are_flattened() {
    assert_eq!(safe_file_name("scan.jpg"), "scan.jpg");
    assert_eq!(safe_file_name("../etc/passwd"), ".._etc_passwd");
    assert_eq!(safe_file_name(".."), "file");
    assert_eq!(safe_file_name(""), "file");
  }

  #[test]
  fn image_detection() {
    let f = AttachedFile::new(1, "/x.png", "image/png", "x.png", 10);
    assert!(f.is_image());
    let f = AttachedFile::new(1, "/x.pdf", "application/pdf", "x.pdf", 10);
    assert!(!f.is_image());
  }
}
