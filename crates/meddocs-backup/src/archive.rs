//! Backup archive layout and the blocking ZIP primitives.
//!
//! An archive holds three payload entries, each the Base64 text of a UTF-8
//! JSON document, plus the attachment payloads under `files/`:
//!
//! ```text
//! backup_metadata.json   Manifest
//! patients.json          [Patient]
//! files_metadata.json    [FileEntry]
//! files/<id>_<name>      raw bytes
//! ```
//!
//! Everything here is synchronous; callers run it on
//! `tokio::task::spawn_blocking`.

use std::{
  fs::{self, File},
  io::{self, Read, Seek},
  path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use meddocs_core::file::{AttachedFile, safe_file_name};
use serde::{Deserialize, Serialize};
use tracing::warn;
use zip::{
  CompressionMethod, ZipArchive, ZipWriter, result::ZipError, write::SimpleFileOptions,
};

use crate::{BackupError, Result};

pub const BACKUP_VERSION: u32 = 2;
pub const MAX_BACKUPS_TO_KEEP: usize = 5;

pub const METADATA_FILE: &str = "backup_metadata.json";
pub const PATIENTS_FILE: &str = "patients.json";
pub const FILES_METADATA_FILE: &str = "files_metadata.json";
pub const FILES_DIR: &str = "files";

pub const ARCHIVE_PREFIX: &str = "MedDocs_Backup_";
pub const ARCHIVE_EXTENSION: &str = ".zip";
pub const PARTIAL_SUFFIX: &str = ".partial";

// ─── Documents ───────────────────────────────────────────────────────────────

/// Describes an archive. Recorded on build; the version is informational.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
  pub version:       u32,
  #[serde(default)]
  pub app_version:   String,
  #[serde(with = "chrono::serde::ts_milliseconds")]
  pub created_at:    DateTime<Utc>,
  pub patient_count: usize,
  /// Payloads actually copied into the archive.
  pub file_count:    usize,
  #[serde(default)]
  pub device_name:   String,
}

/// A file row together with the name of its staged payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
  pub file:             AttachedFile,
  /// Entry name under `files/`; empty when the payload was not archived.
  #[serde(default)]
  pub backup_file_name: String,
}

impl FileEntry {
  /// `<file id>_<file name>`, flattened to a single path component.
  pub fn staged_name(file: &AttachedFile) -> String {
    format!("{}_{}", file.id, safe_file_name(&file.file_name))
  }
}

// ─── Names ───────────────────────────────────────────────────────────────────

/// `MedDocs_Backup_<yyyyMMdd_HHmmss_SSS>[_n].zip`; sorts chronologically.
pub fn archive_file_name(at: DateTime<Utc>, attempt: u32) -> String {
  let stamp = at.format("%Y%m%d_%H%M%S_%3f");
  match attempt {
    0 => format!("{ARCHIVE_PREFIX}{stamp}{ARCHIVE_EXTENSION}"),
    n => format!("{ARCHIVE_PREFIX}{stamp}_{n}{ARCHIVE_EXTENSION}"),
  }
}

pub fn is_archive_name(name: &str) -> bool {
  name.starts_with(ARCHIVE_PREFIX) && name.ends_with(ARCHIVE_EXTENSION)
}

// ─── ZIP ─────────────────────────────────────────────────────────────────────

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> BackupError {
  BackupError::io(path)
}

/// Zip the contents of `src_dir` into a new file at `dest`.
///
/// Entry names are relative to `src_dir` and use `/` separators. Returns
/// the number of file entries written.
pub fn write_zip(src_dir: &Path, dest: &Path) -> Result<usize> {
  let out = File::create(dest).map_err(io_err(dest))?;
  let mut zip = ZipWriter::new(out);
  let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

  let mut written = 0;
  let mut pending = vec![(src_dir.to_path_buf(), String::new())];
  while let Some((dir, prefix)) = pending.pop() {
    let mut entries = fs::read_dir(&dir)
      .map_err(io_err(&dir))?
      .collect::<io::Result<Vec<_>>>()
      .map_err(io_err(&dir))?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
      let path = entry.path();
      let name = format!("{prefix}{}", entry.file_name().to_string_lossy());
      if path.is_dir() {
        zip.add_directory(name.as_str(), options)?;
        pending.push((path, format!("{name}/")));
      } else {
        zip.start_file(name.as_str(), options)?;
        let mut input = File::open(&path).map_err(io_err(&path))?;
        io::copy(&mut input, &mut zip).map_err(io_err(&path))?;
        written += 1;
      }
    }
  }

  zip.finish()?.sync_all().map_err(io_err(dest))?;
  Ok(written)
}

/// Unpack every entry of `reader` below `dest`.
///
/// Entries whose names would land outside `dest` are skipped. Returns the
/// number of files written.
pub fn extract_zip<R: Read + Seek>(reader: R, dest: &Path) -> Result<usize> {
  let mut archive = ZipArchive::new(reader)?;
  let mut extracted = 0;

  for i in 0..archive.len() {
    let mut entry = archive.by_index(i)?;
    let Some(relative) = entry.enclosed_name() else {
      warn!(entry = entry.name(), "skipping archive entry outside the extraction root");
      continue;
    };
    let out: PathBuf = dest.join(relative);

    if entry.is_dir() {
      fs::create_dir_all(&out).map_err(io_err(&out))?;
      continue;
    }
    if let Some(parent) = out.parent() {
      fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    let mut file = File::create(&out).map_err(io_err(&out))?;
    io::copy(&mut entry, &mut file).map_err(io_err(&out))?;
    extracted += 1;
  }

  Ok(extracted)
}

/// Read a single text entry without unpacking the rest of the archive.
pub fn read_entry(archive: &Path, name: &str) -> Result<Option<String>> {
  let file = File::open(archive).map_err(io_err(archive))?;
  let mut zip = ZipArchive::new(file)?;
  let mut entry = match zip.by_name(name) {
    Ok(entry) => entry,
    Err(ZipError::FileNotFound) => return Ok(None),
    Err(e) => return Err(e.into()),
  };
  let mut text = String::new();
  entry.read_to_string(&mut text).map_err(io_err(archive))?;
  Ok(Some(text))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn archive_names_sort_by_time() {
    let a = DateTime::from_timestamp_millis(1_700_000_000_005).unwrap();
    let b = DateTime::from_timestamp_millis(1_700_000_060_000).unwrap();
    let (na, nb) = (archive_file_name(a, 0), archive_file_name(b, 0));
    assert_eq!(na, "MedDocs_Backup_20231114_221320_005.zip");
    assert!(na < nb);
    assert_eq!(archive_file_name(a, 2), "MedDocs_Backup_20231114_221320_005_2.zip");
    assert!(is_archive_name(&na));
    assert!(!is_archive_name("notes.zip"));
  }

  #[test]
  fn zip_round_trip_keeps_layout() {
    let src = tempfile::tempdir().unwrap();
    fs::create_dir(src.path().join(FILES_DIR)).unwrap();
    fs::write(src.path().join(METADATA_FILE), "bWV0YQ==").unwrap();
    fs::write(src.path().join(FILES_DIR).join("1_a.png"), b"png").unwrap();

    let out = tempfile::tempdir().unwrap();
    let zip_path = out.path().join("a.zip");
    assert_eq!(write_zip(src.path(), &zip_path).unwrap(), 2);

    assert_eq!(
      read_entry(&zip_path, METADATA_FILE).unwrap().as_deref(),
      Some("bWV0YQ==")
    );
    assert!(read_entry(&zip_path, PATIENTS_FILE).unwrap().is_none());

    let dest = tempfile::tempdir().unwrap();
    let n = extract_zip(File::open(&zip_path).unwrap(), dest.path()).unwrap();
    assert_eq!(n, 2);
    assert_eq!(fs::read(dest.path().join("files/1_a.png")).unwrap(), b"png");
  }

  #[test]
  fn staged_names_are_flat() {
    let mut f = AttachedFile::new(1, "/x", "text/plain", "a/b.txt", 1);
    f.id = 9;
    assert_eq!(FileEntry::staged_name(&f), "9_a_b.txt");
  }
}
