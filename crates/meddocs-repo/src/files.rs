//! The file area: the directory that holds attachment payloads.
//!
//! Every payload is written under a fresh, collision-free name and never
//! overwritten. Rows reference payloads through a `file://` locator.

use std::{
  io::ErrorKind,
  path::{Path, PathBuf},
};

use meddocs_core::{
  file::{path_locator, safe_file_name},
  patient::now_millis,
};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{Error, Result};

/// MIME type recorded when none is given and the extension is unknown.
pub const DEFAULT_MIME: &str = "application/octet-stream";

/// A payload freshly copied into the file area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPayload {
  pub path: PathBuf,
  pub size: u64,
}

impl StoredPayload {
  pub fn locator(&self) -> String { path_locator(&self.path) }
}

#[derive(Debug, Clone)]
pub struct FileArea {
  root: PathBuf,
}

impl FileArea {
  pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }

  pub fn root(&self) -> &Path { &self.root }

  /// Fresh payload path for a file displayed as `name`.
  ///
  /// Format: `<millis>_<8 hex>_<name>`.
  fn fresh_path(&self, name: &str) -> PathBuf {
    let tag = Uuid::new_v4().simple().to_string();
    self.root.join(format!(
      "{}_{}_{}",
      now_millis().timestamp_millis(),
      &tag[..8],
      safe_file_name(name)
    ))
  }

  /// Copy `source` into the area under a fresh name derived from `name`.
  ///
  /// The copy lands under a temporary name first, so a failed import never
  /// leaves a truncated payload behind.
  pub async fn import(&self, source: &Path, name: &str) -> Result<StoredPayload> {
    fs::create_dir_all(&self.root)
      .await
      .map_err(Error::io(&self.root))?;

    let path = self.fresh_path(name);
    let temp = path.with_extension("part");
    let size = match fs::copy(source, &temp).await {
      Ok(size) => size,
      Err(e) => {
        let _ = fs::remove_file(&temp).await;
        return Err(Error::io(source)(e));
      }
    };
    fs::rename(&temp, &path).await.map_err(|e| {
      warn!(from = %temp.display(), to = %path.display(), error = %e, "file_area: rename failed");
      Error::io(&path)(e)
    })?;

    debug!(source = %source.display(), path = %path.display(), size, "file_area: imported payload");
    Ok(StoredPayload { path, size })
  }

  /// Remove a payload. A payload that is already gone is not an error.
  pub async fn remove(&self, path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
      Ok(()) => {
        debug!(path = %path.display(), "file_area: removed payload");
        Ok(true)
      }
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
      Err(e) => Err(Error::io(path)(e)),
    }
  }

  pub async fn exists(&self, path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
  }
}

/// MIME type for `path` based on its extension.
pub fn guess_mime(path: &Path) -> &'static str {
  let ext = path
    .extension()
    .and_then(|e| e.to_str())
    .map(str::to_ascii_lowercase);
  match ext.as_deref() {
    Some("jpg" | "jpeg") => "image/jpeg",
    Some("png") => "image/png",
    Some("gif") => "image/gif",
    Some("webp") => "image/webp",
    Some("heic") => "image/heic",
    Some("pdf") => "application/pdf",
    Some("txt") => "text/plain",
    Some("doc") => "application/msword",
    Some("docx") => {
      "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
    }
    _ => DEFAULT_MIME,
  }
}
