//! [`SqliteStore`] — the SQLite implementation of [`RecordStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension as _, params};
use tracing::debug;

use meddocs_core::{
  Error as CoreError,
  file::AttachedFile,
  patient::{Patient, PatientStatus},
  recycle::{BinSnapshot, ItemKind, RestoredItem, Tombstone},
  store::{RecordStore, StoreCounts},
};

use crate::{
  Result,
  encode::{
    FILE_COLUMNS, PATIENT_COLUMNS, RawFile, RawPatient, RawTombstone, TOMBSTONE_COLUMNS,
    encode_ms, like_pattern,
  },
  schema::SCHEMA,
};

// ─── Row helpers ─────────────────────────────────────────────────────────────
//
// These run on the connection thread and take a plain `Connection`, so they
// work equally inside and outside a transaction.

fn patient_exists(conn: &Connection, id: i64) -> rusqlite::Result<bool> {
  Ok(
    conn
      .query_row("SELECT 1 FROM patients WHERE id = ?1", params![id], |_| Ok(()))
      .optional()?
      .is_some(),
  )
}

fn file_exists(conn: &Connection, id: i64) -> rusqlite::Result<bool> {
  Ok(
    conn
      .query_row("SELECT 1 FROM patient_files WHERE id = ?1", params![id], |_| Ok(()))
      .optional()?
      .is_some(),
  )
}

/// Insert a patient row; id `0` lets SQLite assign one.
fn insert_patient_row(conn: &Connection, p: &Patient) -> rusqlite::Result<i64> {
  conn.execute(
    "INSERT INTO patients (
       id, patient_id_number, name, bed_number, status, gender, dob,
       problem, tags, admission_date, discharge_date, created_at
     ) VALUES (NULLIF(?1, 0), ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
    params![
      p.id,
      p.patient_id_number,
      p.name,
      p.bed_number,
      p.status.as_str(),
      p.gender,
      p.dob,
      p.problem,
      p.tags,
      p.admission_date.map(encode_ms),
      p.discharge_date.map(encode_ms),
      encode_ms(p.created_at),
    ],
  )?;
  Ok(conn.last_insert_rowid())
}

/// Insert a file row; id `0` lets SQLite assign one.
fn insert_file_row(conn: &Connection, f: &AttachedFile) -> rusqlite::Result<i64> {
  conn.execute(
    "INSERT INTO patient_files (id, patient_id, uri, mime_type, file_name, size, created_at)
     VALUES (NULLIF(?1, 0), ?2, ?3, ?4, ?5, ?6, ?7)",
    params![
      f.id,
      f.patient_id,
      f.uri,
      f.mime_type,
      f.file_name,
      f.size,
      encode_ms(f.created_at),
    ],
  )?;
  Ok(conn.last_insert_rowid())
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A MedDocs record store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    debug!(path = %path.display(), "opened sqlite record store");
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn query_patients(
    &self,
    filter: &'static str,
    arg: Option<String>,
  ) -> Result<Vec<Patient>> {
    let raws: Vec<RawPatient> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {PATIENT_COLUMNS} FROM patients
           WHERE {filter}
           ORDER BY CASE status WHEN 'Active' THEN 0 ELSE 1 END, name, id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(params![arg], RawPatient::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawPatient::into_patient).collect()
  }

  async fn query_files(&self, patient_id: i64, images_only: bool) -> Result<Vec<AttachedFile>> {
    let raws: Vec<RawFile> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {FILE_COLUMNS} FROM patient_files
           WHERE patient_id = ?1 AND (?2 = 0 OR mime_type LIKE 'image/%')
           ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt
          .query_map(params![patient_id, images_only], RawFile::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawFile::into_file).collect()
  }

  async fn query_tombstones(&self, expired_by: Option<DateTime<Utc>>) -> Result<Vec<Tombstone>> {
    let cutoff = expired_by.map(encode_ms);

    let raws: Vec<RawTombstone> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {TOMBSTONE_COLUMNS} FROM recycle_bin
           WHERE ?1 IS NULL OR expires_at <= ?1
           ORDER BY deleted_at DESC, id DESC"
        ))?;
        let rows = stmt
          .query_map(params![cutoff], RawTombstone::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawTombstone::into_tombstone).collect()
  }
}

// ─── RecordStore impl ────────────────────────────────────────────────────────

impl RecordStore for SqliteStore {
  type Error = crate::Error;

  // ── Patients ──────────────────────────────────────────────────────────────

  async fn insert_patient(&self, patient: Patient) -> Result<Patient> {
    let inserted = self
      .conn
      .call(move |conn| {
        if patient.id != 0 && patient_exists(conn, patient.id)? {
          return Ok(Err(CoreError::DuplicateId { entity: "patient", id: patient.id }));
        }
        let id = insert_patient_row(conn, &patient)?;
        Ok(Ok(Patient { id, ..patient }))
      })
      .await??;
    Ok(inserted)
  }

  async fn update_patient(&self, patient: Patient) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          "UPDATE patients SET
             patient_id_number = ?2, name = ?3, bed_number = ?4, status = ?5,
             gender = ?6, dob = ?7, problem = ?8, tags = ?9,
             admission_date = ?10, discharge_date = ?11, created_at = ?12
           WHERE id = ?1",
          params![
            patient.id,
            patient.patient_id_number,
            patient.name,
            patient.bed_number,
            patient.status.as_str(),
            patient.gender,
            patient.dob,
            patient.problem,
            patient.tags,
            patient.admission_date.map(encode_ms),
            patient.discharge_date.map(encode_ms),
            encode_ms(patient.created_at),
          ],
        )?;
        if changed == 0 {
          return Ok(Err(CoreError::PatientNotFound(patient.id)));
        }
        Ok(Ok(()))
      })
      .await??;
    Ok(())
  }

  async fn delete_patient(&self, id: i64) -> Result<bool> {
    let changed = self
      .conn
      .call(move |conn| Ok(conn.execute("DELETE FROM patients WHERE id = ?1", params![id])?))
      .await?;
    Ok(changed > 0)
  }

  async fn get_patient(&self, id: i64) -> Result<Option<Patient>> {
    let raw: Option<RawPatient> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE id = ?1"),
              params![id],
              RawPatient::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawPatient::into_patient).transpose()
  }

  async fn list_patients(&self, status: Option<PatientStatus>) -> Result<Vec<Patient>> {
    self
      .query_patients(
        "?1 IS NULL OR status = ?1",
        status.map(|s| s.as_str().to_owned()),
      )
      .await
  }

  async fn search_patients(&self, query: String) -> Result<Vec<Patient>> {
    self
      .query_patients(
        "name LIKE ?1 ESCAPE '\\'
           OR bed_number LIKE ?1 ESCAPE '\\'
           OR patient_id_number LIKE ?1 ESCAPE '\\'",
        Some(like_pattern(&query)),
      )
      .await
  }

  // ── Files ─────────────────────────────────────────────────────────────────

  async fn insert_file(&self, file: AttachedFile) -> Result<AttachedFile> {
    let inserted = self
      .conn
      .call(move |conn| {
        if !patient_exists(conn, file.patient_id)? {
          return Ok(Err(CoreError::PatientNotFound(file.patient_id)));
        }
        if file.id != 0 && file_exists(conn, file.id)? {
          return Ok(Err(CoreError::DuplicateId { entity: "file", id: file.id }));
        }
        let id = insert_file_row(conn, &file)?;
        Ok(Ok(AttachedFile { id, ..file }))
      })
      .await??;
    Ok(inserted)
  }

  async fn update_file(&self, file: AttachedFile) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        if !patient_exists(conn, file.patient_id)? {
          return Ok(Err(CoreError::PatientNotFound(file.patient_id)));
        }
        let changed = conn.execute(
          "UPDATE patient_files SET
             patient_id = ?2, uri = ?3, mime_type = ?4, file_name = ?5,
             size = ?6, created_at = ?7
           WHERE id = ?1",
          params![
            file.id,
            file.patient_id,
            file.uri,
            file.mime_type,
            file.file_name,
            file.size,
            encode_ms(file.created_at),
          ],
        )?;
        if changed == 0 {
          return Ok(Err(CoreError::FileNotFound(file.id)));
        }
        Ok(Ok(()))
      })
      .await??;
    Ok(())
  }

  async fn delete_file(&self, id: i64) -> Result<bool> {
    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute("DELETE FROM patient_files WHERE id = ?1", params![id])?)
      })
      .await?;
    Ok(changed > 0)
  }

  async fn get_file(&self, id: i64) -> Result<Option<AttachedFile>> {
    let raw: Option<RawFile> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {FILE_COLUMNS} FROM patient_files WHERE id = ?1"),
              params![id],
              RawFile::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawFile::into_file).transpose()
  }

  async fn list_files(&self, patient_id: i64) -> Result<Vec<AttachedFile>> {
    self.query_files(patient_id, false).await
  }

  async fn list_image_files(&self, patient_id: i64) -> Result<Vec<AttachedFile>> {
    self.query_files(patient_id, true).await
  }

  async fn counts(&self) -> Result<StoreCounts> {
    let (files, active, discharged, bin_items): (i64, i64, i64, i64) = self
      .conn
      .call(|conn| {
        Ok(conn.query_row(
          "SELECT
             (SELECT COUNT(*) FROM patient_files),
             (SELECT COUNT(*) FROM patients WHERE status = 'Active'),
             (SELECT COUNT(*) FROM patients WHERE status = 'Discharged'),
             (SELECT COUNT(*) FROM recycle_bin)",
          [],
          |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?)
      })
      .await?;

    Ok(StoreCounts {
      files:      files as u64,
      active:     active as u64,
      discharged: discharged as u64,
      bin_items:  bin_items as u64,
    })
  }

  // ── Recycle bin ───────────────────────────────────────────────────────────

  async fn move_to_bin(&self, tombstone: Tombstone) -> Result<Option<Tombstone>> {
    let kind = tombstone.kind;
    let original_id = tombstone.original_id;
    let item_data = tombstone.item_data.clone();
    let label = tombstone.label.clone();
    let deleted_at = encode_ms(tombstone.deleted_at);
    let expires_at = encode_ms(tombstone.expires_at);

    let id: Option<i64> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let table = match kind {
          ItemKind::Patient => "patients",
          ItemKind::File => "patient_files",
        };
        let removed =
          tx.execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![original_id])?;
        if removed == 0 {
          return Ok(None);
        }
        tx.execute(
          "INSERT INTO recycle_bin
             (item_type, original_id, item_data, label, deleted_at, expires_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          params![kind.as_str(), original_id, item_data, label, deleted_at, expires_at],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(Some(id))
      })
      .await?;

    match id {
      Some(id) => {
        debug!(%kind, original_id, tombstone = id, "moved to recycle bin");
        Ok(Some(Tombstone { id, ..tombstone }))
      }
      None => Ok(None),
    }
  }

  async fn restore_from_bin(
    &self,
    tombstone_id: i64,
    snapshot: BinSnapshot,
  ) -> Result<Option<RestoredItem>> {
    let restored = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let exists = tx
          .query_row("SELECT 1 FROM recycle_bin WHERE id = ?1", params![tombstone_id], |_| {
            Ok(())
          })
          .optional()?
          .is_some();
        if !exists {
          return Ok(Ok(None));
        }

        let restored = match snapshot {
          BinSnapshot::Patient(snap) => {
            let patient = Patient { id: 0, ..snap.patient };
            let patient = Patient { id: insert_patient_row(&tx, &patient)?, ..patient };
            let mut files = Vec::with_capacity(snap.files.len());
            for file in snap.files {
              let file = AttachedFile { id: 0, patient_id: patient.id, ..file };
              files.push(AttachedFile { id: insert_file_row(&tx, &file)?, ..file });
            }
            RestoredItem::Patient { patient, files }
          }
          BinSnapshot::File(file) => {
            if !patient_exists(&tx, file.patient_id)? {
              return Ok(Err(CoreError::PatientNotFound(file.patient_id)));
            }
            let file = AttachedFile { id: 0, ..file };
            RestoredItem::File(AttachedFile { id: insert_file_row(&tx, &file)?, ..file })
          }
        };

        tx.execute("DELETE FROM recycle_bin WHERE id = ?1", params![tombstone_id])?;
        tx.commit()?;
        Ok(Ok(Some(restored)))
      })
      .await??;

    if restored.is_some() {
      debug!(tombstone = tombstone_id, "restored from recycle bin");
    }
    Ok(restored)
  }

  async fn get_tombstone(&self, id: i64) -> Result<Option<Tombstone>> {
    let raw: Option<RawTombstone> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {TOMBSTONE_COLUMNS} FROM recycle_bin WHERE id = ?1"),
              params![id],
              RawTombstone::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawTombstone::into_tombstone).transpose()
  }

  async fn find_tombstone(&self, kind: ItemKind, original_id: i64) -> Result<Option<Tombstone>> {
    let raw: Option<RawTombstone> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {TOMBSTONE_COLUMNS} FROM recycle_bin
                 WHERE item_type = ?1 AND original_id = ?2
                 ORDER BY deleted_at DESC, id DESC
                 LIMIT 1"
              ),
              params![kind.as_str(), original_id],
              RawTombstone::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawTombstone::into_tombstone).transpose()
  }

  async fn list_tombstones(&self) -> Result<Vec<Tombstone>> {
    self.query_tombstones(None).await
  }

  async fn list_expired_tombstones(&self, now: DateTime<Utc>) -> Result<Vec<Tombstone>> {
    self.query_tombstones(Some(now)).await
  }

  async fn delete_tombstone(&self, id: i64) -> Result<bool> {
    let changed = self
      .conn
      .call(move |conn| Ok(conn.execute("DELETE FROM recycle_bin WHERE id = ?1", params![id])?))
      .await?;
    Ok(changed > 0)
  }
}
