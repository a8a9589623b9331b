//! SQL schema for the MedDocs SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
///
/// Timestamps are epoch milliseconds in UTC.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS patients (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    patient_id_number TEXT,
    name              TEXT    NOT NULL,
    bed_number        TEXT    NOT NULL,
    status            TEXT    NOT NULL DEFAULT 'Active',  -- 'Active' | 'Discharged'
    gender            TEXT,
    dob               TEXT,            -- formatted date or bare age
    problem           TEXT,
    tags              TEXT,            -- comma separated
    admission_date    INTEGER,
    discharge_date    INTEGER,
    created_at        INTEGER NOT NULL
);

-- Metadata only; payload bytes live in the file area.
CREATE TABLE IF NOT EXISTS patient_files (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    patient_id  INTEGER NOT NULL REFERENCES patients(id) ON DELETE CASCADE,
    uri         TEXT    NOT NULL,
    mime_type   TEXT    NOT NULL,
    file_name   TEXT    NOT NULL,
    size        INTEGER NOT NULL,
    created_at  INTEGER NOT NULL
);

-- Tombstones never reference live rows; item_data is self-contained.
CREATE TABLE IF NOT EXISTS recycle_bin (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    item_type   TEXT    NOT NULL,   -- 'patient' | 'file'
    original_id INTEGER NOT NULL,
    item_data   TEXT    NOT NULL,   -- base64 of the JSON snapshot
    label       TEXT    NOT NULL,
    deleted_at  INTEGER NOT NULL,
    expires_at  INTEGER NOT NULL,
    CHECK (expires_at > deleted_at)
);

CREATE INDEX IF NOT EXISTS patients_status_name_idx ON patients(status, name);
CREATE INDEX IF NOT EXISTS patient_files_patient_idx ON patient_files(patient_id);
CREATE INDEX IF NOT EXISTS recycle_bin_expires_idx   ON recycle_bin(expires_at);
CREATE INDEX IF NOT EXISTS recycle_bin_original_idx  ON recycle_bin(item_type, original_id);

PRAGMA user_version = 1;
";
