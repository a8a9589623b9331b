//! End-to-end tests for building and restoring archives.

use std::{fs, path::Path, sync::Arc};

use chrono::Duration;
use meddocs_backup::{
  ArchiveBuilder, ArchiveRestorer, BackupError, BackupLocations,
  archive::{self, FILES_DIR, FILES_METADATA_FILE, FileEntry, METADATA_FILE, Manifest, PATIENTS_FILE},
};
use meddocs_core::{
  codec,
  file::AttachedFile,
  memory::{MemorySettings, MemoryStore},
  patient::{Patient, now_millis},
  settings::SettingsStore,
  store::RecordStore,
};
use meddocs_repo::{FileArea, Repository};
use meddocs_store_sqlite::SqliteStore;
use tempfile::TempDir;

struct Env<S> {
  root:      TempDir,
  repo:      Arc<Repository<S>>,
  settings:  Arc<MemorySettings>,
  locations: BackupLocations,
}

impl<S: RecordStore> Env<S> {
  fn with_store(store: S) -> Self {
    let root = tempfile::tempdir().unwrap();
    let repo = Repository::new(store, FileArea::new(root.path().join("files")));
    let locations = BackupLocations::new(root.path().join("backups"), root.path().join("work"));
    Self {
      repo: Arc::new(repo),
      settings: Arc::new(MemorySettings::default()),
      locations,
      root,
    }
  }

  fn builder(&self) -> ArchiveBuilder<S, MemorySettings> {
    ArchiveBuilder::new(self.repo.clone(), self.settings.clone(), self.locations.clone())
      .with_device_name("ward-tablet")
  }

  fn restorer(&self) -> ArchiveRestorer<S, MemorySettings> {
    ArchiveRestorer::new(self.repo.clone(), self.settings.clone(), self.locations.clone())
  }

  async fn patient_with_files(&self, name: &str, files: &[&str]) -> Patient {
    let patient = self.repo.add_patient(Patient::new(name, "3")).await.unwrap();
    for file in files {
      let source = self.root.path().join(file);
      fs::write(&source, format!("{name}:{file}")).unwrap();
      self
        .repo
        .attach_file(patient.id, &source, None, Some("image/jpeg"))
        .await
        .unwrap();
    }
    patient
  }

  fn work_leftovers(&self) -> usize {
    fs::read_dir(self.locations.work_root()).map(|d| d.count()).unwrap_or(0)
  }
}

fn memory_env() -> Env<MemoryStore> { Env::with_store(MemoryStore::new()) }

async fn file_names<S: RecordStore>(repo: &Repository<S>, patient_id: i64) -> Vec<String> {
  let mut names: Vec<String> = repo
    .list_files(patient_id)
    .await
    .unwrap()
    .into_iter()
    .map(|f| f.file_name)
    .collect();
  names.sort();
  names
}

// ─── Build ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn round_trip_through_sqlite() {
  let source = Env::with_store(SqliteStore::open_in_memory().await.unwrap());
  source.patient_with_files("John Doe", &["xray.jpg", "scan.jpg"]).await;
  source.patient_with_files("Jane Roe", &["notes.jpg"]).await;

  let report = source.builder().build().await.unwrap();
  assert_eq!(report.manifest.patient_count, 2);
  assert_eq!(report.manifest.file_count, 3);
  assert_eq!(report.manifest.device_name, "ward-tablet");
  assert!(!report.used_fallback);
  assert!(source.settings.load().unwrap().last_backup_time.is_some());
  assert_eq!(source.work_leftovers(), 0);

  let target = Env::with_store(SqliteStore::open_in_memory().await.unwrap());
  target.patient_with_files("Stale", &["old.jpg"]).await;
  let restored = target.restorer().restore(&report.path, true).await.unwrap();
  assert_eq!((restored.patients_restored, restored.files_restored), (2, 3));
  assert!(target.settings.load().unwrap().first_launch_done);

  let patients = target.repo.list_patients(None).await.unwrap();
  let names: Vec<&str> = patients.iter().map(|p| p.name.as_str()).collect();
  assert_eq!(names, ["Jane Roe", "John Doe"]);
  assert_eq!(file_names(&target.repo, patients[1].id).await, ["scan.jpg", "xray.jpg"]);

  let copy = patients[0].id;
  let file = &target.repo.list_files(copy).await.unwrap()[0];
  let bytes = fs::read(file.local_path().unwrap()).unwrap();
  assert_eq!(bytes, b"Jane Roe:notes.jpg");
  assert!(file.local_path().unwrap().starts_with(target.root.path()));
  assert_eq!(target.work_leftovers(), 0);
}

#[tokio::test]
async fn zero_files_aborts_without_an_archive() {
  let env = memory_env();
  env.repo.add_patient(Patient::new("A", "1")).await.unwrap();

  let err = env.builder().build().await.unwrap_err();
  assert!(matches!(err, BackupError::NoFiles));
  assert!(!env.locations.has_backup().await.unwrap());
  assert!(env.settings.load().unwrap().last_backup_time.is_none());
  assert_eq!(env.work_leftovers(), 0);
}

#[tokio::test]
async fn missing_payloads_are_skipped() {
  let env = memory_env();
  let p = env.patient_with_files("A", &["a.jpg", "b.jpg"]).await;
  let gone = env.repo.list_files(p.id).await.unwrap()[0].local_path().unwrap();
  fs::remove_file(gone).unwrap();

  let report = env.builder().build().await.unwrap();
  assert_eq!(report.manifest.file_count, 1);
  assert_eq!(report.skipped_files, 1);
}

#[tokio::test]
async fn only_five_archives_are_kept() {
  let env = memory_env();
  env.patient_with_files("A", &["a.jpg"]).await;
  let builder = env.builder();
  let start = now_millis();

  for i in 0..6 {
    builder.build_at(start + Duration::seconds(i)).await.unwrap();
  }

  let backups = env.locations.list_backups().await.unwrap();
  assert_eq!(backups.len(), 5);
  let oldest = archive::archive_file_name(start, 0);
  assert!(backups.iter().all(|b| b.name != oldest));
}

#[tokio::test]
async fn same_instant_gets_a_suffix() {
  let env = memory_env();
  env.patient_with_files("A", &["a.jpg"]).await;
  let now = now_millis();

  let first = env.builder().build_at(now).await.unwrap();
  let second = env.builder().build_at(now).await.unwrap();
  assert_ne!(first.path, second.path);
  assert!(second.path.to_string_lossy().ends_with("_1.zip"));
}

#[tokio::test]
async fn unwritable_primary_falls_back() {
  let env = memory_env();
  env.patient_with_files("A", &["a.jpg"]).await;

  let blocked = env.root.path().join("blocked");
  fs::write(&blocked, b"not a directory").unwrap();
  let fallback = env.root.path().join("fallback");
  let locations = BackupLocations::new(&blocked, env.root.path().join("work"))
    .with_fallbacks([fallback.clone()]);

  let builder = ArchiveBuilder::new(env.repo.clone(), env.settings.clone(), locations.clone());
  let report = builder.build().await.unwrap();
  assert!(report.used_fallback);
  assert!(report.path.starts_with(&fallback));
  assert!(env.settings.load().unwrap().last_backup_time.is_some());
  assert_eq!(locations.latest_backup().await.unwrap().unwrap().path, report.path);
}

#[tokio::test]
async fn no_location_at_all() {
  let env = memory_env();
  env.patient_with_files("A", &["a.jpg"]).await;

  let blocked = env.root.path().join("blocked");
  fs::write(&blocked, b"x").unwrap();
  let locations = BackupLocations::new(&blocked, env.root.path().join("work"));
  let builder = ArchiveBuilder::new(env.repo.clone(), env.settings.clone(), locations);

  let err = builder.build().await.unwrap_err();
  assert!(matches!(err, BackupError::OutputUnavailable { tried: 1 }));
}

#[tokio::test]
async fn manifest_loads_without_unpacking() {
  let env = memory_env();
  env.patient_with_files("A", &["a.jpg", "b.jpg"]).await;
  let report = env.builder().build().await.unwrap();

  let manifest = env.locations.load_manifest(&report.path).await.unwrap();
  assert_eq!(manifest, report.manifest);

  let listed = env.locations.list_backups_with_manifests().await.unwrap();
  assert_eq!(listed[0].manifest.as_ref().map(|m| m.file_count), Some(2));
}

// ─── Restore ─────────────────────────────────────────────────────────────────

/// Write a hand-made archive from already encoded documents.
fn craft_archive<D: AsRef<[u8]>>(
  dir: &Path,
  docs: &[(&str, D)],
  payloads: &[(&str, &[u8])],
) -> std::path::PathBuf {
  let staging = dir.join("staging");
  fs::create_dir_all(staging.join(FILES_DIR)).unwrap();
  for (name, doc) in docs {
    fs::write(staging.join(name), doc).unwrap();
  }
  for (name, bytes) in payloads {
    fs::write(staging.join(FILES_DIR).join(name), bytes).unwrap();
  }
  let out = dir.join("crafted.zip");
  archive::write_zip(&staging, &out).unwrap();
  out
}

fn file_entry(id: i64, patient_id: i64, name: &str) -> FileEntry {
  let mut file = AttachedFile::new(patient_id, format!("file:///gone/{name}"), "image/png", name, 3);
  file.id = id;
  FileEntry { backup_file_name: FileEntry::staged_name(&file), file }
}

fn sample_manifest(patient_count: usize, file_count: usize) -> Manifest {
  Manifest {
    version:     2,
    app_version: "1.0".into(),
    created_at:  now_millis(),
    patient_count,
    file_count,
    device_name: "x".into(),
  }
}

#[tokio::test]
async fn files_of_unknown_patients_are_skipped() {
  let env = memory_env();
  let mut patient = Patient::new("Only", "1");
  patient.id = 1;
  let manifest = sample_manifest(1, 2);
  let entries = vec![file_entry(10, 1, "mine.png"), file_entry(11, 99, "orphan.png")];
  let path = craft_archive(
    env.root.path(),
    &[
      (METADATA_FILE, codec::encode(&manifest).unwrap()),
      (PATIENTS_FILE, codec::encode(&vec![patient]).unwrap()),
      (FILES_METADATA_FILE, codec::encode(&entries).unwrap()),
    ],
    &[("10_mine.png", b"abc"), ("11_orphan.png", b"def")],
  );

  let report = env.restorer().restore(&path, false).await.unwrap();
  assert_eq!(report.patients_restored, 1);
  assert_eq!((report.files_restored, report.files_skipped), (1, 1));

  let restored = &env.repo.list_patients(None).await.unwrap()[0];
  assert_eq!(file_names(&env.repo, restored.id).await, ["mine.png"]);
}

#[tokio::test]
async fn malformed_entries_are_dropped_individually() {
  let env = memory_env();
  let patients = serde_json::json!([
    { "id": 1, "name": "Good", "bedNumber": "1", "status": "Active", "createdAt": 1700000000000_i64 },
    { "id": 2, "name": "Broken" }
  ]);
  let manifest = serde_json::json!({
    "version": 1, "createdAt": 1700000000000_i64, "patientCount": 2, "fileCount": 0
  });
  let path = craft_archive(
    env.root.path(),
    &[
      (METADATA_FILE, codec::encode(&manifest).unwrap()),
      (PATIENTS_FILE, codec::encode(&patients).unwrap()),
    ],
    &[],
  );

  let contents = env.restorer().read_archive(&path).await.unwrap();
  assert_eq!(contents.manifest.version, 1);
  assert_eq!(contents.patients.len(), 1);
  assert_eq!(contents.invalid_patients, 1);
  assert!(contents.files.is_empty());

  let report = env.restorer().replay(&contents, false).await.unwrap();
  assert_eq!((report.patients_restored, report.patients_skipped), (1, 1));
}

#[tokio::test]
async fn file_metadata_that_is_not_text_restores_patients_only() {
  let env = memory_env();
  let mut patient = Patient::new("Only", "1");
  patient.id = 1;
  let path = craft_archive(
    env.root.path(),
    &[
      (METADATA_FILE, codec::encode(&sample_manifest(1, 1)).unwrap().into_bytes()),
      (PATIENTS_FILE, codec::encode(&vec![patient]).unwrap().into_bytes()),
      (FILES_METADATA_FILE, vec![0xff, 0xfe, 0x00, 0x80]),
    ],
    &[("10_mine.png", b"abc")],
  );

  let report = env.restorer().restore(&path, false).await.unwrap();
  assert_eq!(report.patients_restored, 1);
  assert_eq!((report.files_restored, report.files_skipped), (0, 0));
  assert_eq!(env.repo.counts().await.unwrap().files, 0);
  assert!(env.settings.load().unwrap().first_launch_done);
}

#[tokio::test]
async fn patient_the_store_refuses_is_skipped_with_its_files() {
  let db_dir = tempfile::tempdir().unwrap();
  let db = db_dir.path().join("records.db");
  let env = Env::with_store(SqliteStore::open(&db).await.unwrap());
  rusqlite::Connection::open(&db)
    .unwrap()
    .execute_batch(
      "CREATE TRIGGER refuse_patient BEFORE INSERT ON patients WHEN NEW.name = 'Refused'
       BEGIN SELECT RAISE(ABORT, 'refused'); END;",
    )
    .unwrap();

  let mut refused = Patient::new("Refused", "1");
  refused.id = 1;
  let mut kept = Patient::new("Kept", "2");
  kept.id = 2;
  let entries = vec![file_entry(10, 1, "theirs.png"), file_entry(11, 2, "mine.png")];
  let path = craft_archive(
    env.root.path(),
    &[
      (METADATA_FILE, codec::encode(&sample_manifest(2, 2)).unwrap()),
      (PATIENTS_FILE, codec::encode(&vec![refused, kept]).unwrap()),
      (FILES_METADATA_FILE, codec::encode(&entries).unwrap()),
    ],
    &[("10_theirs.png", b"abc"), ("11_mine.png", b"def")],
  );

  let report = env.restorer().restore(&path, false).await.unwrap();
  assert_eq!((report.patients_restored, report.patients_skipped), (1, 1));
  assert_eq!((report.files_restored, report.files_skipped), (1, 1));

  let patients = env.repo.list_patients(None).await.unwrap();
  assert_eq!(patients.len(), 1);
  assert_eq!(patients[0].name, "Kept");
  assert_eq!(file_names(&env.repo, patients[0].id).await, ["mine.png"]);
  assert_eq!(env.work_leftovers(), 0);
}

#[tokio::test]
async fn archive_without_manifest_is_rejected() {
  let env = memory_env();
  let path = craft_archive(
    env.root.path(),
    &[(PATIENTS_FILE, codec::encode(&Vec::<Patient>::new()).unwrap())],
    &[],
  );

  let err = env.restorer().restore(&path, false).await.unwrap_err();
  assert!(matches!(err, BackupError::MissingManifest));
  assert!(!env.settings.load().unwrap().first_launch_done);
  assert_eq!(env.work_leftovers(), 0);
}

#[tokio::test]
async fn archive_without_patients_is_rejected() {
  let env = memory_env();
  let manifest = serde_json::json!({ "version": 2, "createdAt": 0, "patientCount": 0, "fileCount": 0 });
  let path = craft_archive(env.root.path(), &[(METADATA_FILE, codec::encode(&manifest).unwrap())], &[]);

  let err = env.restorer().restore(&path, false).await.unwrap_err();
  assert!(matches!(err, BackupError::MissingPatients));
}

#[tokio::test]
async fn garbage_manifest_is_corrupt() {
  let env = memory_env();
  let path = craft_archive::<String>(env.root.path(), &[(METADATA_FILE, "!!not base64!!".into())], &[]);

  let err = env.restorer().restore(&path, false).await.unwrap_err();
  assert!(matches!(err, BackupError::CorruptManifest(_)));
}

#[tokio::test]
async fn restores_from_a_stream() {
  let source = memory_env();
  source.patient_with_files("A", &["a.jpg"]).await;
  let report = source.builder().build().await.unwrap();

  let target = memory_env();
  let reader = fs::File::open(&report.path).unwrap();
  let restored = target.restorer().restore_from_reader(reader, false).await.unwrap();
  assert_eq!((restored.patients_restored, restored.files_restored), (1, 1));
}
