//! Startup and periodic maintenance jobs.

use std::{fs, sync::Arc};

use chrono::Duration;
use meddocs_backup::{
  ArchiveBuilder, ArchiveRestorer, BackupLocations, JobOutcome, Scheduler,
  locations::BUILD_WORK_PREFIX,
};
use meddocs_core::{
  memory::{MemorySettings, MemoryStore},
  patient::{Patient, now_millis},
  schedule::BackupFrequency,
  settings::{BackupSettings, SettingsStore},
};
use meddocs_repo::{FileArea, Repository};
use tempfile::TempDir;

type TestScheduler = Scheduler<MemoryStore, MemorySettings>;

/// A scheduler over a fresh store; all instances made from the same `root`
/// share backup locations.
fn scheduler(root: &TempDir, settings: BackupSettings) -> (TestScheduler, Arc<Repository<MemoryStore>>) {
  let area = FileArea::new(root.path().join(format!("files-{}", now_millis().timestamp_micros())));
  let repo = Arc::new(Repository::new(MemoryStore::new(), area));
  let settings = Arc::new(MemorySettings::new(settings));
  let locations = BackupLocations::new(root.path().join("backups"), root.path().join("work"));
  let builder = ArchiveBuilder::new(repo.clone(), settings.clone(), locations.clone());
  let restorer = ArchiveRestorer::new(repo.clone(), settings, locations);
  (Scheduler::new(builder, restorer), repo)
}

async fn seed(root: &TempDir, repo: &Repository<MemoryStore>) {
  let p = repo.add_patient(Patient::new("A", "1")).await.unwrap();
  let source = root.path().join("a.jpg");
  fs::write(&source, b"jpg").unwrap();
  repo.attach_file(p.id, &source, None, None).await.unwrap();
}

#[tokio::test]
async fn periodic_backup_respects_frequency() {
  let root = tempfile::tempdir().unwrap();
  let settings = BackupSettings { frequency: BackupFrequency::Every2Days, ..Default::default() };
  let (scheduler, repo) = scheduler(&root, settings);
  seed(&root, &repo).await;

  let now = now_millis();
  assert!(matches!(scheduler.run_periodic(now).await, JobOutcome::Completed(_)));
  assert!(matches!(
    scheduler.run_periodic(now + Duration::days(1)).await,
    JobOutcome::Skipped
  ));
  assert!(matches!(
    scheduler.run_periodic(now + Duration::days(2)).await,
    JobOutcome::Completed(_)
  ));
  let last = scheduler.builder().settings().load().unwrap().last_backup_time;
  assert_eq!(last, Some(now + Duration::days(2)));
}

#[tokio::test]
async fn disabled_or_empty_is_skipped() {
  let root = tempfile::tempdir().unwrap();
  let (scheduler, repo) = scheduler(&root, BackupSettings::default());
  repo.add_patient(Patient::new("A", "1")).await.unwrap();
  assert!(matches!(scheduler.run_periodic(now_millis()).await, JobOutcome::Skipped));

  seed(&root, &repo).await;
  scheduler.builder().settings().set_auto_backup_enabled(false).unwrap();
  assert!(matches!(scheduler.run_periodic(now_millis()).await, JobOutcome::Skipped));
}

#[tokio::test]
async fn failed_build_asks_for_retry() {
  let root = tempfile::tempdir().unwrap();
  let (_, repo) = scheduler(&root, BackupSettings::default());
  seed(&root, &repo).await;

  let blocked = root.path().join("blocked");
  fs::write(&blocked, b"x").unwrap();
  let settings = Arc::new(MemorySettings::default());
  let locations = BackupLocations::new(&blocked, root.path().join("work"));
  let scheduler = Scheduler::new(
    ArchiveBuilder::new(repo.clone(), settings.clone(), locations.clone()),
    ArchiveRestorer::new(repo, settings.clone(), locations),
  );

  assert!(matches!(scheduler.run_periodic(now_millis()).await, JobOutcome::Retry));
  assert!(settings.load().unwrap().last_backup_time.is_none());
}

#[tokio::test]
async fn startup_purges_bin_and_sweeps_leftovers() {
  let root = tempfile::tempdir().unwrap();
  let (scheduler, repo) = scheduler(&root, BackupSettings::default());
  seed(&root, &repo).await;
  let patient = repo.list_patients(None).await.unwrap().remove(0);
  let payload = repo.list_files(patient.id).await.unwrap()[0].local_path().unwrap();
  repo.soft_delete_patient(patient.id, 1).await.unwrap();

  let leftover = scheduler
    .builder()
    .locations()
    .new_work_dir(BUILD_WORK_PREFIX)
    .await
    .unwrap();

  let report = scheduler.on_startup(now_millis() + Duration::days(2)).await.unwrap();
  assert_eq!((report.purged.tombstones, report.purged.payloads), (1, 1));
  assert_eq!(report.swept, 1);
  assert!(!payload.exists());
  assert!(!leftover.path().exists());
}

#[tokio::test]
async fn first_launch_restores_newest_backup_once() {
  let root = tempfile::tempdir().unwrap();
  let (old_install, old_repo) = scheduler(&root, BackupSettings::default());
  seed(&root, &old_repo).await;
  old_install.builder().build().await.unwrap();

  let (fresh, fresh_repo) = scheduler(&root, BackupSettings::default());
  let report = fresh.auto_restore_on_first_launch().await.unwrap().unwrap();
  assert_eq!((report.patients_restored, report.files_restored), (1, 1));
  assert_eq!(fresh_repo.counts().await.unwrap().files, 1);
  assert!(fresh.builder().settings().load().unwrap().first_launch_done);

  assert!(fresh.auto_restore_on_first_launch().await.unwrap().is_none());
}

#[tokio::test]
async fn first_launch_with_data_only_marks_done() {
  let root = tempfile::tempdir().unwrap();
  let (scheduler, repo) = scheduler(&root, BackupSettings::default());
  seed(&root, &repo).await;
  scheduler.builder().build().await.unwrap();

  assert!(scheduler.auto_restore_on_first_launch().await.unwrap().is_none());
  assert_eq!(repo.counts().await.unwrap().active, 1);
  assert!(scheduler.builder().settings().load().unwrap().first_launch_done);
}
