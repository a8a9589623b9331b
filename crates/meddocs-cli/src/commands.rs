//! Subcommand definitions and their handlers.

use std::{path::PathBuf, process::ExitCode, sync::Arc};

use anyhow::{Context as _, bail};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Subcommand};
use meddocs_backup::{BackupInfo, FileSettings, JobOutcome, Scheduler};
use meddocs_core::{
  file::AttachedFile,
  patient::{Patient, PatientStatus, now_millis},
  recycle::{RestoredItem, Tombstone},
  schedule::BackupFrequency,
  settings::SettingsStore,
};
use meddocs_repo::Repository;
use meddocs_store_sqlite::SqliteStore;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};

/// `EX_TEMPFAIL`: the scheduled backup failed and should be retried.
const EXIT_RETRY: u8 = 75;

// ─── Command tree ────────────────────────────────────────────────────────────

#[derive(Subcommand)]
pub enum Command {
  /// Manage patients.
  #[command(subcommand)]
  Patient(PatientCommand),
  /// Manage attached files.
  #[command(subcommand)]
  File(FileCommand),
  /// Inspect and empty the recycle bin.
  #[command(subcommand)]
  Bin(BinCommand),
  /// Create, list and restore backup archives.
  #[command(subcommand)]
  Backup(BackupCommand),
  /// Show or change backup settings.
  #[command(subcommand)]
  Settings(SettingsCommand),
  /// Record counts.
  Stats,
  /// Run startup maintenance, then a scheduled backup if one is due.
  ///
  /// Exits with status 75 when the backup failed and should be retried.
  Tick,
}

#[derive(Subcommand)]
pub enum PatientCommand {
  Add {
    name:   String,
    bed:    String,
    #[command(flatten)]
    fields: PatientFields,
  },
  List {
    #[arg(long)]
    status: Option<PatientStatus>,
  },
  /// Substring search over name, bed and identifier.
  Search { query: String },
  /// A patient and their files.
  Show { id: i64 },
  Update {
    id:     i64,
    #[arg(long)]
    name:   Option<String>,
    #[arg(long)]
    bed:    Option<String>,
    #[command(flatten)]
    fields: PatientFields,
  },
  Discharge {
    id: i64,
    /// Discharge date (YYYY-MM-DD or RFC 3339); defaults to now.
    #[arg(long, value_parser = parse_when)]
    at: Option<DateTime<Utc>>,
  },
  /// Move a patient and their files to the recycle bin.
  Delete {
    id:             i64,
    #[arg(long)]
    retention_days: Option<i64>,
  },
  /// Delete a patient and their payloads immediately.
  Purge { id: i64 },
}

#[derive(Args)]
pub struct PatientFields {
  #[arg(long)]
  id_number: Option<String>,
  #[arg(long)]
  gender:    Option<String>,
  /// Date of birth, or an age in years.
  #[arg(long)]
  dob:       Option<String>,
  #[arg(long)]
  problem:   Option<String>,
  /// Comma-separated tags.
  #[arg(long)]
  tags:      Option<String>,
  /// Admission date (YYYY-MM-DD or RFC 3339).
  #[arg(long, value_parser = parse_when)]
  admitted:  Option<DateTime<Utc>>,
}

impl PatientFields {
  fn apply(self, patient: &mut Patient) {
    if let Some(v) = self.id_number {
      patient.patient_id_number = Some(v);
    }
    if let Some(v) = self.gender {
      patient.gender = Some(v);
    }
    if let Some(v) = self.dob {
      patient.dob = Some(v);
    }
    if let Some(v) = self.problem {
      patient.problem = Some(v);
    }
    if let Some(v) = self.tags {
      patient.tags = Some(v);
    }
    if let Some(v) = self.admitted {
      patient.admission_date = Some(v);
    }
  }
}

#[derive(Subcommand)]
pub enum FileCommand {
  /// Copy a file into the file area and attach it to a patient.
  Attach {
    patient_id: i64,
    path:       PathBuf,
    #[arg(long)]
    name:       Option<String>,
    /// Guessed from the extension when omitted.
    #[arg(long)]
    mime:       Option<String>,
  },
  List {
    patient_id: i64,
    /// Only `image/*` files.
    #[arg(long)]
    images:     bool,
  },
  Rename { id: i64, name: String },
  /// Move a file to the recycle bin.
  Delete {
    id:             i64,
    #[arg(long)]
    retention_days: Option<i64>,
  },
  /// Delete a file and its payload immediately.
  Purge { id: i64 },
}

#[derive(Subcommand)]
pub enum BinCommand {
  List,
  /// Put a binned item back.
  Restore { id: i64 },
  /// Permanently delete one binned item.
  Delete { id: i64 },
  /// Permanently delete every expired item.
  Purge,
  /// Permanently delete everything in the bin.
  Clear,
}

#[derive(Subcommand)]
pub enum BackupCommand {
  Create,
  List {
    /// Read each archive's manifest.
    #[arg(long)]
    details: bool,
  },
  /// Restore an archive, the newest one by default.
  Restore {
    path:           Option<PathBuf>,
    /// Replace the current records instead of merging into them.
    #[arg(long)]
    clear_existing: bool,
  },
  Delete { path: PathBuf },
  /// Show an archive's manifest.
  Info { path: PathBuf },
}

#[derive(Subcommand)]
pub enum SettingsCommand {
  Show,
  Set {
    #[arg(long)]
    auto_backup: Option<bool>,
    /// daily, every-2-days, every-3-days or weekly.
    #[arg(long)]
    frequency:   Option<BackupFrequency>,
  },
}

/// Accept either a calendar date (midnight UTC) or an RFC 3339 timestamp.
fn parse_when(s: &str) -> Result<DateTime<Utc>, String> {
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Ok(dt.with_timezone(&Utc));
  }
  NaiveDate::parse_from_str(s, "%Y-%m-%d")
    .ok()
    .and_then(|d| d.and_hms_opt(0, 0, 0))
    .map(|dt| dt.and_utc())
    .ok_or_else(|| format!("invalid date {s:?}; expected YYYY-MM-DD or RFC 3339"))
}

// ─── App ─────────────────────────────────────────────────────────────────────

pub struct App {
  pub repo:           Arc<Repository<SqliteStore>>,
  pub settings:       Arc<FileSettings>,
  pub scheduler:      Scheduler<SqliteStore, FileSettings>,
  pub retention_days: i64,
  pub json:           bool,
}

impl App {
  pub async fn run(&self, command: Command) -> anyhow::Result<ExitCode> {
    match command {
      Command::Patient(cmd) => self.patient(cmd).await?,
      Command::File(cmd) => self.file(cmd).await?,
      Command::Bin(cmd) => self.bin(cmd).await?,
      Command::Backup(cmd) => self.backup(cmd).await?,
      Command::Settings(cmd) => self.settings(cmd)?,
      Command::Stats => {
        let counts = self.repo.counts().await?;
        self.emit(&counts, |c| {
          println!("active:     {}", c.active);
          println!("discharged: {}", c.discharged);
          println!("files:      {}", c.files);
          println!("in bin:     {}", c.bin_items);
        })?;
      }
      Command::Tick => return self.tick().await,
    }
    Ok(ExitCode::SUCCESS)
  }

  fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce(&T)) -> anyhow::Result<()> {
    if self.json {
      println!("{}", serde_json::to_string_pretty(value)?);
    } else {
      text(value);
    }
    Ok(())
  }

  async fn require_patient(&self, id: i64) -> anyhow::Result<Patient> {
    self
      .repo
      .get_patient(id)
      .await?
      .with_context(|| format!("no patient with id {id}"))
  }

  // ── Patients ──────────────────────────────────────────────────────────

  async fn patient(&self, cmd: PatientCommand) -> anyhow::Result<()> {
    match cmd {
      PatientCommand::Add { name, bed, fields } => {
        let mut patient = Patient::new(name, bed);
        fields.apply(&mut patient);
        let patient = self.repo.add_patient(patient).await?;
        self.emit(&patient, print_patient)
      }
      PatientCommand::List { status } => {
        let patients = self.repo.list_patients(status).await?;
        self.emit(&patients, |ps| ps.iter().for_each(print_patient))
      }
      PatientCommand::Search { query } => {
        let patients = self.repo.search_patients(&query).await?;
        self.emit(&patients, |ps| ps.iter().for_each(print_patient))
      }
      PatientCommand::Show { id } => {
        let patient = self.require_patient(id).await?;
        let files = self.repo.list_files(id).await?;
        let value = json!({ "patient": patient, "files": files });
        self.emit(&value, |_| {
          print_patient(&patient);
          if let Some(problem) = &patient.problem {
            println!("  problem: {problem}");
          }
          let tags = patient.tag_list();
          if !tags.is_empty() {
            println!("  tags:    {}", tags.join(", "));
          }
          files.iter().for_each(print_file);
        })
      }
      PatientCommand::Update { id, name, bed, fields } => {
        let mut patient = self.require_patient(id).await?;
        if let Some(name) = name {
          patient.name = name;
        }
        if let Some(bed) = bed {
          patient.bed_number = bed;
        }
        fields.apply(&mut patient);
        self.repo.update_patient(patient.clone()).await?;
        self.emit(&patient, print_patient)
      }
      PatientCommand::Discharge { id, at } => {
        let patient = self.repo.discharge_patient(id, at).await?;
        self.emit(&patient, print_patient)
      }
      PatientCommand::Delete { id, retention_days } => {
        let days = retention_days.unwrap_or(self.retention_days);
        let Some(tombstone) = self.repo.soft_delete_patient(id, days).await? else {
          bail!("no patient with id {id}");
        };
        self.emit(&tombstone, print_tombstone)
      }
      PatientCommand::Purge { id } => {
        if !self.repo.delete_patient(id).await? {
          bail!("no patient with id {id}");
        }
        self.emit(&json!({ "deleted": id }), |_| println!("deleted patient {id}"))
      }
    }
  }

  // ── Files ─────────────────────────────────────────────────────────────

  async fn file(&self, cmd: FileCommand) -> anyhow::Result<()> {
    match cmd {
      FileCommand::Attach { patient_id, path, name, mime } => {
        let file = self
          .repo
          .attach_file(patient_id, &path, name.as_deref(), mime.as_deref())
          .await?;
        self.emit(&file, print_file)
      }
      FileCommand::List { patient_id, images } => {
        self.require_patient(patient_id).await?;
        let files = if images {
          self.repo.list_image_files(patient_id).await?
        } else {
          self.repo.list_files(patient_id).await?
        };
        self.emit(&files, |fs| fs.iter().for_each(print_file))
      }
      FileCommand::Rename { id, name } => {
        let file = self.repo.rename_file(id, &name).await?;
        self.emit(&file, print_file)
      }
      FileCommand::Delete { id, retention_days } => {
        let days = retention_days.unwrap_or(self.retention_days);
        let Some(tombstone) = self.repo.soft_delete_file(id, days).await? else {
          bail!("no file with id {id}");
        };
        self.emit(&tombstone, print_tombstone)
      }
      FileCommand::Purge { id } => {
        if !self.repo.delete_file(id).await? {
          bail!("no file with id {id}");
        }
        self.emit(&json!({ "deleted": id }), |_| println!("deleted file {id}"))
      }
    }
  }

  // ── Recycle bin ───────────────────────────────────────────────────────

  async fn bin(&self, cmd: BinCommand) -> anyhow::Result<()> {
    match cmd {
      BinCommand::List => {
        let items = self.repo.list_bin().await?;
        self.emit(&items, |ts| ts.iter().for_each(print_tombstone))
      }
      BinCommand::Restore { id } => {
        let Some(restored) = self.repo.restore(id).await? else {
          bail!("no bin item with id {id}");
        };
        match restored {
          RestoredItem::Patient { patient, files } => {
            let value = json!({ "patient": patient, "files": files });
            self.emit(&value, |_| {
              print_patient(&patient);
              files.iter().for_each(print_file);
            })
          }
          RestoredItem::File(file) => self.emit(&file, print_file),
        }
      }
      BinCommand::Delete { id } => {
        if !self.repo.permanently_delete(id).await? {
          bail!("no bin item with id {id}");
        }
        self.emit(&json!({ "deleted": id }), |_| println!("deleted bin item {id}"))
      }
      BinCommand::Purge => {
        let report = self.repo.purge_expired(now_millis()).await?;
        self.emit(&report, |r| {
          println!("purged {} item(s), {} payload(s)", r.tombstones, r.payloads);
          if r.failed > 0 {
            println!("{} item(s) could not be purged and remain in the bin", r.failed);
          }
        })
      }
      BinCommand::Clear => {
        let report = self.repo.clear_bin().await?;
        self.emit(&report, |r| {
          println!("cleared {} item(s), {} payload(s)", r.tombstones, r.payloads);
          if r.failed > 0 {
            println!("{} item(s) could not be purged and remain in the bin", r.failed);
          }
        })
      }
    }
  }

  // ── Backups ───────────────────────────────────────────────────────────

  async fn backup(&self, cmd: BackupCommand) -> anyhow::Result<()> {
    let locations = self.scheduler.builder().locations();
    match cmd {
      BackupCommand::Create => {
        let report = self.scheduler.builder().build().await?;
        self.emit(&report, |r| {
          println!(
            "wrote {} ({} patient(s), {} file(s))",
            r.path.display(),
            r.manifest.patient_count,
            r.manifest.file_count
          );
          if r.skipped_files > 0 {
            println!("skipped {} file(s) with missing payloads", r.skipped_files);
          }
          if r.used_fallback {
            println!("primary backup directory unavailable; used a fallback");
          }
        })
      }
      BackupCommand::List { details } => {
        let backups = if details {
          locations.list_backups_with_manifests().await?
        } else {
          locations.list_backups().await?
        };
        self.emit(&backups, |bs| bs.iter().for_each(print_backup))
      }
      BackupCommand::Restore { path, clear_existing } => {
        let path = match path {
          Some(path) => path,
          None => {
            locations
              .latest_backup()
              .await?
              .context("no backup archives found")?
              .path
          }
        };
        info!(archive = %path.display(), clear_existing, "restoring backup");
        let report = self.scheduler.restorer().restore(&path, clear_existing).await?;
        self.emit(&report, |r| {
          println!(
            "restored {} patient(s), {} file(s); skipped {} patient(s), {} file(s)",
            r.patients_restored, r.files_restored, r.patients_skipped, r.files_skipped
          )
        })
      }
      BackupCommand::Delete { path } => {
        if !locations.delete_backup(&path).await? {
          bail!("no backup at {}", path.display());
        }
        self.emit(&json!({ "deleted": path }), |_| {
          println!("deleted {}", path.display())
        })
      }
      BackupCommand::Info { path } => {
        let manifest = locations.load_manifest(&path).await?;
        self.emit(&manifest, |m| {
          println!("version:  {}", m.version);
          println!("app:      {}", m.app_version);
          println!("device:   {}", m.device_name);
          println!("created:  {}", fmt_time(m.created_at));
          println!("patients: {}", m.patient_count);
          println!("files:    {}", m.file_count);
        })
      }
    }
  }

  // ── Settings ──────────────────────────────────────────────────────────

  fn settings(&self, cmd: SettingsCommand) -> anyhow::Result<()> {
    if let SettingsCommand::Set { auto_backup, frequency } = cmd {
      if let Some(enabled) = auto_backup {
        self.settings.set_auto_backup_enabled(enabled)?;
      }
      if let Some(frequency) = frequency {
        self.settings.set_frequency(frequency)?;
      }
    }
    let settings = self.settings.load()?;
    self.emit(&settings, |s| {
      println!("auto backup: {}", if s.auto_backup_enabled { "on" } else { "off" });
      println!("frequency:   {}", s.frequency);
      match s.last_backup_time {
        Some(at) => println!("last backup: {}", fmt_time(at)),
        None => println!("last backup: never"),
      }
    })
  }

  // ── Maintenance ───────────────────────────────────────────────────────

  async fn tick(&self) -> anyhow::Result<ExitCode> {
    let now = now_millis();
    let startup = self.scheduler.on_startup(now).await?;
    let restored = match self.scheduler.auto_restore_on_first_launch().await {
      Ok(restored) => restored,
      Err(e) => {
        error!(error = %e, "first-launch restore failed");
        None
      }
    };
    let outcome = self.scheduler.run_periodic(now).await;

    let (status, backup) = match &outcome {
      JobOutcome::Completed(report) => ("completed", Some(report)),
      JobOutcome::Skipped => ("skipped", None),
      JobOutcome::Retry => ("retry", None),
    };
    let value = json!({
      "startup": startup,
      "restored": restored,
      "backup": { "status": status, "report": backup },
    });
    self.emit(&value, |_| {
      println!(
        "purged {} bin item(s), swept {} stale work item(s)",
        startup.purged.tombstones, startup.swept
      );
      if let Some(r) = &restored {
        println!(
          "restored {} patient(s), {} file(s) from the latest backup",
          r.patients_restored, r.files_restored
        );
      }
      match backup {
        Some(r) => println!("backup {status}: {}", r.path.display()),
        None => println!("backup {status}"),
      }
    })?;

    Ok(match outcome {
      JobOutcome::Retry => ExitCode::from(EXIT_RETRY),
      _ => ExitCode::SUCCESS,
    })
  }
}

// ─── Text output ─────────────────────────────────────────────────────────────

fn fmt_time(at: DateTime<Utc>) -> String { at.format("%Y-%m-%d %H:%M").to_string() }

fn print_patient(p: &Patient) {
  let id_number = p.patient_id_number.as_deref().unwrap_or("-");
  println!("{:>5}  {:<24} bed {:<6} {:<10} {id_number}", p.id, p.name, p.bed_number, p.status);
}

fn print_file(f: &AttachedFile) {
  println!(
    "{:>5}  {:<32} {:<24} {:>10} B  {}",
    f.id,
    f.file_name,
    f.mime_type,
    f.size,
    fmt_time(f.created_at)
  );
}

fn print_tombstone(t: &Tombstone) {
  println!(
    "{:>5}  {:<8} {:<32} deleted {}  expires {}",
    t.id,
    t.kind,
    t.label,
    fmt_time(t.deleted_at),
    fmt_time(t.expires_at)
  );
}

fn print_backup(b: &BackupInfo) {
  let summary = b
    .manifest
    .as_ref()
    .map(|m| format!("  {} patient(s), {} file(s)", m.patient_count, m.file_count))
    .unwrap_or_default();
  println!("{}  {:>10} B  {}{summary}", b.name, b.size, fmt_time(b.modified));
}
