//! Backup timing arithmetic.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// How often an automatic backup should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupFrequency {
  #[default]
  Daily,
  #[serde(rename = "every-2-days")]
  Every2Days,
  #[serde(rename = "every-3-days")]
  Every3Days,
  Weekly,
}

impl BackupFrequency {
  pub const ALL: [Self; 4] =
    [Self::Daily, Self::Every2Days, Self::Every3Days, Self::Weekly];

  pub fn interval(&self) -> Duration {
    match self {
      Self::Daily => Duration::days(1),
      Self::Every2Days => Duration::days(2),
      Self::Every3Days => Duration::days(3),
      Self::Weekly => Duration::days(7),
    }
  }

  /// Machine-readable name, as accepted by [`FromStr`].
  pub fn key(&self) -> &'static str {
    match self {
      Self::Daily => "daily",
      Self::Every2Days => "every-2-days",
      Self::Every3Days => "every-3-days",
      Self::Weekly => "weekly",
    }
  }
}

impl fmt::Display for BackupFrequency {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::Daily => "Daily",
      Self::Every2Days => "Every 2 days",
      Self::Every3Days => "Every 3 days",
      Self::Weekly => "Weekly",
    })
  }
}

impl FromStr for BackupFrequency {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::ALL
      .into_iter()
      .find(|f| f.key() == s)
      .ok_or_else(|| {
        format!("unknown frequency {s:?}; expected daily, every-2-days, every-3-days or weekly")
      })
  }
}

/// `true` when no backup was ever taken or `frequency` has elapsed since the
/// last one.
pub fn is_backup_due(
  now: DateTime<Utc>,
  last_backup: Option<DateTime<Utc>>,
  frequency: BackupFrequency,
) -> bool {
  match last_backup {
    None => true,
    Some(last) => now - last >= frequency.interval(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn at(hours: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap() + Duration::hours(hours)
  }

  #[test]
  fn never_backed_up_is_due() {
    assert!(is_backup_due(at(0), None, BackupFrequency::Weekly));
  }

  #[test]
  fn due_exactly_at_the_interval() {
    let last = Some(at(0));
    assert!(!is_backup_due(at(23), last, BackupFrequency::Daily));
    assert!(is_backup_due(at(24), last, BackupFrequency::Daily));
    assert!(!is_backup_due(at(47), last, BackupFrequency::Every2Days));
    assert!(is_backup_due(at(72), last, BackupFrequency::Every3Days));
    assert!(!is_backup_due(at(24 * 6), last, BackupFrequency::Weekly));
  }

  #[test]
  fn parse_and_display() {
    assert_eq!(
      "every-3-days".parse::<BackupFrequency>().unwrap(),
      BackupFrequency::Every3Days
    );
    assert!("hourly".parse::<BackupFrequency>().is_err());
    assert_eq!(BackupFrequency::Every2Days.to_string(), "Every 2 days");
    assert_eq!(
      serde_json::to_string(&BackupFrequency::Every2Days).unwrap(),
      "\"every-2-days\""
    );
  }
}
