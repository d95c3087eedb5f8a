use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Generate a new opaque record id
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Medication {
    pub id: String,
    pub name: String,
    pub dosage: String,
    pub notes: Option<String>,
}

impl Medication {
    pub fn new(name: String, dosage: String) -> Self {
        Self {
            id: new_id(),
            name,
            dosage,
            notes: None,
        }
    }
}

/// One daily trigger time for one medication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub medication_id: String,
    /// Copied from the medication when the schedule is created
    pub medication_name: String,
    pub time: ScheduleTime,
}

impl Schedule {
    pub fn new(medication: &Medication, time: ScheduleTime) -> Self {
        Self {
            id: new_id(),
            medication_id: medication.id.clone(),
            medication_name: medication.name.clone(),
            time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid time '{0}': expected 24-hour HH:MM")]
pub struct ScheduleTimeError(pub String);

/// A validated 24-hour `HH:MM` time of day.
///
/// Both fields are exactly two digits, hours `00`-`23` and minutes `00`-`59`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScheduleTime {
    hour: u8,
    minute: u8,
}

impl ScheduleTime {
    pub fn new(hour: u8, minute: u8) -> Result<Self, ScheduleTimeError> {
        if hour > 23 || minute > 59 {
            return Err(ScheduleTimeError(format!("{:02}:{:02}", hour, minute)));
        }
        Ok(Self { hour, minute })
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    pub fn as_naive_time(&self) -> NaiveTime {
        // Range is checked on construction
        NaiveTime::from_hms_opt(self.hour.into(), self.minute.into(), 0).unwrap_or(NaiveTime::MIN)
    }
}

impl FromStr for ScheduleTime {
    type Err = ScheduleTimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ScheduleTimeError(s.to_string());
        let (hh, mm) = s.split_once(':').ok_or_else(invalid)?;
        if hh.len() != 2 || mm.len() != 2 {
            return Err(invalid());
        }
        if !hh.bytes().chain(mm.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let hour: u8 = hh.parse().map_err(|_| invalid())?;
        let minute: u8 = mm.parse().map_err(|_| invalid())?;
        Self::new(hour, minute).map_err(|_| invalid())
    }
}

impl fmt::Display for ScheduleTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl Serialize for ScheduleTime {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ScheduleTime {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl ToSql for ScheduleTime {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for ScheduleTime {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryStatus {
    Scheduled,
    Taken,
    Missed,
    Skipped,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryStatus::Scheduled => "Scheduled",
            HistoryStatus::Taken => "Taken",
            HistoryStatus::Missed => "Missed",
            HistoryStatus::Skipped => "Skipped",
        }
    }
}

impl fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown history status '{0}'")]
pub struct HistoryStatusError(pub String);

impl FromStr for HistoryStatus {
    type Err = HistoryStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scheduled" => Ok(HistoryStatus::Scheduled),
            "taken" => Ok(HistoryStatus::Taken),
            "missed" => Ok(HistoryStatus::Missed),
            "skipped" => Ok(HistoryStatus::Skipped),
            _ => Err(HistoryStatusError(s.to_string())),
        }
    }
}

impl ToSql for HistoryStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for HistoryStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// Append-only adherence log record.
///
/// `taken_time` is set exactly when `status` is [`HistoryStatus::Taken`].
/// Both fields are private and only set through [`HistoryEntry::record`]
/// or the checked [`HistoryEntry::from_parts`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub id: String,
    pub medication_name: String,
    pub dosage: String,
    pub scheduled_time: ScheduleTime,
    pub event_time: DateTime<Utc>,
    status: HistoryStatus,
    taken_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("history entry {0}: taken time must be present only for Taken entries")]
pub struct HistoryInvariantError(pub String);

impl HistoryEntry {
    pub fn record(
        medication: &Medication,
        scheduled_time: ScheduleTime,
        status: HistoryStatus,
        event_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_id(),
            medication_name: medication.name.clone(),
            dosage: medication.dosage.clone(),
            scheduled_time,
            event_time,
            status,
            taken_time: (status == HistoryStatus::Taken).then_some(event_time),
        }
    }

    /// Rebuild a stored entry, rejecting rows that break the taken-time rule
    pub fn from_parts(
        id: String,
        medication_name: String,
        dosage: String,
        scheduled_time: ScheduleTime,
        event_time: DateTime<Utc>,
        status: HistoryStatus,
        taken_time: Option<DateTime<Utc>>,
    ) -> Result<Self, HistoryInvariantError> {
        if taken_time.is_some() != (status == HistoryStatus::Taken) {
            return Err(HistoryInvariantError(id));
        }
        Ok(Self {
            id,
            medication_name,
            dosage,
            scheduled_time,
            event_time,
            status,
            taken_time,
        })
    }

    pub fn status(&self) -> HistoryStatus {
        self.status
    }

    pub fn taken_time(&self) -> Option<DateTime<Utc>> {
        self.taken_time
    }
}
