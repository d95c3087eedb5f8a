//! What happens when a reminder fires: the payload is decoded, the schedule
//! and medication it points at are looked up, and the user's answer is
//! written to history.

use chrono::{DateTime, Utc};
use log::{info, warn};

use super::ReminderError;
use super::channel::PendingNotification;
use super::payload::ReminderPayload;
use crate::database::Database;
use crate::models::{HistoryEntry, HistoryStatus, Medication, Schedule};

/// A delivered reminder resolved against current data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderAlert {
    pub schedule: Schedule,
    pub medication: Medication,
    pub is_gentle: bool,
}

impl ReminderAlert {
    /// Append a history entry for this alert with the given outcome
    pub fn record(
        &self,
        db: &Database,
        status: HistoryStatus,
        at: DateTime<Utc>,
    ) -> Result<HistoryEntry, ReminderError> {
        let entry = HistoryEntry::record(&self.medication, self.schedule.time, status, at);
        db.append_history(&entry)?;
        Ok(entry)
    }

    pub fn mark_taken(&self, db: &Database, at: DateTime<Utc>) -> Result<HistoryEntry, ReminderError> {
        let entry = self.record(db, HistoryStatus::Taken, at)?;
        info!("{} marked as taken", self.medication.name);
        Ok(entry)
    }
}

/// Decode a raw delivered payload; anything malformed counts as missing data
pub fn decode_payload(raw: &str) -> Result<ReminderPayload, ReminderError> {
    ReminderPayload::decode(raw).map_err(|e| ReminderError::DataNotFound(e.to_string()))
}

/// Look up the schedule and medication a schedule id refers to
pub fn resolve_schedule(db: &Database, schedule_id: &str) -> Result<(Schedule, Medication), ReminderError> {
    let schedule = db
        .get_schedule(schedule_id)?
        .ok_or_else(|| ReminderError::DataNotFound(format!("Schedule not found for ID: {schedule_id}")))?;
    let medication = db.get_medication(&schedule.medication_id)?.ok_or_else(|| {
        ReminderError::DataNotFound(format!(
            "Medication not found for ID: {}",
            schedule.medication_id
        ))
    })?;
    Ok((schedule, medication))
}

pub fn resolve_alert(db: &Database, payload: &ReminderPayload) -> Result<ReminderAlert, ReminderError> {
    let (schedule, medication) = resolve_schedule(db, payload.schedule_id())?;
    Ok(ReminderAlert {
        schedule,
        medication,
        is_gentle: payload.is_gentle(),
    })
}

/// Turn a delivered notification into an alert.
///
/// Returns `Ok(None)` when the payload is malformed or the referenced
/// records no longer exist; that case is logged and the acknowledgment flow
/// simply does not start.
pub fn handle_delivery(
    db: &Database,
    delivered: &PendingNotification,
) -> Result<Option<ReminderAlert>, ReminderError> {
    let resolved = decode_payload(&delivered.payload).and_then(|p| resolve_alert(db, &p));
    match resolved {
        Ok(alert) => Ok(Some(alert)),
        Err(ReminderError::DataNotFound(reason)) => {
            warn!("Ignoring notification {}: {}", delivered.handle, reason);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Record an outcome for a schedule directly, without a delivered payload
pub fn record_for_schedule(
    db: &Database,
    schedule_id: &str,
    status: HistoryStatus,
    at: DateTime<Utc>,
) -> Result<HistoryEntry, ReminderError> {
    let (schedule, medication) = resolve_schedule(db, schedule_id)?;
    let alert = ReminderAlert {
        schedule,
        medication,
        is_gentle: false,
    };
    alert.record(db, status, at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reminders::channel::{DeliveryChannel, NotificationHandle};
    use chrono::TimeZone;

    fn seeded() -> (Database, Medication, Schedule) {
        let db = Database::open_in_memory().unwrap();
        let med = Medication::new("Levothyroxine".into(), "50mcg".into());
        let schedule = Schedule::new(&med, "07:00".parse().unwrap());
        db.insert_medication(&med).unwrap();
        db.insert_schedule(&schedule).unwrap();
        (db, med, schedule)
    }

    fn delivered(payload: &str) -> PendingNotification {
        PendingNotification {
            handle: NotificationHandle("h-1".into()),
            trigger_at: Utc.with_ymd_and_hms(2024, 1, 1, 7, 0, 0).unwrap(),
            channel: DeliveryChannel::Default,
            title: "t".into(),
            body: "b".into(),
            payload: payload.into(),
        }
    }

    #[test]
    fn resolves_gentle_delivery() {
        let (db, med, schedule) = seeded();
        let payload = ReminderPayload::Gentle {
            schedule_id: schedule.id.clone(),
        };

        let alert = handle_delivery(&db, &delivered(&payload.encode().unwrap()))
            .unwrap()
            .unwrap();

        assert!(alert.is_gentle);
        assert_eq!(alert.schedule, schedule);
        assert_eq!(alert.medication, med);
    }

    #[test]
    fn missing_schedule_aborts_quietly() {
        let (db, _, _) = seeded();
        let payload = ReminderPayload::Gentle {
            schedule_id: "gone".into(),
        };
        let outcome = handle_delivery(&db, &delivered(&payload.encode().unwrap())).unwrap();
        assert_eq!(outcome, None);
    }

    #[test]
    fn missing_medication_is_data_not_found() {
        let (db, med, schedule) = seeded();
        db.delete_medication(&med.id).unwrap();

        let result = resolve_schedule(&db, &schedule.id);
        assert!(matches!(result, Err(ReminderError::DataNotFound(_))));
    }

    #[test]
    fn malformed_payload_is_data_not_found() {
        let (db, _, schedule) = seeded();
        let raw = format!(r#"{{"scheduleId":"{}","isGentleReminder":true}}"#, schedule.id);

        assert!(matches!(decode_payload(&raw), Err(ReminderError::DataNotFound(_))));
        assert_eq!(handle_delivery(&db, &delivered(&raw)).unwrap(), None);
    }

    #[test]
    fn marking_taken_appends_history() {
        let (db, med, schedule) = seeded();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 7, 4, 0).unwrap();
        let payload = ReminderPayload::Primary {
            schedule_id: schedule.id.clone(),
            medication_name: med.name.clone(),
            time: schedule.time,
        };
        let alert = resolve_alert(&db, &payload).unwrap();

        let entry = alert.mark_taken(&db, at).unwrap();

        assert_eq!(entry.status(), HistoryStatus::Taken);
        assert_eq!(entry.taken_time(), Some(at));
        assert_eq!(entry.dosage, "50mcg");
        assert_eq!(entry.scheduled_time, schedule.time);
        assert_eq!(db.get_history().unwrap(), vec![entry]);
    }

    #[test]
    fn record_for_schedule_skipped() {
        let (db, _, schedule) = seeded();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();

        let entry = record_for_schedule(&db, &schedule.id, HistoryStatus::Skipped, at).unwrap();

        assert_eq!(entry.status(), HistoryStatus::Skipped);
        assert_eq!(entry.taken_time(), None);
        assert!(matches!(
            record_for_schedule(&db, "missing", HistoryStatus::Missed, at),
            Err(ReminderError::DataNotFound(_))
        ));
    }
}
