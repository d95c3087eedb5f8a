//! Turns stored schedules into timed reminder notifications.
//!
//! Every schedule gets two notifications: a primary one at the next
//! occurrence of its time of day, and a gentle follow-up five minutes later
//! on the quieter [`DeliveryChannel::Gentle`] lane. Handles are not kept
//! anywhere, so a change to any schedule rebuilds the whole set with
//! [`ReminderScheduler::reschedule_all`].

pub mod channel;
pub mod delivery;
pub mod local;
pub mod memory;
pub mod payload;

use std::sync::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};
use log::{error, info, warn};
use thiserror::Error;

use crate::database::DatabaseError;
use crate::models::{Schedule, ScheduleTime};
use channel::{
    ChannelError, DeliveryChannel, NotificationChannel, NotificationHandle, NotificationRequest,
    PermissionStatus,
};
use payload::ReminderPayload;

/// Minutes between a primary reminder and its gentle follow-up
pub const GENTLE_REMINDER_DELAY_MINUTES: i64 = 5;

#[derive(Debug, Error)]
pub enum ReminderError {
    #[error("Notification permission denied")]
    PermissionDenied,
    #[error("Failed to schedule reminder for schedule {schedule_id}: {source}")]
    SchedulingFailure {
        schedule_id: String,
        #[source]
        source: ChannelError,
    },
    #[error("Data not found: {0}")]
    DataNotFound(String),
    #[error("Database error: {0}")]
    Store(#[from] DatabaseError),
}

/// Handles for the pair of notifications registered for one schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderHandles {
    pub primary: NotificationHandle,
    pub gentle: NotificationHandle,
}

/// Outcome of one full reschedule pass
#[derive(Debug, Default)]
pub struct RescheduleReport {
    pub cancelled_previous: bool,
    pub scheduled: Vec<(String, ReminderHandles)>,
    pub failed: Vec<(String, ReminderError)>,
}

impl RescheduleReport {
    pub fn permission_denied(&self) -> bool {
        self.failed
            .iter()
            .any(|(_, e)| matches!(e, ReminderError::PermissionDenied))
    }
}

/// Next occurrence of `time` at or after `now`, in `now`'s time zone.
///
/// Today's occurrence is used unless it is strictly before `now`, in which
/// case the same wall-clock time tomorrow is returned. Seconds and below are
/// always zero.
pub fn next_trigger<Tz: TimeZone>(time: ScheduleTime, now: &DateTime<Tz>) -> DateTime<Tz> {
    let tz = now.timezone();
    let today = now.date_naive();
    let candidate = resolve_local(&tz, today.and_time(time.as_naive_time()));
    if candidate >= *now {
        return candidate;
    }
    let tomorrow = today.succ_opt().unwrap_or(today);
    resolve_local(&tz, tomorrow.and_time(time.as_naive_time()))
}

// Ambiguous wall times take the earlier instant; times skipped by a DST jump
// move forward by an hour.
fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .unwrap_or_else(|| tz.from_utc_datetime(&naive))
}

fn primary_request(schedule: &Schedule, trigger_at: DateTime<Utc>) -> NotificationRequest {
    NotificationRequest {
        trigger_at,
        title: "Medication Reminder! 💊".to_string(),
        body: format!("Time to take your {}.", schedule.medication_name),
        payload: ReminderPayload::Primary {
            schedule_id: schedule.id.clone(),
            medication_name: schedule.medication_name.clone(),
            time: schedule.time,
        },
        channel: DeliveryChannel::Default,
        sound: true,
    }
}

fn gentle_request(schedule: &Schedule, primary_at: DateTime<Utc>) -> NotificationRequest {
    NotificationRequest {
        trigger_at: primary_at + Duration::minutes(GENTLE_REMINDER_DELAY_MINUTES),
        title: "Gentle Reminder 🌿".to_string(),
        body: format!(
            "Just checking in - did you take your {}?",
            schedule.medication_name
        ),
        payload: ReminderPayload::Gentle {
            schedule_id: schedule.id.clone(),
        },
        channel: DeliveryChannel::Gentle,
        sound: false,
    }
}

/// Registers reminders on a [`NotificationChannel`].
///
/// Passes and single registrations made through the same instance are
/// serialized. Separate instances, including ones in other processes sharing
/// the same store, are not coordinated; share one scheduler where passes can
/// overlap.
pub struct ReminderScheduler<C> {
    channel: C,
    pass_guard: Mutex<()>,
    permission_denied_reported: AtomicBool,
}

impl<C: NotificationChannel> ReminderScheduler<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            pass_guard: Mutex::new(()),
            permission_denied_reported: AtomicBool::new(false),
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Register the primary and gentle reminders for one schedule
    pub fn schedule_one(&self, schedule: &Schedule) -> Result<ReminderHandles, ReminderError> {
        self.schedule_one_at(schedule, &Local::now())
    }

    pub fn schedule_one_at<Tz: TimeZone>(
        &self,
        schedule: &Schedule,
        now: &DateTime<Tz>,
    ) -> Result<ReminderHandles, ReminderError> {
        let _pass = self.lock_pass();
        self.register(schedule, now)
    }

    fn lock_pass(&self) -> MutexGuard<'_, ()> {
        self.pass_guard
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register<Tz: TimeZone>(
        &self,
        schedule: &Schedule,
        now: &DateTime<Tz>,
    ) -> Result<ReminderHandles, ReminderError> {
        self.ensure_permission(schedule)?;

        let trigger_at = next_trigger(schedule.time, now).with_timezone(&Utc);
        let failure = |source: ChannelError| {
            error!("Error scheduling notification for schedule {}: {}", schedule.id, source);
            ReminderError::SchedulingFailure {
                schedule_id: schedule.id.clone(),
                source,
            }
        };

        let primary = self
            .channel
            .schedule_at(&primary_request(schedule, trigger_at))
            .map_err(failure)?;
        info!(
            "Notification scheduled for {} at {} with ID: {}",
            schedule.medication_name, schedule.time, primary
        );

        let gentle = self
            .channel
            .schedule_at(&gentle_request(schedule, trigger_at))
            .map_err(failure)?;
        info!(
            "Gentle notification scheduled for {} with ID: {}",
            schedule.medication_name, gentle
        );

        Ok(ReminderHandles { primary, gentle })
    }

    fn ensure_permission(&self, schedule: &Schedule) -> Result<(), ReminderError> {
        match self.channel.request_permission() {
            Ok(PermissionStatus::Granted) => Ok(()),
            Ok(PermissionStatus::Denied) => {
                if !self.permission_denied_reported.swap(true, Ordering::Relaxed) {
                    warn!("Notification permission denied; reminders will not fire until it is granted");
                }
                Err(ReminderError::PermissionDenied)
            }
            Err(source) => {
                error!("Failed to query notification permission: {}", source);
                Err(ReminderError::SchedulingFailure {
                    schedule_id: schedule.id.clone(),
                    source,
                })
            }
        }
    }

    /// Cancel every pending notification, then schedule each of `schedules`
    /// in order. One schedule failing does not stop the others.
    pub fn reschedule_all(&self, schedules: &[Schedule]) -> RescheduleReport {
        self.reschedule_all_at(schedules, &Local::now())
    }

    pub fn reschedule_all_at<Tz: TimeZone>(
        &self,
        schedules: &[Schedule],
        now: &DateTime<Tz>,
    ) -> RescheduleReport {
        let _pass = self.lock_pass();

        let mut report = RescheduleReport::default();
        match self.channel.cancel_all() {
            Ok(()) => {
                report.cancelled_previous = true;
                info!("All scheduled notifications cancelled.");
            }
            Err(e) => error!("Error cancelling all notifications: {}", e),
        }

        info!("Rescheduling {} schedule(s)...", schedules.len());
        for schedule in schedules {
            match self.register(schedule, now) {
                Ok(handles) => report.scheduled.push((schedule.id.clone(), handles)),
                Err(e) => report.failed.push((schedule.id.clone(), e)),
            }
        }
        info!(
            "Finished rescheduling notifications: {} scheduled, {} failed",
            report.scheduled.len(),
            report.failed.len()
        );

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Medication;
    use chrono::FixedOffset;
    use super::memory::MemoryChannel;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn schedule(name: &str, time: &str) -> Schedule {
        let med = Medication::new(name.into(), "1 tablet".into());
        Schedule::new(&med, time.parse().unwrap())
    }

    #[test]
    fn past_time_moves_to_tomorrow() {
        let trigger = next_trigger("08:00".parse().unwrap(), &utc(2024, 1, 1, 9, 0, 0));
        assert_eq!(trigger, utc(2024, 1, 2, 8, 0, 0));
    }

    #[test]
    fn future_time_stays_today() {
        let trigger = next_trigger("08:00".parse().unwrap(), &utc(2024, 1, 1, 7, 0, 0));
        assert_eq!(trigger, utc(2024, 1, 1, 8, 0, 0));
    }

    #[test]
    fn exact_time_fires_today() {
        let trigger = next_trigger("08:00".parse().unwrap(), &utc(2024, 1, 1, 8, 0, 0));
        assert_eq!(trigger, utc(2024, 1, 1, 8, 0, 0));
    }

    #[test]
    fn seconds_past_the_minute_count_as_past() {
        let trigger = next_trigger("08:00".parse().unwrap(), &utc(2024, 1, 1, 8, 0, 1));
        assert_eq!(trigger, utc(2024, 1, 2, 8, 0, 0));
    }

    #[test]
    fn rolls_over_month_and_year_ends() {
        let trigger = next_trigger("06:30".parse().unwrap(), &utc(2023, 12, 31, 22, 0, 0));
        assert_eq!(trigger, utc(2024, 1, 1, 6, 30, 0));
        let trigger = next_trigger("00:00".parse().unwrap(), &utc(2024, 2, 28, 0, 0, 30));
        assert_eq!(trigger, utc(2024, 2, 29, 0, 0, 0));
    }

    #[test]
    fn uses_wall_clock_of_the_given_zone() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let trigger = next_trigger("08:00".parse().unwrap(), &now);
        assert_eq!(trigger, tz.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap());
        assert_eq!(trigger.with_timezone(&Utc), utc(2024, 1, 2, 6, 0, 0));
    }

    #[test]
    fn every_time_of_day_triggers_within_a_day() {
        let now = utc(2024, 6, 15, 13, 27, 45);
        for hour in 0..24u8 {
            for minute in [0u8, 27, 28, 59] {
                let time = ScheduleTime::new(hour, minute).unwrap();
                let trigger = next_trigger(time, &now);
                assert!(trigger >= now);
                assert!(trigger - now < Duration::days(1));
                assert_eq!(trigger.time(), time.as_naive_time());
            }
        }
    }

    #[test]
    fn schedules_primary_and_gentle_pair() {
        let scheduler = ReminderScheduler::new(MemoryChannel::new());
        let s = schedule("Aspirin", "08:00");

        let handles = scheduler
            .schedule_one_at(&s, &utc(2024, 1, 1, 9, 0, 0))
            .unwrap();
        assert_ne!(handles.primary, handles.gentle);

        let pending = scheduler.channel().pending();
        assert_eq!(pending.len(), 2);
        let (primary, gentle) = (&pending[0], &pending[1]);

        assert_eq!(primary.trigger_at, utc(2024, 1, 2, 8, 0, 0));
        assert_eq!(gentle.trigger_at, utc(2024, 1, 2, 8, 5, 0));
        assert_eq!(primary.channel, DeliveryChannel::Default);
        assert_eq!(gentle.channel, DeliveryChannel::Gentle);
        assert!(primary.sound);
        assert!(!gentle.sound);
        assert_eq!(
            primary.payload,
            ReminderPayload::Primary {
                schedule_id: s.id.clone(),
                medication_name: "Aspirin".into(),
                time: s.time,
            }
        );
        assert_eq!(gentle.payload, ReminderPayload::Gentle { schedule_id: s.id.clone() });
        assert_eq!(primary.body, "Time to take your Aspirin.");
    }

    #[test]
    fn gentle_is_always_five_minutes_after_primary() {
        let scheduler = ReminderScheduler::new(MemoryChannel::new());
        let now = utc(2024, 3, 10, 12, 0, 0);
        let schedules: Vec<Schedule> = ["00:00", "11:59", "12:00", "23:57", "23:59"]
            .iter()
            .map(|t| schedule("A", t))
            .collect();
        scheduler.reschedule_all_at(&schedules, &now);

        let pending = scheduler.channel().pending();
        assert_eq!(pending.len(), schedules.len() * 2);
        for pair in pending.chunks(2) {
            assert_eq!(pair[1].trigger_at - pair[0].trigger_at, Duration::minutes(5));
            assert_eq!(pair[0].payload.schedule_id(), pair[1].payload.schedule_id());
        }
    }

    #[test]
    fn reschedule_empty_only_cancels() {
        let channel = MemoryChannel::new();
        let scheduler = ReminderScheduler::new(&channel);
        scheduler
            .schedule_one_at(&schedule("A", "10:00"), &utc(2024, 1, 1, 9, 0, 0))
            .unwrap();

        let report = scheduler.reschedule_all_at(&[], &utc(2024, 1, 1, 9, 0, 0));

        assert!(report.cancelled_previous);
        assert!(report.scheduled.is_empty());
        assert!(report.failed.is_empty());
        assert_eq!(channel.cancel_all_calls(), 1);
        assert!(channel.pending().is_empty());
    }

    #[test]
    fn one_failure_does_not_stop_the_batch() {
        let channel = MemoryChannel::new();
        let broken = schedule("Broken", "08:00");
        let healthy = schedule("Healthy", "09:00");
        channel.fail_for(&broken.id);
        let scheduler = ReminderScheduler::new(&channel);

        let report = scheduler.reschedule_all_at(
            &[broken.clone(), healthy.clone()],
            &utc(2024, 1, 1, 7, 0, 0),
        );

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, broken.id);
        assert!(matches!(
            report.failed[0].1,
            ReminderError::SchedulingFailure { .. }
        ));
        assert_eq!(report.scheduled.len(), 1);
        assert_eq!(report.scheduled[0].0, healthy.id);
        assert!(channel
            .pending()
            .iter()
            .all(|p| p.payload.schedule_id() == healthy.id));
    }

    #[test]
    fn cancel_failure_still_schedules() {
        let channel = MemoryChannel::new();
        channel.fail_cancel_all();
        let scheduler = ReminderScheduler::new(&channel);

        let report =
            scheduler.reschedule_all_at(&[schedule("A", "08:00")], &utc(2024, 1, 1, 7, 0, 0));

        assert!(!report.cancelled_previous);
        assert_eq!(report.scheduled.len(), 1);
    }

    #[test]
    fn denied_permission_schedules_nothing() {
        let channel = MemoryChannel::new().with_permission(PermissionStatus::Denied);
        let scheduler = ReminderScheduler::new(&channel);

        let report = scheduler.reschedule_all_at(
            &[schedule("A", "08:00"), schedule("B", "09:00")],
            &utc(2024, 1, 1, 7, 0, 0),
        );

        assert!(report.permission_denied());
        assert_eq!(report.failed.len(), 2);
        assert!(report.scheduled.is_empty());
        assert!(channel.pending().is_empty());
        assert!(scheduler.permission_denied_reported.load(Ordering::Relaxed));
    }

    #[test]
    fn overlapping_passes_on_one_scheduler_do_not_duplicate() {
        let channel = MemoryChannel::new();
        let scheduler = ReminderScheduler::new(&channel);
        let schedules: Vec<Schedule> = (0..10)
            .map(|i| schedule(&format!("Med {i}"), &format!("{:02}:00", 8 + i)))
            .collect();
        let extra = schedule("Extra", "06:30");
        let now = utc(2024, 1, 1, 7, 0, 0);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    scheduler.reschedule_all_at(&schedules, &now);
                });
            }
            scope.spawn(|| {
                scheduler.schedule_one_at(&extra, &now).unwrap();
            });
        });

        // The single registration lands either before the last pass (and is
        // cancelled) or after it, never in the middle of one
        let pending = channel.pending().len();
        assert!(pending == 20 || pending == 22, "unexpected pending count {pending}");
        assert_eq!(channel.cancel_all_calls(), 4);
    }
}
