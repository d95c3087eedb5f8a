use std::thread;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Local, Utc};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use thiserror::Error;

use crate::config::Config;
use crate::database::{Database, DatabaseError};
use crate::models::{HistoryEntry, HistoryStatus, Medication, Schedule, ScheduleTime};
use crate::reminders::channel::{ChannelError, DeliveryChannel};
use crate::reminders::delivery::{self, ReminderAlert};
use crate::reminders::local::LocalChannel;
use crate::reminders::{
    GENTLE_REMINDER_DELAY_MINUTES, ReminderError, ReminderScheduler, RescheduleReport,
};
use crate::utils::format_local;

#[derive(Parser)]
#[command(name = "medtime")]
#[command(about = "Medication schedules, reminders and adherence history")]
#[command(version)]
pub struct Cli {
    /// Custom config file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Use development mode (uses separate dev config/database)
    #[arg(long)]
    pub dev: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Add a medication
    AddMedication {
        /// Medication name
        name: String,
        /// Dosage, e.g. "500mg" or "1 tablet"
        #[arg(long)]
        dosage: String,
        /// Free-form notes
        #[arg(long)]
        notes: Option<String>,
    },
    /// List medications
    Medications,
    /// Remove a medication (its schedules are kept)
    RemoveMedication {
        /// Medication ID
        id: String,
    },
    /// Add a daily reminder time for a medication
    AddSchedule {
        /// Medication ID
        medication_id: String,
        /// Time of day (HH:MM, 24-hour)
        time: ScheduleTime,
    },
    /// Change the time of a schedule
    EditSchedule {
        /// Schedule ID
        id: String,
        /// New time of day (HH:MM, 24-hour)
        time: ScheduleTime,
    },
    /// Remove a schedule and its reminders
    RemoveSchedule {
        /// Schedule ID
        id: String,
    },
    /// List schedules (default if no subcommand)
    Schedules,
    /// Rebuild all pending reminders from the stored schedules
    Reschedule,
    /// List pending reminders
    Pending,
    /// Deliver reminders as they come due
    Watch {
        /// Deliver what is due now and exit
        #[arg(long)]
        once: bool,
    },
    /// Record what happened with a scheduled dose
    Mark {
        /// Schedule ID
        schedule_id: String,
        /// taken, skipped or missed
        #[arg(long, default_value = "taken")]
        status: HistoryStatus,
    },
    /// Show adherence history, newest first
    History,
    /// Delete all medications, schedules, history and pending reminders
    Reset {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DatabaseError),
    #[error("Notification error: {0}")]
    ChannelError(#[from] ChannelError),
    #[error("{0}")]
    ReminderError(#[from] ReminderError),
    #[error("Medication not found: {0}")]
    MedicationNotFound(String),
    #[error("Schedule not found: {0}")]
    ScheduleNotFound(String),
}

fn print_permission_hint(report: &RescheduleReport) {
    if report.permission_denied() {
        println!(
            "Notifications are disabled. Set notifications.permission = \"granted\" in the config to enable reminders."
        );
    }
}

/// Rebuild every reminder from the stored schedules
fn reschedule(db: &Database, config: &Config) -> Result<RescheduleReport, CliError> {
    let schedules = db.get_all_schedules()?;
    let scheduler = ReminderScheduler::new(LocalChannel::new(db, config.notifications.permission));
    let report = scheduler.reschedule_all(&schedules);
    print_permission_hint(&report);
    Ok(report)
}

pub fn handle_add_medication(
    name: String,
    dosage: String,
    notes: Option<String>,
    db: &Database,
) -> Result<(), CliError> {
    let mut medication = Medication::new(name, dosage);
    medication.notes = notes;
    db.insert_medication(&medication)?;
    println!("Medication added (ID: {})", medication.id);
    Ok(())
}

pub fn handle_list_medications(db: &Database) -> Result<(), CliError> {
    let medications = db.get_all_medications()?;
    if medications.is_empty() {
        println!("No medications yet.");
        return Ok(());
    }
    for m in medications {
        match m.notes {
            Some(notes) => println!("{}  {} ({}) - {}", m.id, m.name, m.dosage, notes),
            None => println!("{}  {} ({})", m.id, m.name, m.dosage),
        }
    }
    Ok(())
}

pub fn handle_remove_medication(id: String, db: &Database) -> Result<(), CliError> {
    let orphaned = db.count_schedules_for_medication(&id)?;
    if !db.delete_medication(&id)? {
        return Err(CliError::MedicationNotFound(id));
    }
    println!("Medication removed.");
    if orphaned > 0 {
        warn!("Medication {} removed with {} schedule(s) still referencing it", id, orphaned);
        println!(
            "{} schedule(s) still reference this medication and will keep reminding. Remove them with `medtime remove-schedule`.",
            orphaned
        );
    }
    Ok(())
}

pub fn handle_add_schedule(
    medication_id: String,
    time: ScheduleTime,
    db: &Database,
    config: &Config,
) -> Result<(), CliError> {
    let medication = db
        .get_medication(&medication_id)?
        .ok_or(CliError::MedicationNotFound(medication_id))?;

    let schedule = Schedule::new(&medication, time);
    db.insert_schedule(&schedule)?;
    reschedule(db, config)?;

    db.append_history(&HistoryEntry::record(
        &medication,
        time,
        HistoryStatus::Scheduled,
        Utc::now(),
    ))?;

    println!(
        "Schedule added (ID: {}): {} at {}",
        schedule.id, schedule.medication_name, schedule.time
    );
    Ok(())
}

pub fn handle_edit_schedule(
    id: String,
    time: ScheduleTime,
    db: &Database,
    config: &Config,
) -> Result<(), CliError> {
    let mut schedule = db
        .get_schedule(&id)?
        .ok_or_else(|| CliError::ScheduleNotFound(id.clone()))?;

    schedule.time = time;
    if let Some(medication) = db.get_medication(&schedule.medication_id)? {
        schedule.medication_name = medication.name;
    }
    db.update_schedule(&schedule)?;
    reschedule(db, config)?;

    println!("Schedule {} now at {}", schedule.id, schedule.time);
    Ok(())
}

pub fn handle_remove_schedule(id: String, db: &Database, config: &Config) -> Result<(), CliError> {
    if !db.delete_schedule(&id)? {
        return Err(CliError::ScheduleNotFound(id));
    }
    reschedule(db, config)?;
    println!("Schedule and its reminders removed.");
    Ok(())
}

pub fn handle_list_schedules(db: &Database) -> Result<(), CliError> {
    let schedules = db.get_all_schedules()?;
    if schedules.is_empty() {
        println!("No schedules yet.");
        return Ok(());
    }
    for s in schedules {
        println!("{}  {}  {}", s.id, s.time, s.medication_name);
    }
    Ok(())
}

pub fn handle_reschedule(db: &Database, config: &Config) -> Result<(), CliError> {
    let report = reschedule(db, config)?;
    println!(
        "Reminders rebuilt: {} scheduled, {} failed",
        report.scheduled.len(),
        report.failed.len()
    );
    for (schedule_id, error) in &report.failed {
        if !matches!(error, ReminderError::PermissionDenied) {
            println!("  {}: {}", schedule_id, error);
        }
    }
    Ok(())
}

pub fn handle_pending(db: &Database, config: &Config) -> Result<(), CliError> {
    let channel = LocalChannel::new(db, config.notifications.permission);
    let pending = channel.pending()?;
    if pending.is_empty() {
        println!("No pending reminders.");
        return Ok(());
    }
    for p in pending {
        let lane = match p.channel {
            DeliveryChannel::Default => "",
            DeliveryChannel::Gentle => " (gentle)",
        };
        println!("{}  {}{}", format_local(p.trigger_at), p.body, lane);
    }
    Ok(())
}

fn print_alert(alert: &ReminderAlert) {
    if alert.is_gentle {
        println!("Gentle Reminder ✨");
    } else {
        println!("Time for your medication! 💊");
    }
    println!("  {} ({}) at {}", alert.medication.name, alert.medication.dosage, alert.schedule.time);
    if let Some(notes) = &alert.medication.notes {
        println!("  Notes: {}", notes);
    }
    println!("  Mark as taken: medtime mark {}", alert.schedule.id);
}

/// A reminder delivered more than the gentle window after its trigger is reported as missed
fn is_stale(trigger_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - trigger_at > Duration::minutes(GENTLE_REMINDER_DELAY_MINUTES)
}

/// Deliver reminders due at `now`; after the gentle follow-up fires, arm the next day's pair
fn deliver_due(
    db: &Database,
    scheduler: &ReminderScheduler<LocalChannel<'_>>,
    now: DateTime<Utc>,
) -> Result<usize, CliError> {
    let due = scheduler.channel().deliver_due(now)?;
    for delivered in &due {
        let alert = match delivery::handle_delivery(db, delivered) {
            Ok(Some(alert)) => alert,
            Ok(None) => continue,
            Err(e) => {
                error!("Failed to handle reminder {}: {}", delivered.handle, e);
                continue;
            }
        };

        if is_stale(delivered.trigger_at, now) {
            println!(
                "Missed reminder: {} ({}) was due {}",
                alert.medication.name,
                alert.schedule.time,
                format_local(delivered.trigger_at)
            );
        } else {
            println!("[{}] {}: {}", format_local(delivered.trigger_at), delivered.title, delivered.body);
            print_alert(&alert);
        }

        if alert.is_gentle {
            if let Err(e) = scheduler.schedule_one_at(&alert.schedule, &now.with_timezone(&Local)) {
                warn!("Could not re-arm reminders for schedule {}: {}", alert.schedule.id, e);
            }
        }
    }
    Ok(due.len())
}

pub fn handle_watch(once: bool, db: &Database, config: &Config) -> Result<(), CliError> {
    let scheduler = ReminderScheduler::new(LocalChannel::new(db, config.notifications.permission));
    watch_at(&scheduler, db, Utc::now())?;
    if once {
        return Ok(());
    }

    let interval = StdDuration::from_secs(config.notifications.poll_interval_secs.max(1));
    info!("Watching for due reminders every {}s", interval.as_secs());
    loop {
        thread::sleep(interval);
        deliver_due(db, &scheduler, Utc::now())?;
    }
}

/// Startup step of `watch`: deliver what is already due, then rebuild from the stored schedules
fn watch_at(
    scheduler: &ReminderScheduler<LocalChannel<'_>>,
    db: &Database,
    now: DateTime<Utc>,
) -> Result<(), CliError> {
    deliver_due(db, scheduler, now)?;

    let schedules = db.get_all_schedules()?;
    if !schedules.is_empty() {
        let report = scheduler.reschedule_all_at(&schedules, &now.with_timezone(&Local));
        print_permission_hint(&report);
    }
    Ok(())
}

pub fn handle_mark(schedule_id: String, status: HistoryStatus, db: &Database) -> Result<(), CliError> {
    let entry = delivery::record_for_schedule(db, &schedule_id, status, Utc::now())?;
    println!("{} marked as {}.", entry.medication_name, entry.status());
    Ok(())
}

pub fn handle_history(db: &Database) -> Result<(), CliError> {
    let history = db.get_history()?;
    if history.is_empty() {
        println!("No medication history yet.");
        return Ok(());
    }
    for entry in history {
        print!(
            "{}  {:<9}  {} ({})  scheduled {}",
            format_local(entry.event_time),
            entry.status(),
            entry.medication_name,
            entry.dosage,
            entry.scheduled_time
        );
        match entry.taken_time() {
            Some(taken) => println!("  taken {}", format_local(taken)),
            None => println!(),
        }
    }
    Ok(())
}

pub fn handle_reset(yes: bool, db: &Database) -> Result<(), CliError> {
    if !yes {
        println!("This deletes all medications, schedules, history and reminders. Re-run with --yes to confirm.");
        return Ok(());
    }
    db.clear_all_data()?;
    println!("All data cleared.");
    Ok(())
}
