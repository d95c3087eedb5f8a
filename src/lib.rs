pub mod cli;
pub mod config;
pub mod database;
pub mod models;
pub mod reminders;
pub mod utils;

pub use config::Config;
pub use database::Database;
pub use models::{HistoryEntry, HistoryStatus, Medication, Schedule, ScheduleTime};
pub use reminders::{ReminderScheduler, next_trigger};
pub use utils::Profile;
