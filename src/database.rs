use rusqlite::{Connection, OptionalExtension};
use std::path::PathBuf;
use thiserror::Error;

use crate::models::{HistoryEntry, Medication, Schedule};
use crate::reminders::channel::{DeliveryChannel, NotificationHandle, PendingNotification};

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),
    #[error("Failed to create database directory: {0}")]
    DirectoryError(String),
}

pub struct Database {
    conn: Connection,
}

const MEDICATION_COLUMNS: &str = "id, name, dosage, notes";
const SCHEDULE_COLUMNS: &str = "id, medication_id, medication_name, time";
const HISTORY_COLUMNS: &str =
    "id, medication_name, dosage, scheduled_time, event_time, status, taken_time";
const PENDING_COLUMNS: &str = "handle, trigger_at, channel, title, body, payload";

impl Database {
    /// Open (or create) the database file and initialize the schema
    pub fn new(path: &str) -> Result<Self, DatabaseError> {
        let db_path = PathBuf::from(path);

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DatabaseError::DirectoryError(e.to_string()))?;
            }
        }

        let conn = Connection::open(&db_path)?;
        let db = Database { conn };
        db.initialize_schema()?;
        log::debug!("Opened database at {}", db_path.display());

        Ok(db)
    }

    /// Open a private in-memory database with the full schema
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let db = Database {
            conn: Connection::open_in_memory()?,
        };
        db.initialize_schema()?;
        Ok(db)
    }

    fn initialize_schema(&self) -> Result<(), DatabaseError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS medications (
                id              TEXT PRIMARY KEY,
                name            TEXT NOT NULL,
                dosage          TEXT NOT NULL,
                notes           TEXT
            );

            CREATE TABLE IF NOT EXISTS schedules (
                id              TEXT PRIMARY KEY,
                medication_id   TEXT NOT NULL,
                medication_name TEXT NOT NULL,
                time            TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS history (
                id              TEXT PRIMARY KEY,
                medication_name TEXT NOT NULL,
                dosage          TEXT NOT NULL,
                scheduled_time  TEXT NOT NULL,
                event_time      TEXT NOT NULL,
                status          TEXT NOT NULL,
                taken_time      TEXT
            );

            CREATE TABLE IF NOT EXISTS pending_notifications (
                handle          TEXT PRIMARY KEY,
                trigger_at      TEXT NOT NULL,
                channel         TEXT NOT NULL,
                title           TEXT NOT NULL,
                body            TEXT NOT NULL,
                payload         TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_schedules_medication_id ON schedules(medication_id);
            CREATE INDEX IF NOT EXISTS idx_history_event_time ON history(event_time);
            CREATE INDEX IF NOT EXISTS idx_pending_trigger_at ON pending_notifications(trigger_at);",
        )?;
        Ok(())
    }

    /// Get a reference to the underlying connection
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // --- Medications ---

    fn row_to_medication(row: &rusqlite::Row) -> Result<Medication, rusqlite::Error> {
        Ok(Medication {
            id: row.get(0)?,
            name: row.get(1)?,
            dosage: row.get(2)?,
            notes: row.get(3)?,
        })
    }

    pub fn insert_medication(&self, medication: &Medication) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT INTO medications (id, name, dosage, notes) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                medication.id,
                medication.name,
                medication.dosage,
                medication.notes
            ],
        )?;
        Ok(())
    }

    /// Get all medications ordered by name
    pub fn get_all_medications(&self) -> Result<Vec<Medication>, DatabaseError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MEDICATION_COLUMNS} FROM medications ORDER BY name COLLATE NOCASE ASC"
        ))?;
        let medications = stmt
            .query_map([], Self::row_to_medication)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(medications)
    }

    pub fn get_medication(&self, id: &str) -> Result<Option<Medication>, DatabaseError> {
        let medication = self
            .conn
            .query_row(
                &format!("SELECT {MEDICATION_COLUMNS} FROM medications WHERE id = ?1"),
                rusqlite::params![id],
                Self::row_to_medication,
            )
            .optional()?;
        Ok(medication)
    }

    /// Delete a medication by ID and report whether a row was removed.
    /// Schedules that reference it are left in place.
    pub fn delete_medication(&self, id: &str) -> Result<bool, DatabaseError> {
        let removed = self
            .conn
            .execute("DELETE FROM medications WHERE id = ?1", rusqlite::params![id])?;
        Ok(removed > 0)
    }

    /// Replace the whole medications collection
    pub fn save_medications(&self, medications: &[Medication]) -> Result<(), DatabaseError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM medications", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO medications (id, name, dosage, notes) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for m in medications {
                stmt.execute(rusqlite::params![m.id, m.name, m.dosage, m.notes])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    // --- Schedules ---

    fn row_to_schedule(row: &rusqlite::Row) -> Result<Schedule, rusqlite::Error> {
        Ok(Schedule {
            id: row.get(0)?,
            medication_id: row.get(1)?,
            medication_name: row.get(2)?,
            time: row.get(3)?,
        })
    }

    pub fn insert_schedule(&self, schedule: &Schedule) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT INTO schedules (id, medication_id, medication_name, time) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                schedule.id,
                schedule.medication_id,
                schedule.medication_name,
                schedule.time
            ],
        )?;
        Ok(())
    }

    /// Get all schedules ordered by time of day
    pub fn get_all_schedules(&self) -> Result<Vec<Schedule>, DatabaseError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules ORDER BY time ASC, rowid ASC"
        ))?;
        let schedules = stmt
            .query_map([], Self::row_to_schedule)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(schedules)
    }

    pub fn get_schedule(&self, id: &str) -> Result<Option<Schedule>, DatabaseError> {
        let schedule = self
            .conn
            .query_row(
                &format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = ?1"),
                rusqlite::params![id],
                Self::row_to_schedule,
            )
            .optional()?;
        Ok(schedule)
    }

    /// Update an existing schedule, returning false when no row matched
    pub fn update_schedule(&self, schedule: &Schedule) -> Result<bool, DatabaseError> {
        let updated = self.conn.execute(
            "UPDATE schedules SET medication_id = ?1, medication_name = ?2, time = ?3 WHERE id = ?4",
            rusqlite::params![
                schedule.medication_id,
                schedule.medication_name,
                schedule.time,
                schedule.id
            ],
        )?;
        Ok(updated > 0)
    }

    pub fn delete_schedule(&self, id: &str) -> Result<bool, DatabaseError> {
        let removed = self
            .conn
            .execute("DELETE FROM schedules WHERE id = ?1", rusqlite::params![id])?;
        Ok(removed > 0)
    }

    pub fn count_schedules_for_medication(&self, medication_id: &str) -> Result<i64, DatabaseError> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM schedules WHERE medication_id = ?1",
            rusqlite::params![medication_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Replace the whole schedules collection
    pub fn save_schedules(&self, schedules: &[Schedule]) -> Result<(), DatabaseError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM schedules", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO schedules (id, medication_id, medication_name, time) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for s in schedules {
                stmt.execute(rusqlite::params![s.id, s.medication_id, s.medication_name, s.time])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    // --- History ---

    fn row_to_history(row: &rusqlite::Row) -> Result<HistoryEntry, rusqlite::Error> {
        HistoryEntry::from_parts(
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
        )
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })
    }

    fn insert_history_row(conn: &Connection, entry: &HistoryEntry) -> Result<(), rusqlite::Error> {
        conn.execute(
            "INSERT INTO history (id, medication_name, dosage, scheduled_time, event_time, status, taken_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                entry.id,
                entry.medication_name,
                entry.dosage,
                entry.scheduled_time,
                entry.event_time,
                entry.status(),
                entry.taken_time()
            ],
        )?;
        Ok(())
    }

    /// Append one entry to the history log
    pub fn append_history(&self, entry: &HistoryEntry) -> Result<(), DatabaseError> {
        Self::insert_history_row(&self.conn, entry)?;
        log::info!(
            "History entry added: {} - {} at {}",
            entry.status(),
            entry.medication_name,
            entry.event_time.to_rfc3339()
        );
        Ok(())
    }

    /// Get the full history log, newest first
    pub fn get_history(&self) -> Result<Vec<HistoryEntry>, DatabaseError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {HISTORY_COLUMNS} FROM history ORDER BY event_time DESC, rowid DESC"
        ))?;
        let history = stmt
            .query_map([], Self::row_to_history)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(history)
    }

    /// Replace the whole history collection
    pub fn save_history(&self, history: &[HistoryEntry]) -> Result<(), DatabaseError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM history", [])?;
        for entry in history {
            Self::insert_history_row(&tx, entry)?;
        }
        tx.commit()?;
        Ok(())
    }

    // --- Pending notifications ---

    fn row_to_pending(row: &rusqlite::Row) -> Result<PendingNotification, rusqlite::Error> {
        let channel: String = row.get(2)?;
        let channel = channel.parse::<DeliveryChannel>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(PendingNotification {
            handle: NotificationHandle(row.get(0)?),
            trigger_at: row.get(1)?,
            channel,
            title: row.get(3)?,
            body: row.get(4)?,
            payload: row.get(5)?,
        })
    }

    pub fn insert_pending_notification(
        &self,
        pending: &PendingNotification,
    ) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT INTO pending_notifications (handle, trigger_at, channel, title, body, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                pending.handle.0,
                pending.trigger_at,
                pending.channel.as_str(),
                pending.title,
                pending.body,
                pending.payload
            ],
        )?;
        Ok(())
    }

    /// All pending notifications in trigger order
    pub fn get_pending_notifications(&self) -> Result<Vec<PendingNotification>, DatabaseError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PENDING_COLUMNS} FROM pending_notifications ORDER BY trigger_at ASC, rowid ASC"
        ))?;
        let pending = stmt
            .query_map([], Self::row_to_pending)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pending)
    }

    pub fn delete_pending_notification(&self, handle: &NotificationHandle) -> Result<bool, DatabaseError> {
        let removed = self.conn.execute(
            "DELETE FROM pending_notifications WHERE handle = ?1",
            rusqlite::params![handle.0],
        )?;
        Ok(removed > 0)
    }

    pub fn delete_all_pending_notifications(&self) -> Result<usize, DatabaseError> {
        let removed = self.conn.execute("DELETE FROM pending_notifications", [])?;
        Ok(removed)
    }

    /// Remove and return every notification whose trigger is at or before `now`
    pub fn take_due_notifications(
        &self,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<PendingNotification>, DatabaseError> {
        let tx = self.conn.unchecked_transaction()?;
        let due = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {PENDING_COLUMNS} FROM pending_notifications
                 WHERE trigger_at <= ?1 ORDER BY trigger_at ASC, rowid ASC"
            ))?;
            stmt.query_map(rusqlite::params![now], Self::row_to_pending)?
                .collect::<Result<Vec<_>, _>>()?
        };
        for pending in &due {
            tx.execute(
                "DELETE FROM pending_notifications WHERE handle = ?1",
                rusqlite::params![pending.handle.0],
            )?;
        }
        tx.commit()?;
        Ok(due)
    }

    /// Remove every record from every collection, including pending reminders
    pub fn clear_all_data(&self) -> Result<(), DatabaseError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM medications", [])?;
        tx.execute("DELETE FROM schedules", [])?;
        tx.execute("DELETE FROM history", [])?;
        tx.execute("DELETE FROM pending_notifications", [])?;
        tx.commit()?;
        log::info!("All app data cleared");
        Ok(())
    }
}
