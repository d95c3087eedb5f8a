use chrono::{DateTime, Utc};
use log::debug;

use super::channel::{
    ChannelError, NotificationChannel, NotificationHandle, NotificationRequest,
    PendingNotification, PermissionStatus,
};
use crate::database::Database;

/// Notification channel backed by the app database.
///
/// Registered reminders sit in the `pending_notifications` table until a
/// poller collects them with [`LocalChannel::deliver_due`]; each one is
/// delivered at most once.
pub struct LocalChannel<'a> {
    db: &'a Database,
    permission: PermissionStatus,
}

impl<'a> LocalChannel<'a> {
    pub fn new(db: &'a Database, permission: PermissionStatus) -> Self {
        Self { db, permission }
    }

    /// Every pending reminder in trigger order
    pub fn pending(&self) -> Result<Vec<PendingNotification>, ChannelError> {
        Ok(self.db.get_pending_notifications()?)
    }

    /// Remove and return the reminders due at `now`
    pub fn deliver_due(&self, now: DateTime<Utc>) -> Result<Vec<PendingNotification>, ChannelError> {
        let due = self.db.take_due_notifications(now)?;
        if !due.is_empty() {
            debug!("Delivering {} due notification(s)", due.len());
        }
        Ok(due)
    }
}

impl NotificationChannel for LocalChannel<'_> {
    fn request_permission(&self) -> Result<PermissionStatus, ChannelError> {
        Ok(self.permission)
    }

    fn schedule_at(&self, request: &NotificationRequest) -> Result<NotificationHandle, ChannelError> {
        let pending = PendingNotification {
            handle: NotificationHandle(uuid::Uuid::new_v4().to_string()),
            trigger_at: request.trigger_at,
            channel: request.channel,
            title: request.title.clone(),
            body: request.body.clone(),
            payload: request.payload.encode()?,
        };
        self.db.insert_pending_notification(&pending)?;
        Ok(pending.handle)
    }

    fn cancel(&self, handle: &NotificationHandle) -> Result<(), ChannelError> {
        if self.db.delete_pending_notification(handle)? {
            debug!("Notification cancelled: {}", handle);
        }
        Ok(())
    }

    fn cancel_all(&self) -> Result<(), ChannelError> {
        let removed = self.db.delete_all_pending_notifications()?;
        debug!("Cancelled {} pending notification(s)", removed);
        Ok(())
    }
}
