use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use super::channel::{
    ChannelError, NotificationChannel, NotificationHandle, NotificationRequest, PermissionStatus,
};

/// In-process [`NotificationChannel`] that keeps registered requests in
/// memory. Registration can be made to fail per schedule id, and
/// `cancel_all` can be made to fail, to exercise error paths.
#[derive(Debug, Default)]
pub struct MemoryChannel {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    permission: PermissionStatus,
    failing_schedules: HashSet<String>,
    fail_cancel_all: bool,
    pending: Vec<(NotificationHandle, NotificationRequest)>,
    cancel_all_calls: usize,
    next_handle: u64,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_permission(self, permission: PermissionStatus) -> Self {
        self.lock().permission = permission;
        self
    }

    /// Make every registration whose payload references `schedule_id` fail
    pub fn fail_for(&self, schedule_id: &str) {
        self.lock().failing_schedules.insert(schedule_id.to_string());
    }

    pub fn fail_cancel_all(&self) {
        self.lock().fail_cancel_all = true;
    }

    /// Pending requests in registration order
    pub fn pending(&self) -> Vec<NotificationRequest> {
        self.lock().pending.iter().map(|(_, r)| r.clone()).collect()
    }

    pub fn cancel_all_calls(&self) -> usize {
        self.lock().cancel_all_calls
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl NotificationChannel for MemoryChannel {
    fn request_permission(&self) -> Result<PermissionStatus, ChannelError> {
        Ok(self.lock().permission)
    }

    fn schedule_at(&self, request: &NotificationRequest) -> Result<NotificationHandle, ChannelError> {
        let mut state = self.lock();
        let schedule_id = request.payload.schedule_id();
        if state.failing_schedules.contains(schedule_id) {
            return Err(ChannelError::Rejected(format!(
                "registration refused for schedule {schedule_id}"
            )));
        }
        state.next_handle += 1;
        let handle = NotificationHandle(format!("mem-{}", state.next_handle));
        state.pending.push((handle.clone(), request.clone()));
        Ok(handle)
    }

    fn cancel(&self, handle: &NotificationHandle) -> Result<(), ChannelError> {
        self.lock().pending.retain(|(h, _)| h != handle);
        Ok(())
    }

    fn cancel_all(&self) -> Result<(), ChannelError> {
        let mut state = self.lock();
        state.cancel_all_calls += 1;
        if state.fail_cancel_all {
            return Err(ChannelError::Rejected("cancel all refused".to_string()));
        }
        state.pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reminders::channel::DeliveryChannel;
    use crate::reminders::payload::ReminderPayload;
    use chrono::Utc;

    fn request(schedule_id: &str) -> NotificationRequest {
        NotificationRequest {
            trigger_at: Utc::now(),
            title: "t".into(),
            body: "b".into(),
            payload: ReminderPayload::Gentle {
                schedule_id: schedule_id.into(),
            },
            channel: DeliveryChannel::Gentle,
            sound: false,
        }
    }

    #[test]
    fn cancel_removes_only_that_handle() {
        let channel = MemoryChannel::new();
        let first = channel.schedule_at(&request("a")).unwrap();
        channel.schedule_at(&request("b")).unwrap();

        channel.cancel(&first).unwrap();

        let pending = channel.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].payload.schedule_id(), "b");
    }

    #[test]
    fn failing_schedule_is_rejected() {
        let channel = MemoryChannel::new();
        channel.fail_for("a");
        assert!(matches!(
            channel.schedule_at(&request("a")),
            Err(ChannelError::Rejected(_))
        ));
        assert!(channel.schedule_at(&request("b")).is_ok());
    }
}
