//! The notification facility reminders are registered with.
//!
//! A [`NotificationChannel`] can register a timed notification, cancel one by
//! handle, cancel everything, and answer whether the user allows
//! notifications at all. Delivery is pull-based for the implementations in
//! this crate: the host asks the channel for due notifications and hands
//! each raw payload to [`super::delivery`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::payload::ReminderPayload;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Notification store error: {0}")]
    Store(#[from] crate::database::DatabaseError),
    #[error("Failed to encode payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("Notification platform rejected the request: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PermissionStatus {
    #[default]
    Granted,
    Denied,
}

/// Which delivery lane a notification uses. `Gentle` is quieter and lower
/// priority where the platform tells lanes apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryChannel {
    Default,
    Gentle,
}

impl DeliveryChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryChannel::Default => "default",
            DeliveryChannel::Gentle => "gentle",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown delivery channel '{0}'")]
pub struct UnknownDeliveryChannel(pub String);

impl FromStr for DeliveryChannel {
    type Err = UnknownDeliveryChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(DeliveryChannel::Default),
            "gentle" => Ok(DeliveryChannel::Gentle),
            other => Err(UnknownDeliveryChannel(other.to_string())),
        }
    }
}

/// Opaque identifier for one registered notification
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NotificationHandle(pub String);

impl fmt::Display for NotificationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationRequest {
    pub trigger_at: DateTime<Utc>,
    pub title: String,
    pub body: String,
    pub payload: ReminderPayload,
    pub channel: DeliveryChannel,
    pub sound: bool,
}

/// A registered notification as the channel stores it. `payload` is the
/// raw encoded form and is only trusted after decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingNotification {
    pub handle: NotificationHandle,
    pub trigger_at: DateTime<Utc>,
    pub channel: DeliveryChannel,
    pub title: String,
    pub body: String,
    pub payload: String,
}

pub trait NotificationChannel {
    fn request_permission(&self) -> Result<PermissionStatus, ChannelError>;

    fn schedule_at(&self, request: &NotificationRequest) -> Result<NotificationHandle, ChannelError>;

    fn cancel(&self, handle: &NotificationHandle) -> Result<(), ChannelError>;

    /// Cancel every pending notification, whoever registered it
    fn cancel_all(&self) -> Result<(), ChannelError>;
}

impl<C: NotificationChannel + ?Sized> NotificationChannel for &C {
    fn request_permission(&self) -> Result<PermissionStatus, ChannelError> {
        (**self).request_permission()
    }

    fn schedule_at(&self, request: &NotificationRequest) -> Result<NotificationHandle, ChannelError> {
        (**self).schedule_at(request)
    }

    fn cancel(&self, handle: &NotificationHandle) -> Result<(), ChannelError> {
        (**self).cancel(handle)
    }

    fn cancel_all(&self) -> Result<(), ChannelError> {
        (**self).cancel_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_channel_names_round_trip() {
        for channel in [DeliveryChannel::Default, DeliveryChannel::Gentle] {
            assert_eq!(channel.as_str().parse::<DeliveryChannel>().unwrap(), channel);
        }
        assert!("loud".parse::<DeliveryChannel>().is_err());
    }

    #[test]
    fn permission_status_uses_lowercase_names() {
        let parsed: PermissionStatus = serde_json::from_str("\"denied\"").unwrap();
        assert_eq!(parsed, PermissionStatus::Denied);
        assert_eq!(PermissionStatus::default(), PermissionStatus::Granted);
    }
}
