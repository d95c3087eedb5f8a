use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::ScheduleTime;

/// Data carried by a reminder notification and handed back on delivery.
///
/// Encoded as JSON tagged by `kind`:
///
/// ```json
/// {"kind":"Primary","scheduleId":"...","medicationName":"Aspirin","time":"08:00"}
/// {"kind":"Gentle","scheduleId":"..."}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all_fields = "camelCase")]
pub enum ReminderPayload {
    Primary {
        schedule_id: String,
        medication_name: String,
        time: ScheduleTime,
    },
    Gentle {
        schedule_id: String,
    },
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("malformed reminder payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("reminder payload has an empty schedule id")]
    EmptyScheduleId,
}

impl ReminderPayload {
    pub fn schedule_id(&self) -> &str {
        match self {
            ReminderPayload::Primary { schedule_id, .. } => schedule_id,
            ReminderPayload::Gentle { schedule_id } => schedule_id,
        }
    }

    pub fn is_gentle(&self) -> bool {
        matches!(self, ReminderPayload::Gentle { .. })
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a payload received from the notification platform
    pub fn decode(raw: &str) -> Result<Self, PayloadError> {
        let payload: ReminderPayload = serde_json::from_str(raw)?;
        if payload.schedule_id().trim().is_empty() {
            return Err(PayloadError::EmptyScheduleId);
        }
        Ok(payload)
    }
}
