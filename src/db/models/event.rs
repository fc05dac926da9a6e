use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle status of one event's delivery for its currently-claimed year.
/// Absence of the stored column (`NULL`) is equivalent to `Pending` (§3).
///
/// This is the "tagged representation" the design notes call for: the store
/// boundary persists a flat, nullable `TEXT` column (see `EventRecord`); every
/// other component works with this enum via `EventRecord::status()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendingStatus {
    Pending,
    Sending,
    Completed,
    Failed,
}

impl SendingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SendingStatus::Pending => "pending",
            SendingStatus::Sending => "sending",
            SendingStatus::Completed => "completed",
            SendingStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(SendingStatus::Pending),
            "sending" => Some(SendingStatus::Sending),
            "completed" => Some(SendingStatus::Completed),
            "failed" => Some(SendingStatus::Failed),
            _ => None,
        }
    }
}

/// One (user_id, event_type) event record (§3). `event_type` is a small,
/// open-ended enumeration (birthday, anniversary, ...) represented as a plain
/// string, the same way this codebase already represents its own small open
/// enumerations (`notification_type`, `destination_type`) at the repository
/// boundary.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EventRecord {
    pub user_id: String,
    pub event_type: String,
    pub date: String,
    pub notify_local_time: String,
    pub notify_utc: NaiveDateTime,
    pub last_sent_year: i64,
    pub sending_status: Option<String>,
    pub sending_attempted_at: Option<NaiveDateTime>,
    pub sending_completed_at: Option<NaiveDateTime>,
    pub marked_failed_at: Option<NaiveDateTime>,
    pub failure_reason: Option<String>,
    pub webhook_response_code: Option<i64>,
    pub webhook_delivered_at: Option<NaiveDateTime>,
    pub label: Option<String>,
}

impl EventRecord {
    pub fn status(&self) -> SendingStatus {
        self.sending_status
            .as_deref()
            .and_then(SendingStatus::parse)
            .unwrap_or(SendingStatus::Pending)
    }

    /// The (month, day) anniversary components, ignoring the year of `date`.
    pub fn anniversary_month_day(&self) -> Option<(u32, u32)> {
        let parsed = chrono::NaiveDate::parse_from_str(&self.date, "%Y-%m-%d").ok()?;
        use chrono::Datelike;
        Some((parsed.month(), parsed.day()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEvent {
    pub user_id: String,
    pub event_type: String,
    pub date: String,
    pub notify_local_time: String,
    pub notify_utc: NaiveDateTime,
    pub label: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_status_column_is_pending() {
        let record = EventRecord {
            user_id: "u1".into(),
            event_type: "birthday".into(),
            date: "1990-06-15".into(),
            notify_local_time: "09:00".into(),
            notify_utc: chrono::NaiveDateTime::parse_from_str(
                "2026-06-15 09:00:00",
                "%Y-%m-%d %H:%M:%S",
            )
            .unwrap(),
            last_sent_year: 0,
            sending_status: None,
            sending_attempted_at: None,
            sending_completed_at: None,
            marked_failed_at: None,
            failure_reason: None,
            webhook_response_code: None,
            webhook_delivered_at: None,
            label: None,
        };
        assert_eq!(record.status(), SendingStatus::Pending);
        assert_eq!(record.anniversary_month_day(), Some((6, 15)));
    }
}
