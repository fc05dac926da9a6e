use serde::{Deserialize, Serialize};

/// The greeter queue message (§6.2): the wire shape the scheduler (C4)
/// produces and the sender (C5) consumes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GreeterMessage {
    pub id: String,
    #[serde(rename = "firstName")]
    pub first_name: String,
    #[serde(rename = "lastName")]
    pub last_name: String,
    pub timezone: String,
    pub pk: String,
    pub sk: String,
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(rename = "eventDate")]
    pub event_date: String,
    #[serde(rename = "notifyLocalTime")]
    pub notify_local_time: String,
    #[serde(rename = "lastSentYear")]
    pub last_sent_year: i64,
    #[serde(rename = "yearNow")]
    pub year_now: i64,
}

impl GreeterMessage {
    /// `MessageGroupId = eventType` (§6.2).
    pub fn group_key(&self) -> &str {
        &self.event_type
    }

    /// `MessageDeduplicationId = "{id}-{eventType}-{yearNow}"` (§6.2).
    pub fn dedup_key(&self) -> String {
        format!("{}-{}-{}", self.id, self.event_type, self.year_now)
    }

    /// The webhook `Idempotency-Key` (§6.3) uses the store key, not the
    /// message id: `{pk}-{eventType}-{yearNow}`.
    pub fn idempotency_key(&self) -> String {
        format!("{}-{}-{}", self.pk, self.event_type, self.year_now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> GreeterMessage {
        GreeterMessage {
            id: "user-1".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            timezone: "UTC".into(),
            pk: "USER#user-1".into(),
            sk: "EVENT#birthday".into(),
            event_type: "birthday".into(),
            event_date: "1990-06-15".into(),
            notify_local_time: "09:00".into(),
            last_sent_year: 0,
            year_now: 2026,
        }
    }

    #[test]
    fn wire_shape_round_trips_through_camel_case_json() {
        let msg = sample();
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["firstName"], "Ada");
        assert_eq!(json["lastName"], "Lovelace");
        assert_eq!(json["eventType"], "birthday");
        assert_eq!(json["yearNow"], 2026);
        let back: GreeterMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn dedup_and_idempotency_keys_match_spec_shape() {
        let msg = sample();
        assert_eq!(msg.dedup_key(), "user-1-birthday-2026");
        assert_eq!(msg.idempotency_key(), "USER#user-1-birthday-2026");
        assert_eq!(msg.group_key(), "birthday");
    }
}
