use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One processing attempt of a journaled webhook event.
///
/// `ok` and `finished_at` stay `None` while the attempt is in flight and are
/// written exactly once when it completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAttempt {
    pub id: Uuid,
    pub webhook_event_id: Uuid,
    pub attempt_number: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub ok: Option<bool>,
    pub error: Option<String>,
}

impl WebhookAttempt {
    pub fn is_in_flight(&self) -> bool {
        self.ok.is_none()
    }
}
