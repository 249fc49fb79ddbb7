use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Source system of an inbound webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookProvider {
    Resend,
}

impl WebhookProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            WebhookProvider::Resend => "RESEND",
        }
    }
}

impl std::fmt::Display for WebhookProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookEventStatus {
    Received,
    Processed,
    Failed,
}

impl WebhookEventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WebhookEventStatus::Received => "RECEIVED",
            WebhookEventStatus::Processed => "PROCESSED",
            WebhookEventStatus::Failed => "FAILED",
        }
    }
}

impl std::str::FromStr for WebhookEventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RECEIVED" => Ok(WebhookEventStatus::Received),
            "PROCESSED" => Ok(WebhookEventStatus::Processed),
            "FAILED" => Ok(WebhookEventStatus::Failed),
            other => Err(format!("unknown webhook event status '{}'", other)),
        }
    }
}

impl std::fmt::Display for WebhookEventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deduplication key of a journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub provider: WebhookProvider,
    pub external_id: String,
    pub event_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub provider: String,
    pub external_id: String,
    pub event_type: String,
    pub payload: JsonValue,
    pub signature_ok: bool,
    pub status: WebhookEventStatus,
    pub last_error: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewWebhookEvent {
    pub key: EventKey,
    pub payload: JsonValue,
    pub signature_ok: bool,
}

/// Filter for operator listings of the journal.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub status: Option<WebhookEventStatus>,
    pub limit: i64,
}
