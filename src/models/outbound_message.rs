use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery state of an outbound e-mail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Queued,
    Sent,
    Delivered,
    Bounced,
    Complained,
    Delayed,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Queued => "QUEUED",
            DeliveryStatus::Sent => "SENT",
            DeliveryStatus::Delivered => "DELIVERED",
            DeliveryStatus::Bounced => "BOUNCED",
            DeliveryStatus::Complained => "COMPLAINED",
            DeliveryStatus::Delayed => "DELAYED",
        }
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(DeliveryStatus::Queued),
            "SENT" => Ok(DeliveryStatus::Sent),
            "DELIVERED" => Ok(DeliveryStatus::Delivered),
            "BOUNCED" => Ok(DeliveryStatus::Bounced),
            "COMPLAINED" => Ok(DeliveryStatus::Complained),
            "DELAYED" => Ok(DeliveryStatus::Delayed),
            other => Err(format!("unknown delivery status '{}'", other)),
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// E-mail event names as pushed by the provider.
///
/// Resend sends `email.delivered` style names; the bare form is accepted too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmailEventKind {
    Sent,
    Delivered,
    Bounced,
    Complained,
    DeliveryDelayed,
    Other(String),
}

impl EmailEventKind {
    pub fn parse(raw: &str) -> Self {
        let name = raw.trim();
        let name = name.strip_prefix("email.").unwrap_or(name);
        match name {
            "sent" => EmailEventKind::Sent,
            "delivered" => EmailEventKind::Delivered,
            "bounced" => EmailEventKind::Bounced,
            "complained" => EmailEventKind::Complained,
            "delivery_delayed" => EmailEventKind::DeliveryDelayed,
            other => EmailEventKind::Other(other.to_string()),
        }
    }

    /// Status the correlated message moves to, or `None` when the event is
    /// informational.
    pub fn projected_status(&self) -> Option<DeliveryStatus> {
        match self {
            EmailEventKind::Sent => Some(DeliveryStatus::Sent),
            EmailEventKind::Delivered => Some(DeliveryStatus::Delivered),
            EmailEventKind::Bounced => Some(DeliveryStatus::Bounced),
            EmailEventKind::Complained => Some(DeliveryStatus::Complained),
            EmailEventKind::DeliveryDelayed | EmailEventKind::Other(_) => None,
        }
    }
}

/// Row of the e-mail sender's `outbound_messages` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: Uuid,
    pub provider_message_id: Option<String>,
    pub recipient: String,
    pub subject: Option<String>,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
