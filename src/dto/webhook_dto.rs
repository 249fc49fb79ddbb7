use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;
use validator::Validate;

use crate::error::{Error, Result};
use crate::models::{webhook_attempt::WebhookAttempt, webhook_event::WebhookEvent};
use crate::utils::validation::validate;

/// Body of an e-mail provider delivery callback.
///
/// Only the fields needed for deduplication and correlation are typed; every
/// other field is ignored here and journaled verbatim.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct EmailWebhookEnvelope {
    #[serde(rename = "type", alias = "event")]
    #[validate(length(min = 1))]
    pub event_type: String,
    #[validate(nested)]
    pub data: EmailWebhookData,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct EmailWebhookData {
    #[serde(alias = "message_id")]
    #[validate(length(min = 1))]
    pub email_id: String,
}

impl EmailWebhookEnvelope {
    /// Decodes a raw request body into the typed envelope plus the verbatim
    /// JSON value.
    pub fn parse(body: &[u8]) -> Result<(Self, JsonValue)> {
        let payload: JsonValue = serde_json::from_slice(body)
            .map_err(|_| Error::BadRequest("invalid_json".into()))?;
        let envelope: Self = serde_json::from_value(payload.clone())
            .map_err(|e| Error::BadRequest(format!("invalid_payload: {}", e)))?;
        validate(&envelope)?;
        Ok((envelope, payload))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub duplicate: bool,
    pub event_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct EventListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct EventDetailResponse {
    pub event: WebhookEvent,
    pub attempts: Vec<WebhookAttempt>,
}
