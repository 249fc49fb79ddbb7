//! Persistence contract of the webhook journal.
//!
//! The service only talks to storage through [`WebhookStore`], so the
//! Postgres implementation and the in-memory double are interchangeable.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    outbound_message::DeliveryStatus,
    webhook_attempt::WebhookAttempt,
    webhook_event::{EventFilter, EventKey, NewWebhookEvent, WebhookEvent},
};

/// Result of trying to journal an event.
#[derive(Debug)]
pub enum Journaled {
    /// The event was new; it and its first attempt are now stored.
    Created {
        event: WebhookEvent,
        attempt: WebhookAttempt,
    },
    /// The key was already journaled. `existing` is `None` when the winning
    /// row could not be read back.
    Duplicate { existing: Option<Uuid> },
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WebhookStore: Send + Sync {
    async fn find_event(&self, key: &EventKey) -> Result<Option<WebhookEvent>>;

    /// Inserts the event as `RECEIVED` together with attempt #1 in one
    /// transaction. A uniqueness violation on the key yields
    /// [`Journaled::Duplicate`], not an error.
    async fn journal_event(&self, new_event: NewWebhookEvent) -> Result<Journaled>;

    /// Sets `status` and `updated_at` of the message with this provider id.
    /// Returns `false` when no such message exists.
    async fn project_status(&self, correlation_key: &str, status: DeliveryStatus)
        -> Result<bool>;

    /// Marks the attempt ok and the event `PROCESSED` atomically.
    async fn complete_attempt(&self, event_id: Uuid, attempt_id: Uuid) -> Result<()>;

    /// Marks the attempt failed and the event `FAILED` atomically.
    async fn fail_attempt(&self, event_id: Uuid, attempt_id: Uuid, error: &str) -> Result<()>;

    async fn get_event(&self, id: Uuid) -> Result<Option<WebhookEvent>>;

    async fn list_events(&self, filter: EventFilter) -> Result<Vec<WebhookEvent>>;

    async fn list_attempts(&self, event_id: Uuid) -> Result<Vec<WebhookAttempt>>;
}
