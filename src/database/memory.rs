//! In-memory [`WebhookStore`] used as a test double.
//!
//! Enforces the same key uniqueness and all-or-nothing finalize semantics as
//! the Postgres store, and can be told to fail projections to simulate a
//! data-store outage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::database::store::{Journaled, WebhookStore};
use crate::error::{Error, Result};
use crate::models::{
    outbound_message::{DeliveryStatus, OutboundMessage},
    webhook_attempt::WebhookAttempt,
    webhook_event::{EventFilter, EventKey, NewWebhookEvent, WebhookEvent, WebhookEventStatus},
};

#[derive(Default)]
struct Tables {
    events: Vec<WebhookEvent>,
    attempts: Vec<WebhookAttempt>,
    messages: HashMap<String, OutboundMessage>,
}

#[derive(Default)]
pub struct MemoryWebhookStore {
    tables: Mutex<Tables>,
    projection_failure: Mutex<Option<String>>,
    projection_calls: AtomicUsize,
}

impl MemoryWebhookStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| Error::Internal("memory store poisoned".into()))
    }

    /// Seeds an outbound message the way the e-mail sender would.
    pub fn insert_message(
        &self,
        provider_message_id: &str,
        recipient: &str,
        status: DeliveryStatus,
    ) -> Result<OutboundMessage> {
        let now = Utc::now();
        let message = OutboundMessage {
            id: Uuid::new_v4(),
            provider_message_id: Some(provider_message_id.to_string()),
            recipient: recipient.to_string(),
            subject: None,
            status,
            created_at: now,
            updated_at: now,
        };
        self.tables()?
            .messages
            .insert(provider_message_id.to_string(), message.clone());
        Ok(message)
    }

    pub fn message(&self, provider_message_id: &str) -> Result<Option<OutboundMessage>> {
        Ok(self.tables()?.messages.get(provider_message_id).cloned())
    }

    pub fn events(&self) -> Result<Vec<WebhookEvent>> {
        Ok(self.tables()?.events.clone())
    }

    pub fn attempts(&self) -> Result<Vec<WebhookAttempt>> {
        Ok(self.tables()?.attempts.clone())
    }

    /// Makes every following `project_status` call fail with `message`.
    pub fn fail_projections_with(&self, message: impl Into<String>) {
        if let Ok(mut slot) = self.projection_failure.lock() {
            *slot = Some(message.into());
        }
    }

    pub fn clear_projection_failure(&self) {
        if let Ok(mut slot) = self.projection_failure.lock() {
            *slot = None;
        }
    }

    pub fn projection_calls(&self) -> usize {
        self.projection_calls.load(Ordering::SeqCst)
    }
}

fn matches_key(event: &WebhookEvent, key: &EventKey) -> bool {
    event.provider == key.provider.as_str()
        && event.external_id == key.external_id
        && event.event_type == key.event_type
}

#[async_trait]
impl WebhookStore for MemoryWebhookStore {
    async fn find_event(&self, key: &EventKey) -> Result<Option<WebhookEvent>> {
        Ok(self
            .tables()?
            .events
            .iter()
            .find(|e| matches_key(e, key))
            .cloned())
    }

    async fn journal_event(&self, new_event: NewWebhookEvent) -> Result<Journaled> {
        let mut tables = self.tables()?;
        if let Some(existing) = tables.events.iter().find(|e| matches_key(e, &new_event.key)) {
            return Ok(Journaled::Duplicate {
                existing: Some(existing.id),
            });
        }

        let now = Utc::now();
        let event = WebhookEvent {
            id: Uuid::new_v4(),
            provider: new_event.key.provider.as_str().to_string(),
            external_id: new_event.key.external_id,
            event_type: new_event.key.event_type,
            payload: new_event.payload,
            signature_ok: new_event.signature_ok,
            status: WebhookEventStatus::Received,
            last_error: None,
            received_at: now,
            processed_at: None,
        };
        let attempt = WebhookAttempt {
            id: Uuid::new_v4(),
            webhook_event_id: event.id,
            attempt_number: 1,
            started_at: now,
            finished_at: None,
            ok: None,
            error: None,
        };
        tables.events.push(event.clone());
        tables.attempts.push(attempt.clone());
        Ok(Journaled::Created { event, attempt })
    }

    async fn project_status(
        &self,
        correlation_key: &str,
        status: DeliveryStatus,
    ) -> Result<bool> {
        self.projection_calls.fetch_add(1, Ordering::SeqCst);
        let failure = self
            .projection_failure
            .lock()
            .map_err(|_| Error::Internal("memory store poisoned".into()))?
            .clone();
        if let Some(message) = failure {
            return Err(Error::Database(sqlx::Error::Protocol(message)));
        }

        let mut tables = self.tables()?;
        match tables.messages.get_mut(correlation_key) {
            Some(message) => {
                message.status = status;
                message.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn complete_attempt(&self, event_id: Uuid, attempt_id: Uuid) -> Result<()> {
        let mut tables = self.tables()?;
        let now = Utc::now();

        let attempt_idx = tables
            .attempts
            .iter()
            .position(|a| a.id == attempt_id && a.webhook_event_id == event_id)
            .ok_or_else(|| Error::NotFound(format!("webhook attempt {}", attempt_id)))?;
        let event_idx = tables
            .events
            .iter()
            .position(|e| e.id == event_id)
            .ok_or_else(|| Error::NotFound(format!("webhook event {}", event_id)))?;

        let attempt = &mut tables.attempts[attempt_idx];
        attempt.ok = Some(true);
        attempt.error = None;
        attempt.finished_at = Some(now);

        let event = &mut tables.events[event_idx];
        event.status = WebhookEventStatus::Processed;
        event.processed_at = Some(now);
        event.last_error = None;
        Ok(())
    }

    async fn fail_attempt(&self, event_id: Uuid, attempt_id: Uuid, error: &str) -> Result<()> {
        let mut tables = self.tables()?;
        let now = Utc::now();

        let attempt_idx = tables
            .attempts
            .iter()
            .position(|a| a.id == attempt_id && a.webhook_event_id == event_id)
            .ok_or_else(|| Error::NotFound(format!("webhook attempt {}", attempt_id)))?;
        let event_idx = tables
            .events
            .iter()
            .position(|e| e.id == event_id)
            .ok_or_else(|| Error::NotFound(format!("webhook event {}", event_id)))?;

        let attempt = &mut tables.attempts[attempt_idx];
        attempt.ok = Some(false);
        attempt.error = Some(error.to_string());
        attempt.finished_at = Some(now);

        let event = &mut tables.events[event_idx];
        event.status = WebhookEventStatus::Failed;
        event.last_error = Some(error.to_string());
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<WebhookEvent>> {
        Ok(self.tables()?.events.iter().find(|e| e.id == id).cloned())
    }

    async fn list_events(&self, filter: EventFilter) -> Result<Vec<WebhookEvent>> {
        let tables = self.tables()?;
        let mut events: Vec<WebhookEvent> = tables
            .events
            .iter()
            .filter(|e| filter.status.map_or(true, |s| e.status == s))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        events.truncate(filter.limit.max(0) as usize);
        Ok(events)
    }

    async fn list_attempts(&self, event_id: Uuid) -> Result<Vec<WebhookAttempt>> {
        let tables = self.tables()?;
        let mut attempts: Vec<WebhookAttempt> = tables
            .attempts
            .iter()
            .filter(|a| a.webhook_event_id == event_id)
            .cloned()
            .collect();
        attempts.sort_by_key(|a| a.attempt_number);
        Ok(attempts)
    }
}
