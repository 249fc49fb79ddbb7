//! Idempotent intake of provider delivery callbacks.
//!
//! Journals each `(provider, external id, event type)` once, projects the
//! event onto the correlated outbound message and records how that went.
//! Processing errors are returned as [`ProcessingOutcome`] values, never as
//! `Err`, so the HTTP layer can acknowledge unconditionally.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::database::store::{Journaled, WebhookStore};
use crate::error::Result;
use crate::models::{
    outbound_message::{DeliveryStatus, EmailEventKind},
    webhook_event::{EventKey, NewWebhookEvent, WebhookProvider},
};

/// Authenticated, decoded callback ready for the idempotency guard.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub provider: WebhookProvider,
    pub external_id: String,
    pub event_type: String,
    pub correlation_key: String,
    pub payload: JsonValue,
    pub signature_ok: bool,
}

/// Visible effect of a projection that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    Applied(DeliveryStatus),
    NoTarget,
    Informational,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingOutcome {
    Processed {
        event_id: Uuid,
        projection: Projection,
    },
    Failed {
        event_id: Uuid,
        reason: String,
    },
    Duplicate {
        event_id: Option<Uuid>,
    },
    /// Nothing could be journaled, usually because the store is unreachable.
    Unrecorded {
        reason: String,
    },
}

impl ProcessingOutcome {
    pub fn event_id(&self) -> Option<Uuid> {
        match self {
            ProcessingOutcome::Processed { event_id, .. }
            | ProcessingOutcome::Failed { event_id, .. } => Some(*event_id),
            ProcessingOutcome::Duplicate { event_id } => *event_id,
            ProcessingOutcome::Unrecorded { .. } => None,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, ProcessingOutcome::Duplicate { .. })
    }
}

#[derive(Clone)]
pub struct WebhookService {
    store: Arc<dyn WebhookStore>,
}

impl WebhookService {
    pub fn new(store: Arc<dyn WebhookStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn WebhookStore> {
        &self.store
    }

    #[instrument(
        name = "ingest_webhook",
        skip_all,
        fields(
            provider = %inbound.provider,
            external_id = %inbound.external_id,
            event_type = %inbound.event_type,
        )
    )]
    pub async fn ingest(&self, inbound: InboundEvent) -> ProcessingOutcome {
        match self.journal_and_project(inbound).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(error = %err, "webhook event could not be journaled");
                ProcessingOutcome::Unrecorded {
                    reason: err.to_string(),
                }
            }
        }
    }

    async fn journal_and_project(&self, inbound: InboundEvent) -> Result<ProcessingOutcome> {
        let InboundEvent {
            provider,
            external_id,
            event_type,
            correlation_key,
            payload,
            signature_ok,
        } = inbound;

        let key = EventKey {
            provider,
            external_id,
            event_type,
        };

        if let Some(existing) = self.store.find_event(&key).await? {
            debug!(event_id = %existing.id, "duplicate webhook event ignored");
            return Ok(ProcessingOutcome::Duplicate {
                event_id: Some(existing.id),
            });
        }

        let journaled = self
            .store
            .journal_event(NewWebhookEvent {
                key,
                payload,
                signature_ok,
            })
            .await?;

        let (event, attempt) = match journaled {
            Journaled::Created { event, attempt } => (event, attempt),
            Journaled::Duplicate { existing } => {
                debug!(event_id = ?existing, "concurrent duplicate lost the insert race");
                return Ok(ProcessingOutcome::Duplicate { event_id: existing });
            }
        };

        let projection = self.project(&event.event_type, &correlation_key).await;
        Ok(self.finalize(event.id, attempt.id, projection).await)
    }

    async fn project(
        &self,
        event_type: &str,
        correlation_key: &str,
    ) -> std::result::Result<Projection, String> {
        let Some(status) = EmailEventKind::parse(event_type).projected_status() else {
            return Ok(Projection::Informational);
        };

        match self.store.project_status(correlation_key, status).await {
            Ok(true) => Ok(Projection::Applied(status)),
            Ok(false) => Ok(Projection::NoTarget),
            Err(err) => Err(err.to_string()),
        }
    }

    async fn finalize(
        &self,
        event_id: Uuid,
        attempt_id: Uuid,
        projection: std::result::Result<Projection, String>,
    ) -> ProcessingOutcome {
        let reason = match projection {
            Ok(projection) => match self.store.complete_attempt(event_id, attempt_id).await {
                Ok(()) => {
                    info!(%event_id, ?projection, "webhook event processed");
                    return ProcessingOutcome::Processed {
                        event_id,
                        projection,
                    };
                }
                Err(err) => format!("failed to record successful attempt: {}", err),
            },
            Err(reason) => reason,
        };

        match self.store.fail_attempt(event_id, attempt_id, &reason).await {
            Ok(()) => error!(%event_id, %reason, "webhook processing failed"),
            Err(err) => error!(
                %event_id,
                %reason,
                error = %err,
                "webhook processing failed and the failure could not be recorded"
            ),
        }

        ProcessingOutcome::Failed { event_id, reason }
    }
}
