use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::HeaderMap,
    http::StatusCode,
    Json,
};
use bytes::Bytes;

use crate::{
    dto::webhook_dto::{EmailWebhookEnvelope, WebhookAck},
    error::{Error, Result},
    middleware::auth::Caller,
    models::webhook_event::WebhookProvider,
    services::webhook_service::{InboundEvent, ProcessingOutcome},
    AppState,
};

pub const MAX_WEBHOOK_BODY_BYTES: usize = 1024 * 1024;

/// Delivery callbacks from Resend.
///
/// Only authentication (401) and decoding (400) affect the status code. The
/// body is read after the secret check, so an oversized body is a 400 and
/// never masks a 401. Once the body is accepted the response is 200 whatever
/// processing did; failures are kept in the journal instead of triggering
/// provider retries.
pub async fn handle_resend_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<(StatusCode, Json<WebhookAck>)> {
    let signature_ok = state.webhook_auth.verify(&headers, Caller::Provider)?;
    let body: Bytes = to_bytes(body, MAX_WEBHOOK_BODY_BYTES)
        .await
        .map_err(|_| Error::BadRequest("payload_too_large".into()))?;
    let (envelope, payload) = EmailWebhookEnvelope::parse(&body)?;

    let inbound = InboundEvent {
        provider: WebhookProvider::Resend,
        external_id: envelope.data.email_id.clone(),
        event_type: envelope.event_type,
        correlation_key: envelope.data.email_id,
        payload,
        signature_ok,
    };

    let outcome = state.webhook_service.ingest(inbound).await;
    Ok(acknowledge(&outcome))
}

fn acknowledge(outcome: &ProcessingOutcome) -> (StatusCode, Json<WebhookAck>) {
    (
        StatusCode::OK,
        Json(WebhookAck {
            received: true,
            duplicate: outcome.is_duplicate(),
            event_id: outcome.event_id(),
        }),
    )
}
