use axum::{
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::HeaderMap,
    Json,
};
use uuid::Uuid;

use crate::{
    dto::webhook_dto::{EventDetailResponse, EventListQuery},
    error::{Error, Result},
    middleware::auth::Caller,
    models::webhook_event::{EventFilter, WebhookEvent, WebhookEventStatus},
    AppState,
};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;

pub async fn list_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: std::result::Result<Query<EventListQuery>, QueryRejection>,
) -> Result<Json<Vec<WebhookEvent>>> {
    state.webhook_auth.verify(&headers, Caller::Operator)?;
    let Query(query) = query.map_err(|e| Error::BadRequest(e.body_text()))?;

    let status = query
        .status
        .as_deref()
        .map(str::parse::<WebhookEventStatus>)
        .transpose()
        .map_err(Error::BadRequest)?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let events = state
        .webhook_service
        .store()
        .list_events(EventFilter { status, limit })
        .await?;
    Ok(Json(events))
}

pub async fn get_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    id: std::result::Result<Path<Uuid>, PathRejection>,
) -> Result<Json<EventDetailResponse>> {
    state.webhook_auth.verify(&headers, Caller::Operator)?;
    let Path(id) = id.map_err(|e| Error::BadRequest(e.body_text()))?;

    let store = state.webhook_service.store();
    let event = store
        .get_event(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("webhook event {} not found", id)))?;
    let attempts = store.list_attempts(id).await?;

    Ok(Json(EventDetailResponse { event, attempts }))
}
