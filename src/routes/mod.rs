pub mod events;
pub mod health;
pub mod webhook;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/webhooks/resend", post(webhook::handle_resend_webhook))
        .route("/api/webhooks/events", get(events::list_events))
        .route("/api/webhooks/events/:id", get(events::get_event))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
