use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value as JsonValue};
use tokio::sync::Barrier;
use tower::ServiceExt;
use uuid::Uuid;
use webhook_tracker::{
    config::AppEnv,
    database::{
        memory::MemoryWebhookStore,
        store::{Journaled, WebhookStore},
    },
    error::Result,
    middleware::auth::{WebhookAuth, WEBHOOK_SECRET_HEADER},
    models::{
        outbound_message::DeliveryStatus,
        webhook_attempt::WebhookAttempt,
        webhook_event::{EventFilter, EventKey, NewWebhookEvent, WebhookEvent, WebhookEventStatus},
    },
    routes, AppState,
};

const SECRET: &str = "whsec_test";

fn setup_app(secret: Option<&str>, app_env: AppEnv) -> (Router, Arc<MemoryWebhookStore>) {
    let store = Arc::new(MemoryWebhookStore::new());
    let state = AppState::new(
        store.clone(),
        WebhookAuth::new(secret.map(str::to_string), app_env),
    );
    (routes::router(state), store)
}

fn email_event(event_type: &str, email_id: &str) -> String {
    json!({
        "type": event_type,
        "created_at": "2026-10-18T09:00:00.000Z",
        "data": {
            "email_id": email_id,
            "from": "facturas@example.es",
            "to": ["cliente@example.es"],
            "subject": "Factura F-2026-0042"
        }
    })
    .to_string()
}

fn webhook_request(body: impl Into<Body>, secret: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/webhooks/resend")
        .header("content-type", "application/json");
    if let Some(secret) = secret {
        builder = builder.header(WEBHOOK_SECRET_HEADER, secret);
    }
    builder.body(body.into()).unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, JsonValue) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    let body = if bytes.is_empty() {
        JsonValue::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null)
    };
    (status, body)
}

#[tokio::test]
async fn repeated_delivery_is_journaled_once() {
    let (app, store) = setup_app(Some(SECRET), AppEnv::Production);
    store
        .insert_message("msg_123", "cliente@example.es", DeliveryStatus::Sent)
        .unwrap();

    let body = email_event("email.delivered", "msg_123");
    let (status, first) = send(&app, webhook_request(body.clone(), Some(SECRET))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["received"], true);
    assert_eq!(first["duplicate"], false);

    for _ in 0..3 {
        let (status, ack) = send(&app, webhook_request(body.clone(), Some(SECRET))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack["duplicate"], true);
        assert_eq!(ack["event_id"], first["event_id"]);
    }

    let events = store.events().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, WebhookEventStatus::Processed);
    assert!(events[0].signature_ok);
    assert!(events[0].processed_at.is_some());

    let attempts = store.attempts().unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].attempt_number, 1);
    assert_eq!(attempts[0].ok, Some(true));
    assert!(attempts[0].finished_at.is_some());

    assert_eq!(store.projection_calls(), 1);
    let message = store.message("msg_123").unwrap().unwrap();
    assert_eq!(message.status, DeliveryStatus::Delivered);
}

#[tokio::test]
async fn bad_or_missing_secret_is_rejected_without_journaling() {
    let (app, store) = setup_app(Some(SECRET), AppEnv::Production);
    let body = email_event("email.sent", "msg_1");

    let (status, err) = send(&app, webhook_request(body.clone(), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(err["error"], "missing_webhook_secret");

    let (status, _) = send(&app, webhook_request(body, Some("whsec_wrong"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert!(store.events().unwrap().is_empty());
    assert!(store.attempts().unwrap().is_empty());
}

#[tokio::test]
async fn malformed_body_is_rejected_without_journaling() {
    let (app, store) = setup_app(Some(SECRET), AppEnv::Production);

    let (status, err) = send(&app, webhook_request("{not json", Some(SECRET))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"], "invalid_json");

    let missing_key = json!({ "type": "email.sent", "data": {} }).to_string();
    let (status, _) = send(&app, webhook_request(missing_key, Some(SECRET))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let missing_type = json!({ "data": { "email_id": "msg_1" } }).to_string();
    let (status, _) = send(&app, webhook_request(missing_type, Some(SECRET))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(store.events().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_correlation_key_is_processed_without_side_effects() {
    let (app, store) = setup_app(Some(SECRET), AppEnv::Production);
    let other = store
        .insert_message("msg_other", "otro@example.es", DeliveryStatus::Sent)
        .unwrap();

    let (status, ack) = send(
        &app,
        webhook_request(email_event("email.delivered", "msg_unknown"), Some(SECRET)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["duplicate"], false);

    let events = store.events().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, WebhookEventStatus::Processed);
    assert_eq!(events[0].last_error, None);

    let untouched = store.message("msg_other").unwrap().unwrap();
    assert_eq!(untouched.status, DeliveryStatus::Sent);
    assert_eq!(untouched.updated_at, other.updated_at);
}

#[tokio::test]
async fn projection_failure_is_journaled_and_acknowledged() {
    let (app, store) = setup_app(Some(SECRET), AppEnv::Production);
    store
        .insert_message("msg_123", "cliente@example.es", DeliveryStatus::Sent)
        .unwrap();
    store.fail_projections_with("connection reset by peer");

    let body = email_event("email.delivered", "msg_123");
    let (status, ack) = send(&app, webhook_request(body.clone(), Some(SECRET))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["received"], true);

    let events = store.events().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, WebhookEventStatus::Failed);
    let last_error = events[0].last_error.clone().unwrap();
    assert!(last_error.contains("connection reset by peer"), "{last_error}");
    assert!(events[0].processed_at.is_none());

    let attempts = store.attempts().unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].ok, Some(false));
    assert_eq!(attempts[0].error.as_deref(), Some(last_error.as_str()));

    // A provider retry lands on the failed entry as a duplicate.
    store.clear_projection_failure();
    let (status, ack) = send(&app, webhook_request(body, Some(SECRET))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["duplicate"], true);
    assert_eq!(store.events().unwrap()[0].status, WebhookEventStatus::Failed);
    assert_eq!(
        store.message("msg_123").unwrap().unwrap().status,
        DeliveryStatus::Sent
    );
}

#[tokio::test]
async fn status_follows_the_latest_projected_event() {
    let (app, store) = setup_app(Some(SECRET), AppEnv::Production);
    store
        .insert_message("msg_123", "cliente@example.es", DeliveryStatus::Sent)
        .unwrap();

    send(&app, webhook_request(email_event("delivered", "msg_123"), Some(SECRET))).await;
    assert_eq!(
        store.message("msg_123").unwrap().unwrap().status,
        DeliveryStatus::Delivered
    );

    send(&app, webhook_request(email_event("bounced", "msg_123"), Some(SECRET))).await;
    assert_eq!(
        store.message("msg_123").unwrap().unwrap().status,
        DeliveryStatus::Bounced
    );

    let before = store.message("msg_123").unwrap().unwrap();
    send(
        &app,
        webhook_request(email_event("delivery_delayed", "msg_123"), Some(SECRET)),
    )
    .await;
    let after = store.message("msg_123").unwrap().unwrap();
    assert_eq!(after.status, DeliveryStatus::Bounced);
    assert_eq!(after.updated_at, before.updated_at);

    // Out-of-order delivery is not rejected.
    send(&app, webhook_request(email_event("sent", "msg_123"), Some(SECRET))).await;
    assert_eq!(
        store.message("msg_123").unwrap().unwrap().status,
        DeliveryStatus::Sent
    );

    let events = store.events().unwrap();
    assert_eq!(events.len(), 4);
    assert!(events
        .iter()
        .all(|e| e.status == WebhookEventStatus::Processed));
}

/// How [`RacingStore`] answers the pre-insert lookup.
enum Lookup {
    /// Never finds anything, as when a concurrent request inserts between
    /// our lookup and our insert.
    Blind,
    /// Real lookup, then waits until every racer has looked up too.
    Rendezvous(Barrier),
}

struct RacingStore {
    inner: Arc<MemoryWebhookStore>,
    lookup: Lookup,
    journal_calls: AtomicUsize,
}

impl RacingStore {
    fn new(inner: Arc<MemoryWebhookStore>, lookup: Lookup) -> Self {
        Self {
            inner,
            lookup,
            journal_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl WebhookStore for RacingStore {
    async fn find_event(&self, key: &EventKey) -> Result<Option<WebhookEvent>> {
        match &self.lookup {
            Lookup::Blind => Ok(None),
            Lookup::Rendezvous(barrier) => {
                let found = self.inner.find_event(key).await;
                barrier.wait().await;
                found
            }
        }
    }

    async fn journal_event(&self, new_event: NewWebhookEvent) -> Result<Journaled> {
        self.journal_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.journal_event(new_event).await
    }

    async fn project_status(
        &self,
        correlation_key: &str,
        status: DeliveryStatus,
    ) -> Result<bool> {
        self.inner.project_status(correlation_key, status).await
    }

    async fn complete_attempt(&self, event_id: Uuid, attempt_id: Uuid) -> Result<()> {
        self.inner.complete_attempt(event_id, attempt_id).await
    }

    async fn fail_attempt(&self, event_id: Uuid, attempt_id: Uuid, error: &str) -> Result<()> {
        self.inner.fail_attempt(event_id, attempt_id, error).await
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<WebhookEvent>> {
        self.inner.get_event(id).await
    }

    async fn list_events(&self, filter: EventFilter) -> Result<Vec<WebhookEvent>> {
        self.inner.list_events(filter).await
    }

    async fn list_attempts(&self, event_id: Uuid) -> Result<Vec<WebhookAttempt>> {
        self.inner.list_attempts(event_id).await
    }
}

fn racing_app(lookup: Lookup) -> (Router, Arc<MemoryWebhookStore>, Arc<RacingStore>) {
    let inner = Arc::new(MemoryWebhookStore::new());
    inner
        .insert_message("msg_123", "cliente@example.es", DeliveryStatus::Sent)
        .unwrap();
    let racing = Arc::new(RacingStore::new(inner.clone(), lookup));
    let state = AppState::new(
        racing.clone(),
        WebhookAuth::new(Some(SECRET.into()), AppEnv::Production),
    );
    (routes::router(state), inner, racing)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_duplicates_create_one_event() {
    let (app, store, racing) = racing_app(Lookup::Rendezvous(Barrier::new(2)));
    let body = email_event("email.delivered", "msg_123");

    let first = tokio::spawn({
        let app = app.clone();
        let body = body.clone();
        async move { send(&app, webhook_request(body, Some(SECRET))).await }
    });
    let second = tokio::spawn({
        let app = app.clone();
        let body = body.clone();
        async move { send(&app, webhook_request(body, Some(SECRET))).await }
    });
    let a = first.await.unwrap();
    let b = second.await.unwrap();

    assert_eq!(a.0, StatusCode::OK);
    assert_eq!(b.0, StatusCode::OK);
    // Both passed the lookup before either inserted.
    assert_eq!(racing.journal_calls.load(Ordering::SeqCst), 2);

    let duplicates = [&a.1, &b.1]
        .iter()
        .filter(|ack| ack["duplicate"] == true)
        .count();
    assert_eq!(duplicates, 1);
    assert_eq!(a.1["event_id"], b.1["event_id"]);
    assert_eq!(store.events().unwrap().len(), 1);
    assert_eq!(store.attempts().unwrap().len(), 1);
    assert_eq!(store.projection_calls(), 1);
    assert_eq!(
        store.events().unwrap()[0].status,
        WebhookEventStatus::Processed
    );
}

#[tokio::test]
async fn insert_conflict_after_lookup_is_treated_as_duplicate() {
    let (app, inner, _racing) = racing_app(Lookup::Blind);
    let body = email_event("email.delivered", "msg_123");

    let (_, first) = send(&app, webhook_request(body.clone(), Some(SECRET))).await;
    let (status, second) = send(&app, webhook_request(body, Some(SECRET))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["duplicate"], true);
    assert_eq!(second["event_id"], first["event_id"]);
    assert_eq!(inner.events().unwrap().len(), 1);
    assert_eq!(inner.attempts().unwrap().len(), 1);
    assert_eq!(inner.projection_calls(), 1);
    assert_eq!(
        inner.events().unwrap()[0].status,
        WebhookEventStatus::Processed
    );
}

#[tokio::test]
async fn unexpected_extra_fields_are_still_journaled() {
    let (app, store) = setup_app(Some(SECRET), AppEnv::Production);
    let body = json!({
        "type": "email.sent",
        "created_at": 1760778000,
        "tags": [{ "name": "invoice", "value": 42 }],
        "data": { "email_id": "msg_1", "to": "cliente@example.es" }
    })
    .to_string();

    let (status, ack) = send(&app, webhook_request(body, Some(SECRET))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["duplicate"], false);

    let events = store.events().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].payload["created_at"], 1760778000);
    assert_eq!(events[0].payload["tags"][0]["value"], 42);
}

#[tokio::test]
async fn oversized_body_is_rejected_after_authentication() {
    let (app, store) = setup_app(Some(SECRET), AppEnv::Production);
    let oversized = format!(
        r#"{{"type":"email.sent","data":{{"email_id":"msg_1","pad":"{}"}}}}"#,
        "x".repeat(2 * 1024 * 1024)
    );

    let (status, _) = send(&app, webhook_request(oversized.clone(), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, err) = send(&app, webhook_request(oversized, Some(SECRET))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"], "payload_too_large");

    assert!(store.events().unwrap().is_empty());
}

#[tokio::test]
async fn development_without_secret_accepts_unsigned_callbacks() {
    let (app, store) = setup_app(None, AppEnv::Development);

    let (status, _) = send(&app, webhook_request(email_event("email.sent", "msg_1"), None)).await;
    assert_eq!(status, StatusCode::OK);

    let events = store.events().unwrap();
    assert_eq!(events.len(), 1);
    assert!(!events[0].signature_ok);
}

#[tokio::test]
async fn production_without_secret_fails_closed() {
    let (app, store) = setup_app(None, AppEnv::Production);

    let (status, err) = send(&app, webhook_request(email_event("email.sent", "msg_1"), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(err["error"], "webhook_secret_not_configured");
    assert!(store.events().unwrap().is_empty());
}

#[tokio::test]
async fn operators_can_inspect_failed_events() {
    let (app, store) = setup_app(Some(SECRET), AppEnv::Production);
    store.fail_projections_with("deadlock detected");
    send(&app, webhook_request(email_event("email.bounced", "msg_a"), Some(SECRET))).await;
    store.clear_projection_failure();
    send(&app, webhook_request(email_event("email.sent", "msg_b"), Some(SECRET))).await;

    let list = Request::builder()
        .uri("/api/webhooks/events?status=FAILED")
        .header(WEBHOOK_SECRET_HEADER, SECRET)
        .body(Body::empty())
        .unwrap();
    let (status, events) = send(&app, list).await;
    assert_eq!(status, StatusCode::OK);
    let events = events.as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["external_id"], "msg_a");
    assert_eq!(events[0]["status"], "FAILED");

    let id = events[0]["id"].as_str().unwrap();
    let detail = Request::builder()
        .uri(format!("/api/webhooks/events/{}", id))
        .header(WEBHOOK_SECRET_HEADER, SECRET)
        .body(Body::empty())
        .unwrap();
    let (status, detail) = send(&app, detail).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["event"]["payload"]["data"]["email_id"], "msg_a");
    assert_eq!(detail["attempts"].as_array().unwrap().len(), 1);
    assert_eq!(detail["attempts"][0]["ok"], false);

    let all = Request::builder()
        .uri("/api/webhooks/events?limit=10")
        .header(WEBHOOK_SECRET_HEADER, SECRET)
        .body(Body::empty())
        .unwrap();
    let (_, events) = send(&app, all).await;
    assert_eq!(events.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn journal_endpoints_require_secret_and_valid_input() {
    let (app, _store) = setup_app(Some(SECRET), AppEnv::Production);

    let unauthenticated = Request::builder()
        .uri("/api/webhooks/events")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, unauthenticated).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let bad_filter = Request::builder()
        .uri("/api/webhooks/events?status=LOST")
        .header(WEBHOOK_SECRET_HEADER, SECRET)
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, bad_filter).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let bad_limit = Request::builder()
        .uri("/api/webhooks/events?limit=lots")
        .header(WEBHOOK_SECRET_HEADER, SECRET)
        .body(Body::empty())
        .unwrap();
    let (status, err) = send(&app, bad_limit).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(err["error"].is_string());

    let bad_id = Request::builder()
        .uri("/api/webhooks/events/not-a-uuid")
        .header(WEBHOOK_SECRET_HEADER, SECRET)
        .body(Body::empty())
        .unwrap();
    let (status, err) = send(&app, bad_id).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(err["error"].is_string());

    let unknown = Request::builder()
        .uri(format!("/api/webhooks/events/{}", Uuid::new_v4()))
        .header(WEBHOOK_SECRET_HEADER, SECRET)
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, unknown).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_reports_ok() {
    let (app, _store) = setup_app(None, AppEnv::Development);
    let req = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
