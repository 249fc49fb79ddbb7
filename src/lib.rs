pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use std::sync::Arc;

use chrono::Duration;

use crate::config::Config;
use crate::database::store::WebhookStore;
use crate::middleware::auth::WebhookAuth;
use crate::services::token_cache::{ClientCredentialsSource, TokenCache};
use crate::services::webhook_service::WebhookService;
use crate::utils::time::SystemClock;

const REGISTRY_TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Clone)]
pub struct AppState {
    pub webhook_service: WebhookService,
    pub webhook_auth: WebhookAuth,
    /// Bearer tokens for the company-registry API client, present only when
    /// `REGISTRY_*` credentials are configured. Building it does no network
    /// I/O; the first `get()` fetches.
    pub registry_tokens: Option<Arc<TokenCache>>,
}

impl AppState {
    pub fn new(store: Arc<dyn WebhookStore>, webhook_auth: WebhookAuth) -> Self {
        Self {
            webhook_service: WebhookService::new(store),
            webhook_auth,
            registry_tokens: None,
        }
    }

    pub fn from_config(store: Arc<dyn WebhookStore>, config: &Config) -> Self {
        let webhook_auth = WebhookAuth::new(config.resend_webhook_secret.clone(), config.app_env);
        let mut state = Self::new(store, webhook_auth);

        if let Some(registry) = config.registry.clone() {
            let source = ClientCredentialsSource::new(reqwest::Client::new(), registry);
            state.registry_tokens = Some(Arc::new(TokenCache::new(
                Arc::new(source),
                Arc::new(SystemClock),
                Duration::seconds(REGISTRY_TOKEN_REFRESH_MARGIN_SECS),
            )));
        }
        state
    }
}
