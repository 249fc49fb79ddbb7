//! Access-token cache for third-party API clients.
//!
//! The cache is an ordinary value owned by whoever builds the API client, not
//! module state. Refreshes are single-flight: callers arriving while a refresh
//! is running wait for it and reuse its result.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::RegistryConfig;
use crate::error::{Error, Result};
use crate::utils::time::Clock;

/// Token as returned by an issuer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub access_token: String,
    pub expires_in: Duration,
}

#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch(&self) -> Result<IssuedToken>;
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

pub struct TokenCache {
    source: Arc<dyn TokenSource>,
    clock: Arc<dyn Clock>,
    refresh_margin: Duration,
    slot: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    /// `refresh_margin` is how long before expiry a token stops being served.
    pub fn new(source: Arc<dyn TokenSource>, clock: Arc<dyn Clock>, refresh_margin: Duration) -> Self {
        Self {
            source,
            clock,
            refresh_margin,
            slot: Mutex::new(None),
        }
    }

    pub async fn get(&self) -> Result<String> {
        let mut slot = self.slot.lock().await;
        let now = self.clock.now();

        if let Some(cached) = slot.as_ref() {
            if now < cached.expires_at - self.refresh_margin {
                return Ok(cached.value.clone());
            }
        }

        let issued = self.source.fetch().await?;
        if issued.access_token.is_empty() {
            return Err(Error::Internal("token issuer returned an empty token".into()));
        }
        let expires_at = now + issued.expires_in;
        debug!(%expires_at, "access token refreshed");

        *slot = Some(CachedToken {
            value: issued.access_token.clone(),
            expires_at,
        });
        Ok(issued.access_token)
    }

    /// Drops the cached token, e.g. after the API rejected it.
    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// OAuth2 client-credentials grant against a token endpoint.
#[derive(Clone)]
pub struct ClientCredentialsSource {
    client: Client,
    config: RegistryConfig,
}

impl ClientCredentialsSource {
    pub fn new(client: Client, config: RegistryConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl TokenSource for ClientCredentialsSource {
    async fn fetch(&self) -> Result<IssuedToken> {
        let response = self
            .client
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let token = response.json::<TokenResponse>().await?;
        Ok(IssuedToken {
            access_token: token.access_token,
            expires_in: Duration::seconds(token.expires_in.max(0)),
        })
    }
}
