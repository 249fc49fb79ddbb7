use http::HeaderMap;
use subtle::ConstantTimeEq;

use crate::config::AppEnv;
use crate::error::{Error, Result};

pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

/// Who is presenting the shared secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    /// Provider delivering a callback.
    Provider,
    /// Operator reading the journal.
    Operator,
}

/// Shared-secret check for provider callbacks and the journal endpoints.
#[derive(Debug, Clone)]
pub struct WebhookAuth {
    secret: Option<String>,
    app_env: AppEnv,
}

impl WebhookAuth {
    pub fn new(secret: Option<String>, app_env: AppEnv) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
            app_env,
        }
    }

    /// Returns whether the credential was actually checked.
    ///
    /// With no secret configured, non-production deployments pass with
    /// `Ok(false)` and production fails closed.
    pub fn verify(&self, headers: &HeaderMap, caller: Caller) -> Result<bool> {
        let Some(expected) = self.secret.as_deref() else {
            if self.app_env.is_production() {
                return Err(Error::Unauthorized("webhook_secret_not_configured".into()));
            }
            match caller {
                Caller::Provider => tracing::warn!(
                    "no webhook secret configured; accepting unauthenticated callback"
                ),
                Caller::Operator => tracing::warn!(
                    "no webhook secret configured; serving journal without authentication"
                ),
            }
            return Ok(false);
        };

        let Some(secret_hdr) = headers.get(WEBHOOK_SECRET_HEADER) else {
            return Err(Error::Unauthorized("missing_webhook_secret".into()));
        };
        let provided = secret_hdr
            .to_str()
            .map_err(|_| Error::Unauthorized("invalid_secret_header".into()))?;
        if ConstantTimeEq::ct_eq(provided.as_bytes(), expected.as_bytes()).into() {
            Ok(true)
        } else {
            Err(Error::Unauthorized("invalid_webhook_secret".into()))
        }
    }
}
