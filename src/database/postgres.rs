use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use crate::database::store::{Journaled, WebhookStore};
use crate::error::{Error, Result};
use crate::models::{
    outbound_message::DeliveryStatus,
    webhook_attempt::WebhookAttempt,
    webhook_event::{EventFilter, EventKey, NewWebhookEvent, WebhookEvent},
};

#[derive(Clone)]
pub struct PgWebhookStore {
    pool: PgPool,
}

impl PgWebhookStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn event_from_row(row: &PgRow) -> Result<WebhookEvent> {
    let status: String = row.try_get("status")?;
    Ok(WebhookEvent {
        id: row.try_get("id")?,
        provider: row.try_get("provider")?,
        external_id: row.try_get("external_id")?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        signature_ok: row.try_get("signature_ok")?,
        status: status.parse().map_err(Error::Internal)?,
        last_error: row.try_get("last_error")?,
        received_at: row.try_get("received_at")?,
        processed_at: row.try_get("processed_at")?,
    })
}

fn attempt_from_row(row: &PgRow) -> Result<WebhookAttempt> {
    Ok(WebhookAttempt {
        id: row.try_get("id")?,
        webhook_event_id: row.try_get("webhook_event_id")?,
        attempt_number: row.try_get("attempt_number")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        ok: row.try_get("ok")?,
        error: row.try_get("error")?,
    })
}

#[async_trait]
impl WebhookStore for PgWebhookStore {
    async fn find_event(&self, key: &EventKey) -> Result<Option<WebhookEvent>> {
        let row = sqlx::query(
            r#"
            SELECT id, provider, external_id, event_type, payload, signature_ok,
                   status, last_error, received_at, processed_at
            FROM webhook_events
            WHERE provider = $1 AND external_id = $2 AND event_type = $3
            "#,
        )
        .bind(key.provider.as_str())
        .bind(&key.external_id)
        .bind(&key.event_type)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(event_from_row).transpose()
    }

    async fn journal_event(&self, new_event: NewWebhookEvent) -> Result<Journaled> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO webhook_events (id, provider, external_id, event_type, payload, signature_ok, status)
            VALUES ($1, $2, $3, $4, $5, $6, 'RECEIVED')
            RETURNING id, provider, external_id, event_type, payload, signature_ok,
                      status, last_error, received_at, processed_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new_event.key.provider.as_str())
        .bind(&new_event.key.external_id)
        .bind(&new_event.key.event_type)
        .bind(&new_event.payload)
        .bind(new_event.signature_ok)
        .fetch_one(&mut *tx)
        .await;

        let event_row = match inserted {
            Ok(row) => row,
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                tx.rollback().await?;
                let existing = self.find_event(&new_event.key).await?.map(|e| e.id);
                return Ok(Journaled::Duplicate { existing });
            }
            Err(err) => return Err(err.into()),
        };
        let event = event_from_row(&event_row)?;

        let attempt_row = sqlx::query(
            r#"
            INSERT INTO webhook_attempts (id, webhook_event_id, attempt_number, started_at)
            VALUES ($1, $2, 1, NOW())
            RETURNING id, webhook_event_id, attempt_number, started_at, finished_at, ok, error
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event.id)
        .fetch_one(&mut *tx)
        .await?;
        let attempt = attempt_from_row(&attempt_row)?;

        tx.commit().await?;
        Ok(Journaled::Created { event, attempt })
    }

    async fn project_status(
        &self,
        correlation_key: &str,
        status: DeliveryStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbound_messages
            SET status = $1, updated_at = NOW()
            WHERE provider_message_id = $2
            "#,
        )
        .bind(status.as_str())
        .bind(correlation_key)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn complete_attempt(&self, event_id: Uuid, attempt_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let attempt = sqlx::query(
            r#"
            UPDATE webhook_attempts
            SET ok = TRUE, error = NULL, finished_at = NOW()
            WHERE id = $1 AND webhook_event_id = $2
            "#,
        )
        .bind(attempt_id)
        .bind(event_id)
        .execute(&mut *tx)
        .await?;
        if attempt.rows_affected() != 1 {
            return Err(Error::NotFound(format!("webhook attempt {}", attempt_id)));
        }

        sqlx::query(
            r#"
            UPDATE webhook_events
            SET status = 'PROCESSED', processed_at = NOW(), last_error = NULL
            WHERE id = $1
            "#,
        )
        .bind(event_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn fail_attempt(&self, event_id: Uuid, attempt_id: Uuid, error: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let attempt = sqlx::query(
            r#"
            UPDATE webhook_attempts
            SET ok = FALSE, error = $3, finished_at = NOW()
            WHERE id = $1 AND webhook_event_id = $2
            "#,
        )
        .bind(attempt_id)
        .bind(event_id)
        .bind(error)
        .execute(&mut *tx)
        .await?;
        if attempt.rows_affected() != 1 {
            return Err(Error::NotFound(format!("webhook attempt {}", attempt_id)));
        }

        sqlx::query(
            r#"
            UPDATE webhook_events
            SET status = 'FAILED', last_error = $2
            WHERE id = $1
            "#,
        )
        .bind(event_id)
        .bind(error)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<WebhookEvent>> {
        let row = sqlx::query(
            r#"
            SELECT id, provider, external_id, event_type, payload, signature_ok,
                   status, last_error, received_at, processed_at
            FROM webhook_events
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(event_from_row).transpose()
    }

    async fn list_events(&self, filter: EventFilter) -> Result<Vec<WebhookEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, provider, external_id, event_type, payload, signature_ok,
                   status, last_error, received_at, processed_at
            FROM webhook_events
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY received_at DESC
            LIMIT $2
            "#,
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(event_from_row).collect()
    }

    async fn list_attempts(&self, event_id: Uuid) -> Result<Vec<WebhookAttempt>> {
        let rows = sqlx::query(
            r#"
            SELECT id, webhook_event_id, attempt_number, started_at, finished_at, ok, error
            FROM webhook_attempts
            WHERE webhook_event_id = $1
            ORDER BY attempt_number ASC
            "#,
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(attempt_from_row).collect()
    }
}
