use crate::database::error::{DatabaseError, DatabaseResult};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const WEBHOOK_EVENT_COLUMNS: &str = "id, transaction_id, webhook_url, payload, response_status, \
     response_body, attempts, max_attempts, next_retry_at, created_at, updated_at";

/// Outbound webhook delivery record
///
/// Terminal when the last response was 2xx or `attempts >= max_attempts`.
#[derive(Debug, Clone, FromRow)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub webhook_url: String,
    pub payload: serde_json::Value,
    pub response_status: Option<i32>,
    pub response_body: Option<String>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub next_retry_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Insertable webhook delivery record
#[derive(Debug, Clone)]
pub struct NewWebhookEvent {
    pub transaction_id: Uuid,
    pub webhook_url: String,
    pub payload: serde_json::Value,
    pub max_attempts: i32,
    pub next_retry_at: chrono::DateTime<chrono::Utc>,
}

/// Repository for webhook delivery records
///
/// The dispatcher is the sole writer of attempt fields; everyone else only
/// inserts or reads.
pub struct WebhookEventRepository {
    pool: PgPool,
}

impl WebhookEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a delivery record for a terminal transaction
    pub async fn insert(&self, event: &NewWebhookEvent) -> DatabaseResult<WebhookEvent> {
        sqlx::query_as::<_, WebhookEvent>(&format!(
            "INSERT INTO webhook_events \
             (transaction_id, webhook_url, payload, max_attempts, next_retry_at) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {}",
            WEBHOOK_EVENT_COLUMNS
        ))
        .bind(event.transaction_id)
        .bind(&event.webhook_url)
        .bind(&event.payload)
        .bind(event.max_attempts)
        .bind(event.next_retry_at)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_by_id(&self, id: Uuid) -> DatabaseResult<Option<WebhookEvent>> {
        sqlx::query_as::<_, WebhookEvent>(&format!(
            "SELECT {} FROM webhook_events WHERE id = $1",
            WEBHOOK_EVENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_by_transaction(
        &self,
        transaction_id: Uuid,
    ) -> DatabaseResult<Vec<WebhookEvent>> {
        sqlx::query_as::<_, WebhookEvent>(&format!(
            "SELECT {} FROM webhook_events WHERE transaction_id = $1 ORDER BY created_at ASC",
            WEBHOOK_EVENT_COLUMNS
        ))
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Webhooks due for delivery: retry time reached and attempts remaining
    pub async fn find_pending(
        &self,
        now: chrono::DateTime<chrono::Utc>,
        limit: i64,
    ) -> DatabaseResult<Vec<WebhookEvent>> {
        sqlx::query_as::<_, WebhookEvent>(&format!(
            "SELECT {} FROM webhook_events \
             WHERE next_retry_at <= $1 AND attempts < max_attempts \
             ORDER BY next_retry_at ASC \
             LIMIT $2",
            WEBHOOK_EVENT_COLUMNS
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Record the outcome of a delivery attempt in one write
    pub async fn record_attempt(
        &self,
        id: Uuid,
        response_status: Option<i32>,
        response_body: Option<&str>,
        attempts: i32,
        next_retry_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> DatabaseResult<WebhookEvent> {
        sqlx::query_as::<_, WebhookEvent>(&format!(
            "UPDATE webhook_events \
             SET response_status = $2, response_body = $3, attempts = $4, \
                 next_retry_at = $5, updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {}",
            WEBHOOK_EVENT_COLUMNS
        ))
        .bind(id)
        .bind(response_status)
        .bind(response_body)
        .bind(attempts)
        .bind(next_retry_at)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
