use crate::database::error::{DatabaseError, DatabaseResult};
use crate::payments::types::TransactionStatus;
use sqlx::{types::BigDecimal, FromRow, PgPool};
use uuid::Uuid;

const TRANSACTION_COLUMNS: &str = "id, reference_id, user_id, merchant_id, amount, currency, \
     payment_method, payment_provider, status, description, metadata, idempotency_key, \
     fraud_score, error_code, error_message, webhook_url, webhook_attempts, \
     webhook_last_attempt, created_at, updated_at";

/// Transaction entity
///
/// Rows are never deleted; status advances monotonically and only the
/// webhook counters may change after a terminal status is reached.
#[derive(Debug, Clone, FromRow)]
pub struct Transaction {
    pub id: Uuid,
    pub reference_id: String,
    pub user_id: Uuid,
    pub merchant_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub payment_method: String,
    pub payment_provider: Option<String>,
    pub status: String,
    pub description: Option<String>,
    pub metadata: serde_json::Value,
    pub idempotency_key: Option<String>,
    pub fraud_score: Option<BigDecimal>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub webhook_url: Option<String>,
    pub webhook_attempts: i32,
    pub webhook_last_attempt: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Transaction {
    pub fn parsed_status(&self) -> Option<TransactionStatus> {
        self.status.parse().ok()
    }
}

/// Insertable transaction record
///
/// The id is generated by the caller so the idempotency reservation can be
/// taken before the row exists.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub id: Uuid,
    pub reference_id: String,
    pub user_id: Uuid,
    pub merchant_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub payment_method: String,
    pub payment_provider: Option<String>,
    pub status: TransactionStatus,
    pub description: Option<String>,
    pub metadata: serde_json::Value,
    pub idempotency_key: Option<String>,
    pub fraud_score: Option<BigDecimal>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub webhook_url: Option<String>,
}

/// Repository for managing transactions
pub struct TransactionRepository {
    pool: PgPool,
}

impl TransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new transaction
    ///
    /// Fails with a unique-violation error if either `reference_id` or
    /// `idempotency_key` collides with an existing row.
    pub async fn insert(&self, tx: &NewTransaction) -> DatabaseResult<Transaction> {
        sqlx::query_as::<_, Transaction>(&format!(
            "INSERT INTO transactions \
             (id, reference_id, user_id, merchant_id, amount, currency, payment_method, \
              payment_provider, status, description, metadata, idempotency_key, fraud_score, \
              error_code, error_message, webhook_url) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
             RETURNING {}",
            TRANSACTION_COLUMNS
        ))
        .bind(tx.id)
        .bind(&tx.reference_id)
        .bind(tx.user_id)
        .bind(tx.merchant_id)
        .bind(&tx.amount)
        .bind(&tx.currency)
        .bind(&tx.payment_method)
        .bind(&tx.payment_provider)
        .bind(tx.status.as_str())
        .bind(&tx.description)
        .bind(&tx.metadata)
        .bind(&tx.idempotency_key)
        .bind(&tx.fraud_score)
        .bind(&tx.error_code)
        .bind(&tx.error_message)
        .bind(&tx.webhook_url)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Find transaction by id
    pub async fn find_by_id(&self, id: Uuid) -> DatabaseResult<Option<Transaction>> {
        sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {} FROM transactions WHERE id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Find transaction by its human-visible reference
    pub async fn find_by_reference_id(
        &self,
        reference_id: &str,
    ) -> DatabaseResult<Option<Transaction>> {
        sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {} FROM transactions WHERE reference_id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(reference_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Find transaction by idempotency key
    pub async fn find_by_idempotency_key(
        &self,
        idempotency_key: &str,
    ) -> DatabaseResult<Option<Transaction>> {
        sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {} FROM transactions WHERE idempotency_key = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Compare-and-swap the transaction status
    ///
    /// The WHERE clause on the current status is the serialization point of
    /// the state machine: a concurrent transition makes this match zero rows
    /// and the caller gets a `StatusConflict` instead of a lost update.
    pub async fn update_status(
        &self,
        id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
    ) -> DatabaseResult<Transaction> {
        sqlx::query_as::<_, Transaction>(&format!(
            "UPDATE transactions \
             SET status = $3, updated_at = NOW() \
             WHERE id = $1 AND status = $2 \
             RETURNING {}",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or_else(|| DatabaseError::status_conflict(id.to_string(), from.as_str()))
    }

    /// CAS to FAILED, recording the failure cause
    pub async fn update_status_failed(
        &self,
        id: Uuid,
        from: TransactionStatus,
        error_code: &str,
        error_message: &str,
    ) -> DatabaseResult<Transaction> {
        sqlx::query_as::<_, Transaction>(&format!(
            "UPDATE transactions \
             SET status = $3, error_code = $4, error_message = $5, updated_at = NOW() \
             WHERE id = $1 AND status = $2 \
             RETURNING {}",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .bind(from.as_str())
        .bind(TransactionStatus::Failed.as_str())
        .bind(error_code)
        .bind(error_message)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or_else(|| DatabaseError::status_conflict(id.to_string(), from.as_str()))
    }

    /// CAS with a metadata merge, used to attach provider references on
    /// successful charges
    pub async fn update_status_with_metadata(
        &self,
        id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
        additional_metadata: serde_json::Value,
    ) -> DatabaseResult<Transaction> {
        sqlx::query_as::<_, Transaction>(&format!(
            "UPDATE transactions \
             SET status = $3, metadata = metadata || $4, updated_at = NOW() \
             WHERE id = $1 AND status = $2 \
             RETURNING {}",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(additional_metadata)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or_else(|| DatabaseError::status_conflict(id.to_string(), from.as_str()))
    }

    /// Bump the webhook delivery counters
    ///
    /// The only mutation allowed on a row in a terminal status.
    pub async fn record_webhook_attempt(
        &self,
        id: Uuid,
        attempted_at: chrono::DateTime<chrono::Utc>,
    ) -> DatabaseResult<Transaction> {
        sqlx::query_as::<_, Transaction>(&format!(
            "UPDATE transactions \
             SET webhook_attempts = webhook_attempts + 1, webhook_last_attempt = $2, \
                 updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {}",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .bind(attempted_at)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
