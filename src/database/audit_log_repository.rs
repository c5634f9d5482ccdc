use crate::database::error::{DatabaseError, DatabaseResult};
use crate::payments::types::AuditEventType;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Audit log entry
///
/// Append-only; rows are immutable once written.
#[derive(Debug, Clone, FromRow)]
pub struct AuditLog {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub event_type: String,
    pub event_data: Option<serde_json::Value>,
    pub user_id: Option<Uuid>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Insertable audit entry
#[derive(Debug, Clone)]
pub struct NewAuditLog {
    pub transaction_id: Uuid,
    pub event_type: AuditEventType,
    pub event_data: Option<serde_json::Value>,
    pub user_id: Option<Uuid>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl NewAuditLog {
    pub fn new(transaction_id: Uuid, event_type: AuditEventType) -> Self {
        Self {
            transaction_id,
            event_type,
            event_data: None,
            user_id: None,
            ip_address: None,
            user_agent: None,
        }
    }

    pub fn with_event_data(mut self, event_data: serde_json::Value) -> Self {
        self.event_data = Some(event_data);
        self
    }

    pub fn with_user_id(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_client(mut self, ip_address: Option<String>, user_agent: Option<String>) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }
}

/// Repository for the append-only audit log
pub struct AuditLogRepository {
    pool: PgPool,
}

impl AuditLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append an audit entry
    pub async fn append(&self, entry: &NewAuditLog) -> DatabaseResult<AuditLog> {
        sqlx::query_as::<_, AuditLog>(
            "INSERT INTO audit_logs \
             (transaction_id, event_type, event_data, user_id, ip_address, user_agent) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id, transaction_id, event_type, event_data, user_id, ip_address, \
                       user_agent, created_at",
        )
        .bind(entry.transaction_id)
        .bind(entry.event_type.as_str())
        .bind(&entry.event_data)
        .bind(entry.user_id)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// List entries for a transaction, oldest first
    pub async fn find_by_transaction(&self, transaction_id: Uuid) -> DatabaseResult<Vec<AuditLog>> {
        sqlx::query_as::<_, AuditLog>(
            "SELECT id, transaction_id, event_type, event_data, user_id, ip_address, \
                    user_agent, created_at \
             FROM audit_logs \
             WHERE transaction_id = $1 \
             ORDER BY created_at ASC",
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
