//! Database-specific error types

use std::fmt;

/// Database operation error
#[derive(Debug)]
pub struct DatabaseError {
    kind: DatabaseErrorKind,
}

#[derive(Debug)]
pub enum DatabaseErrorKind {
    /// A UNIQUE constraint rejected the write
    UniqueViolation { constraint: Option<String> },
    /// Expected row was not found
    RowNotFound,
    /// Compare-and-swap on transaction status matched no row
    StatusConflict {
        transaction_id: String,
        expected: String,
    },
    /// Pool or connection failure
    Connection { message: String },
    /// Query execution failure
    Query { message: String },
    /// Anything else
    Unknown { message: String },
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> &DatabaseErrorKind {
        &self.kind
    }

    pub fn status_conflict(transaction_id: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::StatusConflict {
            transaction_id: transaction_id.into(),
            expected: expected.into(),
        })
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::UniqueViolation { .. })
    }

    pub fn is_status_conflict(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::StatusConflict { .. })
    }

    /// Whether retrying the operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::Connection { .. })
    }

    /// Map an sqlx error to a classified database error
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::new(DatabaseErrorKind::RowNotFound),
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    Self::new(DatabaseErrorKind::UniqueViolation {
                        constraint: db_err.constraint().map(|c| c.to_string()),
                    })
                } else {
                    Self::new(DatabaseErrorKind::Query {
                        message: db_err.to_string(),
                    })
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::new(DatabaseErrorKind::Connection {
                    message: err.to_string(),
                })
            }
            _ => Self::new(DatabaseErrorKind::Unknown {
                message: err.to_string(),
            }),
        }
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DatabaseErrorKind::UniqueViolation { constraint } => match constraint {
                Some(name) => write!(f, "Unique constraint violation: {}", name),
                None => write!(f, "Unique constraint violation"),
            },
            DatabaseErrorKind::RowNotFound => write!(f, "Row not found"),
            DatabaseErrorKind::StatusConflict {
                transaction_id,
                expected,
            } => write!(
                f,
                "Transaction {} is no longer in status {}",
                transaction_id, expected
            ),
            DatabaseErrorKind::Connection { message } => {
                write!(f, "Database connection error: {}", message)
            }
            DatabaseErrorKind::Query { message } => write!(f, "Database query error: {}", message),
            DatabaseErrorKind::Unknown { message } => write!(f, "Database error: {}", message),
        }
    }
}

impl std::error::Error for DatabaseError {}

impl From<DatabaseError> for crate::error::AppError {
    fn from(err: DatabaseError) -> Self {
        use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError};

        let kind = match err.kind() {
            DatabaseErrorKind::StatusConflict {
                transaction_id,
                expected,
            } => AppErrorKind::Domain(DomainError::InvalidStatusTransition {
                from: expected.clone(),
                to: format!("(conflicting update on {})", transaction_id),
            }),
            DatabaseErrorKind::RowNotFound => {
                AppErrorKind::Domain(DomainError::TransactionNotFound {
                    transaction_id: "unknown".to_string(),
                })
            }
            _ => AppErrorKind::Infrastructure(InfrastructureError::Database {
                message: err.to_string(),
                is_retryable: err.is_retryable(),
            }),
        };

        AppError::new(kind)
    }
}

/// Result type alias for database operations
pub type DatabaseResult<T> = Result<T, DatabaseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_conflict_classification() {
        let err = DatabaseError::status_conflict("tx-1", "PENDING");
        assert!(err.is_status_conflict());
        assert!(!err.is_unique_violation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_row_not_found_mapping() {
        let err = DatabaseError::from_sqlx(sqlx::Error::RowNotFound);
        assert!(matches!(err.kind(), DatabaseErrorKind::RowNotFound));
    }
}
