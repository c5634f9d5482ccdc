use thiserror::Error;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors surfaced by a payment provider charge
///
/// These never propagate past the orchestrator: they are absorbed into the
/// transaction row as `error_code`/`error_message` so status stays queryable.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Payment declined: {message}")]
    Declined {
        message: String,
        provider_code: Option<String>,
    },

    #[error("Provider timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Provider error: {message}")]
    Provider {
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Declined { .. } => false,
            ProviderError::Timeout { .. } => true,
            ProviderError::Network { .. } => true,
            ProviderError::Provider { retryable, .. } => *retryable,
        }
    }

    /// Machine code persisted on the failed transaction
    pub fn error_code(&self) -> &'static str {
        match self {
            ProviderError::Declined { .. } => "DECLINED",
            ProviderError::Timeout { .. } => "PROVIDER_TIMEOUT",
            ProviderError::Network { .. } | ProviderError::Provider { .. } => "PROVIDER_ERROR",
        }
    }
}

impl From<ProviderError> for crate::error::AppError {
    fn from(err: ProviderError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError};

        let kind = match &err {
            ProviderError::Timeout { timeout_secs } => AppErrorKind::External(ExternalError::Timeout {
                service: "payment provider".to_string(),
                timeout_secs: *timeout_secs,
            }),
            _ => AppErrorKind::External(ExternalError::PaymentProvider {
                provider: "provider".to_string(),
                message: err.to_string(),
                is_retryable: err.is_retryable(),
            }),
        };

        AppError::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_match_taxonomy() {
        let declined = ProviderError::Declined {
            message: "insufficient funds".to_string(),
            provider_code: Some("51".to_string()),
        };
        assert_eq!(declined.error_code(), "DECLINED");
        assert!(!declined.is_retryable());

        let timeout = ProviderError::Timeout { timeout_secs: 30 };
        assert_eq!(timeout.error_code(), "PROVIDER_TIMEOUT");
        assert!(timeout.is_retryable());
    }
}
