use crate::database::transaction_repository::Transaction;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use uuid::Uuid;

/// How the customer pays
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentMethod {
    Card,
    Wallet,
    Bank,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "CARD",
            PaymentMethod::Wallet => "WALLET",
            PaymentMethod::Bank => "BANK",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "CARD" => Ok(PaymentMethod::Card),
            "WALLET" => Ok(PaymentMethod::Wallet),
            "BANK" => Ok(PaymentMethod::Bank),
            _ => Err(format!("unsupported payment method: {}", value)),
        }
    }
}

/// Transaction lifecycle status
///
/// Transitions are append-only:
///
/// ```text
///  PENDING ──► PROCESSING ──► SUCCESS   (terminal)
///     │            │
///     │            └────────► FAILED    (terminal)
///     └──────────────────────► CANCELLED (terminal)
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Processing => "PROCESSING",
            TransactionStatus::Success => "SUCCESS",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Cancelled => "CANCELLED",
        }
    }

    /// Get all valid transitions from this state
    pub fn valid_transitions(&self) -> &'static [TransactionStatus] {
        match self {
            TransactionStatus::Pending => {
                &[TransactionStatus::Processing, TransactionStatus::Cancelled]
            }
            TransactionStatus::Processing => {
                &[TransactionStatus::Success, TransactionStatus::Failed]
            }
            // Terminal states - no valid transitions
            TransactionStatus::Success
            | TransactionStatus::Failed
            | TransactionStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, target: TransactionStatus) -> bool {
        self.valid_transitions().contains(&target)
    }

    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Success | TransactionStatus::Failed | TransactionStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "PENDING" => Ok(TransactionStatus::Pending),
            "PROCESSING" => Ok(TransactionStatus::Processing),
            "SUCCESS" => Ok(TransactionStatus::Success),
            "FAILED" => Ok(TransactionStatus::Failed),
            "CANCELLED" => Ok(TransactionStatus::Cancelled),
            _ => Err(format!("unknown transaction status: {}", value)),
        }
    }
}

/// Audit log event types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEventType {
    PaymentInitiated,
    PaymentProcessed,
    PaymentSuccess,
    PaymentFailed,
    WebhookSent,
    WebhookFailed,
    FraudCheck,
    IdempotencyCheck,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::PaymentInitiated => "PAYMENT_INITIATED",
            AuditEventType::PaymentProcessed => "PAYMENT_PROCESSED",
            AuditEventType::PaymentSuccess => "PAYMENT_SUCCESS",
            AuditEventType::PaymentFailed => "PAYMENT_FAILED",
            AuditEventType::WebhookSent => "WEBHOOK_SENT",
            AuditEventType::WebhookFailed => "WEBHOOK_FAILED",
            AuditEventType::FraudCheck => "FRAUD_CHECK",
            AuditEventType::IdempotencyCheck => "IDEMPOTENCY_CHECK",
        }
    }
}

/// Event types carried on the payment-events topic
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentEventType {
    PaymentInitiated,
    PaymentProcessed,
    PaymentSuccess,
    PaymentFailed,
    WebhookSent,
    WebhookFailed,
}

/// Payment initiation request as received from the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiatePaymentRequest {
    pub user_id: Uuid,
    pub merchant_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub payment_provider: Option<String>,
    pub description: Option<String>,
    // Method-specific fields; validated during admission and never persisted
    pub card_number: Option<String>,
    pub cvv: Option<String>,
    pub account_number: Option<String>,
    pub routing_number: Option<String>,
    pub wallet_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub webhook_url: Option<String>,
    pub metadata: Option<JsonValue>,
}

/// Payment response returned to API callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentResponse {
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
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<&Transaction> for PaymentResponse {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id,
            reference_id: tx.reference_id.clone(),
            user_id: tx.user_id,
            merchant_id: tx.merchant_id,
            amount: tx.amount.clone(),
            currency: tx.currency.clone(),
            payment_method: tx.payment_method.clone(),
            payment_provider: tx.payment_provider.clone(),
            status: tx.status.clone(),
            description: tx.description.clone(),
            error_code: tx.error_code.clone(),
            error_message: tx.error_message.clone(),
            created_at: tx.created_at,
            updated_at: tx.updated_at,
        }
    }
}

/// Event published on the payment topics: a transaction snapshot plus the
/// transition that produced it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub transaction_id: Uuid,
    pub reference_id: String,
    pub user_id: Uuid,
    pub merchant_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub payment_method: String,
    pub payment_provider: Option<String>,
    pub status: String,
    pub description: Option<String>,
    pub idempotency_key: Option<String>,
    pub fraud_score: Option<BigDecimal>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub webhook_url: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub event_type: PaymentEventType,
    pub event_timestamp: chrono::DateTime<chrono::Utc>,
}

impl PaymentEvent {
    pub fn from_transaction(tx: &Transaction, event_type: PaymentEventType) -> Self {
        Self {
            transaction_id: tx.id,
            reference_id: tx.reference_id.clone(),
            user_id: tx.user_id,
            merchant_id: tx.merchant_id,
            amount: tx.amount.clone(),
            currency: tx.currency.clone(),
            payment_method: tx.payment_method.clone(),
            payment_provider: tx.payment_provider.clone(),
            status: tx.status.clone(),
            description: tx.description.clone(),
            idempotency_key: tx.idempotency_key.clone(),
            fraud_score: tx.fraud_score.clone(),
            error_code: tx.error_code.clone(),
            error_message: tx.error_message.clone(),
            webhook_url: tx.webhook_url.clone(),
            created_at: tx.created_at,
            updated_at: tx.updated_at,
            event_type,
            event_timestamp: chrono::Utc::now(),
        }
    }
}

/// Successful provider charge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeOutcome {
    pub provider_ref: String,
    pub client_secret: Option<String>,
    pub redirect_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_valid() {
        assert!(TransactionStatus::Pending.can_transition_to(TransactionStatus::Processing));
        assert!(TransactionStatus::Pending.can_transition_to(TransactionStatus::Cancelled));
        assert!(TransactionStatus::Processing.can_transition_to(TransactionStatus::Success));
        assert!(TransactionStatus::Processing.can_transition_to(TransactionStatus::Failed));
    }

    #[test]
    fn status_transitions_invalid() {
        // Can't skip processing
        assert!(!TransactionStatus::Pending.can_transition_to(TransactionStatus::Success));
        assert!(!TransactionStatus::Pending.can_transition_to(TransactionStatus::Failed));
        // No backwards movement
        assert!(!TransactionStatus::Processing.can_transition_to(TransactionStatus::Pending));
        // Terminal states are frozen
        assert!(TransactionStatus::Success.valid_transitions().is_empty());
        assert!(TransactionStatus::Failed.valid_transitions().is_empty());
        assert!(TransactionStatus::Cancelled.valid_transitions().is_empty());
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            TransactionStatus::Pending,
            TransactionStatus::Processing,
            TransactionStatus::Success,
            TransactionStatus::Failed,
            TransactionStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<TransactionStatus>(), Ok(status));
        }
    }

    #[test]
    fn payment_method_parses_case_insensitively() {
        assert_eq!("card".parse::<PaymentMethod>(), Ok(PaymentMethod::Card));
        assert_eq!("WALLET".parse::<PaymentMethod>(), Ok(PaymentMethod::Wallet));
        assert!("crypto".parse::<PaymentMethod>().is_err());
    }

    #[test]
    fn event_type_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&PaymentEventType::PaymentInitiated).unwrap();
        assert_eq!(json, "\"PAYMENT_INITIATED\"");
    }
}
