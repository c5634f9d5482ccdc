//! Payment orchestration service
//!
//! Owns admission (`initiate_payment`) and asynchronous processing
//! (`process_payment`). Admission guarantees at most one transaction row per
//! idempotency key; processing drives the state machine through
//! CAS-on-status updates, so at-least-once event delivery still advances
//! each transaction exactly once.

use crate::bus::{EventBus, PAYMENT_EVENTS_TOPIC, PAYMENT_RESULTS_TOPIC};
use crate::database::audit_log_repository::{AuditLogRepository, NewAuditLog};
use crate::database::transaction_repository::{
    NewTransaction, Transaction, TransactionRepository,
};
use crate::database::webhook_event_repository::{NewWebhookEvent, WebhookEventRepository};
use crate::error::{
    AppError, AppErrorKind, AppResult, DomainError, ValidationError,
};
use crate::payments::provider::ProviderAdapter;
use crate::payments::types::{
    AuditEventType, ChargeOutcome, InitiatePaymentRequest, PaymentEvent, PaymentEventType,
    PaymentMethod, PaymentResponse, TransactionStatus,
};
use bigdecimal::{BigDecimal, Zero};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::fraud::FraudScorer;
use super::idempotency::IdempotencyService;

const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

/// Configuration for the payment service
#[derive(Debug, Clone)]
pub struct PaymentServiceConfig {
    /// Deadline for a single provider charge call
    pub provider_timeout: Duration,
    /// Delivery budget stamped onto new webhook events
    pub webhook_max_attempts: i32,
}

impl Default for PaymentServiceConfig {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(30),
            webhook_max_attempts: 3,
        }
    }
}

/// Request metadata captured for the audit trail
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

pub struct PaymentService {
    transactions: Arc<TransactionRepository>,
    audit_logs: Arc<AuditLogRepository>,
    webhook_events: Arc<WebhookEventRepository>,
    idempotency: Arc<IdempotencyService>,
    fraud: Arc<FraudScorer>,
    provider: Arc<dyn ProviderAdapter>,
    bus: Arc<dyn EventBus>,
    config: PaymentServiceConfig,
}

impl PaymentService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transactions: Arc<TransactionRepository>,
        audit_logs: Arc<AuditLogRepository>,
        webhook_events: Arc<WebhookEventRepository>,
        idempotency: Arc<IdempotencyService>,
        fraud: Arc<FraudScorer>,
        provider: Arc<dyn ProviderAdapter>,
        bus: Arc<dyn EventBus>,
        config: PaymentServiceConfig,
    ) -> Self {
        Self {
            transactions,
            audit_logs,
            webhook_events,
            idempotency,
            fraud,
            provider,
            bus,
            config,
        }
    }

    // =========================================================================
    // Admission
    // =========================================================================

    /// Initiate a new payment transaction
    ///
    /// Idempotent per key: replays return the existing transaction without
    /// repeating any side effect.
    pub async fn initiate_payment(
        &self,
        request: InitiatePaymentRequest,
        client: ClientInfo,
    ) -> AppResult<PaymentResponse> {
        info!(
            user_id = %request.user_id,
            merchant_id = %request.merchant_id,
            amount = %request.amount,
            currency = %request.currency,
            "Initiating payment"
        );

        let idempotency_key = match &request.idempotency_key {
            Some(key) if !key.trim().is_empty() => key.clone(),
            _ => self.idempotency.generate(),
        };
        if idempotency_key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(AppError::new(AppErrorKind::Validation(
                ValidationError::InvalidField {
                    field: "idempotency_key".to_string(),
                    reason: format!("must be at most {} characters", MAX_IDEMPOTENCY_KEY_LEN),
                },
            )));
        }

        // Fast path: a previous initiate already owns this key
        if let Some(existing) = self.idempotency.lookup(&idempotency_key).await? {
            info!(
                idempotency_key = %idempotency_key,
                transaction_id = %existing.id,
                "Duplicate payment request; returning existing transaction"
            );
            self.append_audit(
                NewAuditLog::new(existing.id, AuditEventType::IdempotencyCheck)
                    .with_event_data(serde_json::json!({
                        "idempotency_key": idempotency_key,
                        "result": "duplicate",
                    }))
                    .with_user_id(request.user_id)
                    .with_client(client.ip_address.clone(), client.user_agent.clone()),
            )
            .await;
            return Ok(PaymentResponse::from(&existing));
        }

        validate_request(&request)?;

        let fraud_score = self.fraud.score(&request);
        let blocked = self.fraud.should_block(&fraud_score);
        if blocked {
            warn!(
                user_id = %request.user_id,
                fraud_score = %fraud_score,
                "Payment blocked by fraud check; persisting as FAILED"
            );
        }

        let transaction_id = Uuid::new_v4();
        let new_tx = build_transaction(&request, transaction_id, &idempotency_key, &fraud_score, blocked);

        // Reserve before insert so a concurrent initiate with the same key
        // observes the reservation instead of racing the insert.
        if !self.idempotency.reserve(&idempotency_key, transaction_id).await {
            if let Some(existing) = self.idempotency.lookup(&idempotency_key).await? {
                return Ok(PaymentResponse::from(&existing));
            }
            // The winner's insert is still in flight; the client retries
            // with the same key and finds it.
            return Err(AppError::new(AppErrorKind::Domain(
                DomainError::DuplicateTransaction {
                    idempotency_key: idempotency_key.clone(),
                },
            )));
        }

        let transaction = match self.transactions.insert(&new_tx).await {
            Ok(tx) => tx,
            Err(e) if e.is_unique_violation() => {
                // Cache could not arbitrate (unavailable or expired); the
                // unique constraint did. Return the winning row.
                info!(
                    idempotency_key = %idempotency_key,
                    "Insert hit unique constraint; resolving to existing transaction"
                );
                return match self
                    .transactions
                    .find_by_idempotency_key(&idempotency_key)
                    .await?
                {
                    Some(existing) => Ok(PaymentResponse::from(&existing)),
                    None => Err(AppError::new(AppErrorKind::Domain(
                        DomainError::DuplicateTransaction {
                            idempotency_key: idempotency_key.clone(),
                        },
                    ))),
                };
            }
            Err(e) => {
                // Admission aborts before the row exists; free the reservation
                self.idempotency.release(&idempotency_key).await;
                return Err(e.into());
            }
        };

        self.append_audit(
            NewAuditLog::new(transaction.id, AuditEventType::IdempotencyCheck)
                .with_event_data(serde_json::json!({
                    "idempotency_key": idempotency_key,
                    "result": "reserved",
                }))
                .with_user_id(transaction.user_id)
                .with_client(client.ip_address.clone(), client.user_agent.clone()),
        )
        .await;
        self.append_audit(
            NewAuditLog::new(transaction.id, AuditEventType::PaymentInitiated)
                .with_user_id(transaction.user_id)
                .with_client(client.ip_address.clone(), client.user_agent.clone()),
        )
        .await;
        self.append_audit(
            NewAuditLog::new(transaction.id, AuditEventType::FraudCheck)
                .with_event_data(serde_json::json!({
                    "fraud_score": fraud_score.to_string(),
                    "blocked": blocked,
                }))
                .with_user_id(transaction.user_id),
        )
        .await;

        if blocked {
            // Terminal on arrival: emit the failure event and notify
            self.append_audit(
                NewAuditLog::new(transaction.id, AuditEventType::PaymentFailed)
                    .with_event_data(serde_json::json!({ "error_code": "FRAUD_BLOCKED" })),
            )
            .await;
            self.publish_event(&transaction, PaymentEventType::PaymentFailed, true)
                .await?;
            self.enqueue_webhook(&transaction).await;
        } else {
            self.publish_event(&transaction, PaymentEventType::PaymentInitiated, false)
                .await?;
        }

        info!(
            transaction_id = %transaction.id,
            reference_id = %transaction.reference_id,
            status = %transaction.status,
            "Payment initiated"
        );

        Ok(PaymentResponse::from(&transaction))
    }

    // =========================================================================
    // Asynchronous processing
    // =========================================================================

    /// Process a payment transaction
    ///
    /// Consumer entry point for PAYMENT_INITIATED events. Safe under
    /// redelivery: anything not PENDING is a no-op, and the
    /// PENDING -> PROCESSING CAS admits exactly one worker.
    pub async fn process_payment(&self, transaction_id: Uuid) -> AppResult<()> {
        info!(transaction_id = %transaction_id, "Processing payment");

        let transaction = self
            .transactions
            .find_by_id(transaction_id)
            .await?
            .ok_or_else(|| {
                AppError::new(AppErrorKind::Domain(DomainError::TransactionNotFound {
                    transaction_id: transaction_id.to_string(),
                }))
            })?;

        match transaction.parsed_status() {
            Some(TransactionStatus::Pending) => {}
            Some(status) => {
                info!(
                    transaction_id = %transaction_id,
                    status = %status,
                    "Transaction is not PENDING; skipping redelivered event"
                );
                return Ok(());
            }
            None => {
                error!(
                    transaction_id = %transaction_id,
                    status = %transaction.status,
                    "Transaction carries an unknown status"
                );
                return Ok(());
            }
        }

        let processing = match self
            .transactions
            .update_status(
                transaction.id,
                TransactionStatus::Pending,
                TransactionStatus::Processing,
            )
            .await
        {
            Ok(tx) => tx,
            Err(e) if e.is_status_conflict() => {
                info!(
                    transaction_id = %transaction_id,
                    "Lost the PENDING -> PROCESSING race; another worker owns this transaction"
                );
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        self.append_audit(NewAuditLog::new(
            processing.id,
            AuditEventType::PaymentProcessed,
        ))
        .await;

        let charge = tokio::time::timeout(
            self.config.provider_timeout,
            self.provider.charge(&processing),
        )
        .await;

        match charge {
            Ok(Ok(outcome)) => self.complete_success(processing, outcome).await,
            Ok(Err(provider_err)) => {
                let code = provider_err.error_code();
                let message = provider_err.to_string();
                self.complete_failure(processing, code, &message).await
            }
            Err(_) => {
                let message = format!(
                    "provider call exceeded {}s deadline",
                    self.config.provider_timeout.as_secs()
                );
                self.complete_failure(processing, "PROVIDER_TIMEOUT", &message)
                    .await
            }
        }
    }

    async fn complete_success(
        &self,
        transaction: Transaction,
        outcome: ChargeOutcome,
    ) -> AppResult<()> {
        let mut provider_metadata = serde_json::json!({
            "provider_ref": outcome.provider_ref,
        });
        if let Some(client_secret) = &outcome.client_secret {
            provider_metadata["client_secret"] = serde_json::json!(client_secret);
        }
        if let Some(redirect_url) = &outcome.redirect_url {
            provider_metadata["redirect_url"] = serde_json::json!(redirect_url);
        }

        let updated = match self
            .transactions
            .update_status_with_metadata(
                transaction.id,
                TransactionStatus::Processing,
                TransactionStatus::Success,
                provider_metadata,
            )
            .await
        {
            Ok(tx) => tx,
            Err(e) if e.is_status_conflict() => {
                warn!(
                    transaction_id = %transaction.id,
                    "PROCESSING -> SUCCESS conflicted; transition already applied"
                );
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            transaction_id = %updated.id,
            reference_id = %updated.reference_id,
            provider_ref = %outcome.provider_ref,
            "Payment succeeded"
        );

        self.append_audit(NewAuditLog::new(updated.id, AuditEventType::PaymentSuccess))
            .await;
        self.publish_terminal(&updated, PaymentEventType::PaymentSuccess)
            .await;
        self.enqueue_webhook(&updated).await;

        Ok(())
    }

    async fn complete_failure(
        &self,
        transaction: Transaction,
        error_code: &str,
        error_message: &str,
    ) -> AppResult<()> {
        let updated = match self
            .transactions
            .update_status_failed(
                transaction.id,
                TransactionStatus::Processing,
                error_code,
                error_message,
            )
            .await
        {
            Ok(tx) => tx,
            Err(e) if e.is_status_conflict() => {
                warn!(
                    transaction_id = %transaction.id,
                    "PROCESSING -> FAILED conflicted; transition already applied"
                );
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        error!(
            transaction_id = %updated.id,
            reference_id = %updated.reference_id,
            error_code = %error_code,
            error_message = %error_message,
            "Payment failed"
        );

        self.append_audit(
            NewAuditLog::new(updated.id, AuditEventType::PaymentFailed).with_event_data(
                serde_json::json!({
                    "error_code": error_code,
                    "error_message": error_message,
                }),
            ),
        )
        .await;
        self.publish_terminal(&updated, PaymentEventType::PaymentFailed)
            .await;
        self.enqueue_webhook(&updated).await;

        Ok(())
    }

    // =========================================================================
    // Status queries
    // =========================================================================

    /// Fetch the current transaction by id or reference id. No side effects.
    pub async fn get_payment_status(&self, raw_id: &str) -> AppResult<PaymentResponse> {
        let by_id = match Uuid::parse_str(raw_id) {
            Ok(id) => self.transactions.find_by_id(id).await?,
            Err(_) => None,
        };

        let transaction = match by_id {
            Some(tx) => Some(tx),
            None => self.transactions.find_by_reference_id(raw_id).await?,
        };

        transaction
            .map(|tx| PaymentResponse::from(&tx))
            .ok_or_else(|| {
                AppError::new(AppErrorKind::Domain(DomainError::TransactionNotFound {
                    transaction_id: raw_id.to_string(),
                }))
            })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Audit append never fails the caller's main flow
    async fn append_audit(&self, entry: NewAuditLog) {
        if let Err(e) = self.audit_logs.append(&entry).await {
            warn!(
                transaction_id = %entry.transaction_id,
                error = %e,
                "Failed to append audit entry"
            );
        }
    }

    /// Publish to payment-events, mirroring terminal events to
    /// payment-results. During admission a publish failure surfaces to the
    /// caller; the row is already persisted, so a retry with the same key
    /// recovers the state.
    async fn publish_event(
        &self,
        transaction: &Transaction,
        event_type: PaymentEventType,
        terminal: bool,
    ) -> AppResult<()> {
        let event = PaymentEvent::from_transaction(transaction, event_type);
        let key = transaction.id.to_string();

        self.bus
            .publish(PAYMENT_EVENTS_TOPIC, &key, &event)
            .await
            .map_err(AppError::from)?;
        if terminal {
            self.bus
                .publish(PAYMENT_RESULTS_TOPIC, &key, &event)
                .await
                .map_err(AppError::from)?;
        }

        info!(
            transaction_id = %transaction.id,
            event_type = ?event_type,
            "Published payment event"
        );
        Ok(())
    }

    /// Terminal publish inside the consumer: the transition is already
    /// durable, so a bus failure is logged rather than propagated.
    async fn publish_terminal(&self, transaction: &Transaction, event_type: PaymentEventType) {
        if let Err(e) = self.publish_event(transaction, event_type, true).await {
            error!(
                transaction_id = %transaction.id,
                error = %e,
                "Failed to publish terminal payment event"
            );
        }
    }

    /// Create the delivery record for a terminal transaction with a webhook URL
    async fn enqueue_webhook(&self, transaction: &Transaction) {
        let webhook_url = match &transaction.webhook_url {
            Some(url) => url.clone(),
            None => return,
        };

        let event = NewWebhookEvent {
            transaction_id: transaction.id,
            webhook_url,
            payload: webhook_payload(transaction),
            max_attempts: self.config.webhook_max_attempts,
            next_retry_at: chrono::Utc::now(),
        };

        match self.webhook_events.insert(&event).await {
            Ok(created) => info!(
                transaction_id = %transaction.id,
                webhook_event_id = %created.id,
                "Webhook event created"
            ),
            Err(e) => error!(
                transaction_id = %transaction.id,
                error = %e,
                "Failed to create webhook event"
            ),
        }
    }
}

/// Outbound webhook body; `reference_id` is the receiver's deduplication key
fn webhook_payload(transaction: &Transaction) -> serde_json::Value {
    serde_json::json!({
        "transaction_id": transaction.id.to_string(),
        "reference_id": transaction.reference_id,
        "status": transaction.status,
        "amount": transaction.amount.to_string(),
        "currency": transaction.currency,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })
}

/// Human-visible unique reference: TXN + epoch millis + 8 random hex chars
pub fn generate_reference_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix = Uuid::new_v4().simple().to_string();
    format!("TXN{}{}", millis, &suffix[..8])
}

fn build_transaction(
    request: &InitiatePaymentRequest,
    transaction_id: Uuid,
    idempotency_key: &str,
    fraud_score: &BigDecimal,
    blocked: bool,
) -> NewTransaction {
    let (status, error_code, error_message) = if blocked {
        (
            TransactionStatus::Failed,
            Some("FRAUD_BLOCKED".to_string()),
            Some("Payment blocked by fraud checks".to_string()),
        )
    } else {
        (TransactionStatus::Pending, None, None)
    };

    NewTransaction {
        id: transaction_id,
        reference_id: generate_reference_id(),
        user_id: request.user_id,
        merchant_id: request.merchant_id,
        amount: request.amount.clone(),
        currency: request.currency.to_uppercase(),
        payment_method: request.payment_method.as_str().to_string(),
        payment_provider: request.payment_provider.clone(),
        status,
        description: request.description.clone(),
        metadata: request
            .metadata
            .clone()
            .unwrap_or_else(|| serde_json::json!({})),
        idempotency_key: Some(idempotency_key.to_string()),
        fraud_score: Some(fraud_score.clone()),
        error_code,
        error_message,
        webhook_url: request.webhook_url.clone(),
    }
}

fn validate_request(request: &InitiatePaymentRequest) -> AppResult<()> {
    if request.amount <= BigDecimal::zero() {
        return Err(AppError::new(AppErrorKind::Validation(
            ValidationError::InvalidAmount {
                amount: request.amount.to_string(),
                reason: "Amount must be greater than zero".to_string(),
            },
        )));
    }

    let currency = request.currency.trim();
    if currency.len() != 3 || !currency.bytes().all(|b| b.is_ascii_alphabetic()) {
        return Err(AppError::new(AppErrorKind::Validation(
            ValidationError::InvalidCurrency {
                currency: request.currency.clone(),
                reason: "Currency must be a three-letter ISO 4217 code".to_string(),
            },
        )));
    }

    match request.payment_method {
        PaymentMethod::Card => {
            require_field(&request.card_number, "card_number")?;
            require_field(&request.cvv, "cvv")?;
        }
        PaymentMethod::Bank => {
            require_field(&request.account_number, "account_number")?;
            require_field(&request.routing_number, "routing_number")?;
        }
        PaymentMethod::Wallet => {
            require_field(&request.wallet_id, "wallet_id")?;
        }
    }

    if let Some(url) = &request.webhook_url {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(AppError::new(AppErrorKind::Validation(
                ValidationError::InvalidField {
                    field: "webhook_url".to_string(),
                    reason: "must be an http or https URL".to_string(),
                },
            )));
        }
    }

    Ok(())
}

fn require_field(value: &Option<String>, field: &str) -> AppResult<()> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(()),
        _ => Err(AppError::new(AppErrorKind::Validation(
            ValidationError::MissingField {
                field: field.to_string(),
            },
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn request(method: PaymentMethod) -> InitiatePaymentRequest {
        InitiatePaymentRequest {
            user_id: Uuid::new_v4(),
            merchant_id: Uuid::new_v4(),
            amount: BigDecimal::from_str("49.99").expect("amount"),
            currency: "USD".to_string(),
            payment_method: method,
            payment_provider: None,
            description: None,
            card_number: Some("4242424242424242".to_string()),
            cvv: Some("123".to_string()),
            account_number: None,
            routing_number: None,
            wallet_id: None,
            idempotency_key: None,
            webhook_url: None,
            metadata: None,
        }
    }

    #[test]
    fn reference_id_has_expected_shape() {
        let reference = generate_reference_id();
        assert!(reference.starts_with("TXN"));
        // TXN + 13-digit epoch millis + 8 hex chars
        assert_eq!(reference.len(), 3 + 13 + 8);
        assert!(reference[3..16].bytes().all(|b| b.is_ascii_digit()));
    }

    #[test]
    fn reference_ids_are_unique() {
        let a = generate_reference_id();
        let b = generate_reference_id();
        assert_ne!(a, b);
    }

    #[test]
    fn validation_accepts_complete_card_request() {
        assert!(validate_request(&request(PaymentMethod::Card)).is_ok());
    }

    #[test]
    fn validation_rejects_non_positive_amount() {
        let mut req = request(PaymentMethod::Card);
        req.amount = BigDecimal::zero();
        assert!(validate_request(&req).is_err());

        req.amount = BigDecimal::from(-5);
        assert!(validate_request(&req).is_err());
    }

    #[test]
    fn validation_rejects_bad_currency() {
        let mut req = request(PaymentMethod::Card);
        req.currency = "US".to_string();
        assert!(validate_request(&req).is_err());

        req.currency = "U5D".to_string();
        assert!(validate_request(&req).is_err());
    }

    #[test]
    fn validation_requires_method_specific_fields() {
        let mut card = request(PaymentMethod::Card);
        card.cvv = None;
        assert!(validate_request(&card).is_err());

        let bank = request(PaymentMethod::Bank);
        assert!(validate_request(&bank).is_err());

        let mut bank = request(PaymentMethod::Bank);
        bank.account_number = Some("000123456789".to_string());
        bank.routing_number = Some("110000000".to_string());
        assert!(validate_request(&bank).is_ok());

        let mut wallet = request(PaymentMethod::Wallet);
        wallet.wallet_id = None;
        assert!(validate_request(&wallet).is_err());
    }

    #[test]
    fn validation_rejects_non_http_webhook_url() {
        let mut req = request(PaymentMethod::Card);
        req.webhook_url = Some("ftp://merchant.example.com/hook".to_string());
        assert!(validate_request(&req).is_err());
    }

    #[test]
    fn blocked_transaction_is_built_terminal() {
        let req = request(PaymentMethod::Card);
        let score = BigDecimal::from(1);
        let tx = build_transaction(&req, Uuid::new_v4(), "K1", &score, true);

        assert_eq!(tx.status, TransactionStatus::Failed);
        assert_eq!(tx.error_code.as_deref(), Some("FRAUD_BLOCKED"));
        assert_eq!(tx.fraud_score, Some(score));
    }

    #[test]
    fn webhook_payload_carries_dedup_fields() {
        let now = chrono::Utc::now();
        let tx = Transaction {
            id: Uuid::new_v4(),
            reference_id: "TXN1700000000000abcd1234".to_string(),
            user_id: Uuid::new_v4(),
            merchant_id: Uuid::new_v4(),
            amount: BigDecimal::from_str("49.99").expect("amount"),
            currency: "USD".to_string(),
            payment_method: "CARD".to_string(),
            payment_provider: None,
            status: TransactionStatus::Success.as_str().to_string(),
            description: None,
            metadata: serde_json::json!({}),
            idempotency_key: Some("K1".to_string()),
            fraud_score: None,
            error_code: None,
            error_message: None,
            webhook_url: Some("https://merchant.example.com/hook".to_string()),
            webhook_attempts: 0,
            webhook_last_attempt: None,
            created_at: now,
            updated_at: now,
        };

        let payload = webhook_payload(&tx);
        assert_eq!(payload["transaction_id"], tx.id.to_string());
        assert_eq!(payload["reference_id"], "TXN1700000000000abcd1234");
        assert_eq!(payload["status"], "SUCCESS");
        assert_eq!(payload["amount"], "49.99");
        assert_eq!(payload["currency"], "USD");
        assert!(payload["timestamp"].is_string());
    }
}
