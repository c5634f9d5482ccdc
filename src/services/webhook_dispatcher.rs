//! Webhook delivery engine
//!
//! Polled by the retry worker: picks up due delivery records, POSTs the
//! payload, and writes back each attempt atomically. Non-2xx responses
//! reschedule with exponential backoff until the attempt budget runs out.

use crate::database::audit_log_repository::{AuditLogRepository, NewAuditLog};
use crate::database::error::DatabaseError;
use crate::database::transaction_repository::TransactionRepository;
use crate::database::webhook_event_repository::{WebhookEvent, WebhookEventRepository};
use crate::payments::types::AuditEventType;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum WebhookDispatchError {
    #[error("HTTP client error: {0}")]
    Http(String),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

#[derive(Debug, Clone)]
pub struct WebhookDispatcherConfig {
    /// First retry delay; later retries double it per attempt
    pub base_delay_ms: u64,
    /// Maximum webhooks picked up per tick
    pub batch_limit: i64,
    /// Outbound request deadline
    pub timeout: Duration,
}

impl Default for WebhookDispatcherConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            batch_limit: 50,
            timeout: Duration::from_secs(5),
        }
    }
}

pub struct WebhookDispatcher {
    webhook_events: Arc<WebhookEventRepository>,
    transactions: Arc<TransactionRepository>,
    audit_logs: Arc<AuditLogRepository>,
    http: reqwest::Client,
    config: WebhookDispatcherConfig,
}

impl WebhookDispatcher {
    pub fn new(
        webhook_events: Arc<WebhookEventRepository>,
        transactions: Arc<TransactionRepository>,
        audit_logs: Arc<AuditLogRepository>,
        config: WebhookDispatcherConfig,
    ) -> Result<Self, WebhookDispatchError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| WebhookDispatchError::Http(e.to_string()))?;

        Ok(Self {
            webhook_events,
            transactions,
            audit_logs,
            http,
            config,
        })
    }

    /// One dispatcher tick: deliver everything currently due
    ///
    /// Returns the number of webhooks attempted.
    pub async fn run_once(&self) -> Result<usize, WebhookDispatchError> {
        let now = chrono::Utc::now();
        let due = self
            .webhook_events
            .find_pending(now, self.config.batch_limit)
            .await?;

        for event in &due {
            self.attempt_delivery(event).await;
        }

        Ok(due.len())
    }

    async fn attempt_delivery(&self, event: &WebhookEvent) {
        info!(
            webhook_event_id = %event.id,
            transaction_id = %event.transaction_id,
            attempt = event.attempts + 1,
            max_attempts = event.max_attempts,
            "Delivering webhook"
        );

        let response = self
            .http
            .post(&event.webhook_url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&event.payload)
            .send()
            .await;
        let attempted_at = chrono::Utc::now();

        match response {
            Ok(resp) if resp.status().is_success() => {
                let status = resp.status().as_u16() as i32;
                let body = resp.text().await.unwrap_or_default();
                self.record_success(event, status, &body, attempted_at).await;
            }
            Ok(resp) => {
                let status = resp.status().as_u16() as i32;
                let body = resp.text().await.unwrap_or_default();
                warn!(
                    webhook_event_id = %event.id,
                    response_status = status,
                    "Webhook endpoint returned non-2xx"
                );
                self.record_failure(event, Some(status), &body, attempted_at)
                    .await;
            }
            Err(e) => {
                warn!(
                    webhook_event_id = %event.id,
                    error = %e,
                    "Webhook delivery transport error"
                );
                self.record_failure(event, None, &e.to_string(), attempted_at)
                    .await;
            }
        }
    }

    async fn record_success(
        &self,
        event: &WebhookEvent,
        response_status: i32,
        response_body: &str,
        attempted_at: chrono::DateTime<chrono::Utc>,
    ) {
        // Delivery stops at the first 2xx: exhausting the attempt budget
        // marks the record terminal for the pending query.
        let result = self
            .webhook_events
            .record_attempt(
                event.id,
                Some(response_status),
                Some(response_body),
                event.max_attempts,
                None,
            )
            .await;
        if let Err(e) = result {
            error!(webhook_event_id = %event.id, error = %e, "Failed to record webhook success");
            return;
        }

        self.bump_transaction_counters(event, attempted_at).await;
        self.append_audit(
            NewAuditLog::new(event.transaction_id, AuditEventType::WebhookSent).with_event_data(
                serde_json::json!({
                    "webhook_event_id": event.id.to_string(),
                    "url": event.webhook_url,
                    "response_status": response_status,
                }),
            ),
        )
        .await;

        info!(
            webhook_event_id = %event.id,
            transaction_id = %event.transaction_id,
            response_status = response_status,
            "Webhook delivered"
        );
    }

    async fn record_failure(
        &self,
        event: &WebhookEvent,
        response_status: Option<i32>,
        response_body: &str,
        attempted_at: chrono::DateTime<chrono::Utc>,
    ) {
        let attempts = event.attempts + 1;
        let exhausted = attempts >= event.max_attempts;
        let next_retry_at = if exhausted {
            None
        } else {
            Some(attempted_at + backoff_delay(self.config.base_delay_ms, attempts))
        };

        let result = self
            .webhook_events
            .record_attempt(
                event.id,
                response_status,
                Some(response_body),
                attempts,
                next_retry_at,
            )
            .await;
        if let Err(e) = result {
            error!(webhook_event_id = %event.id, error = %e, "Failed to record webhook attempt");
            return;
        }

        self.bump_transaction_counters(event, attempted_at).await;

        if exhausted {
            error!(
                webhook_event_id = %event.id,
                transaction_id = %event.transaction_id,
                attempts = attempts,
                "Webhook delivery exhausted its retry budget"
            );
            self.append_audit(
                NewAuditLog::new(event.transaction_id, AuditEventType::WebhookFailed)
                    .with_event_data(serde_json::json!({
                        "webhook_event_id": event.id.to_string(),
                        "url": event.webhook_url,
                        "attempts": attempts,
                        "response_status": response_status,
                    })),
            )
            .await;
        }
    }

    async fn bump_transaction_counters(
        &self,
        event: &WebhookEvent,
        attempted_at: chrono::DateTime<chrono::Utc>,
    ) {
        if let Err(e) = self
            .transactions
            .record_webhook_attempt(event.transaction_id, attempted_at)
            .await
        {
            warn!(
                transaction_id = %event.transaction_id,
                error = %e,
                "Failed to bump transaction webhook counters"
            );
        }
    }

    async fn append_audit(&self, entry: NewAuditLog) {
        if let Err(e) = self.audit_logs.append(&entry).await {
            warn!(
                transaction_id = %entry.transaction_id,
                error = %e,
                "Failed to append audit entry"
            );
        }
    }
}

/// Retry delay after `attempts_made` failed attempts:
/// `base * 2^(attempts-1)`, jittered by ±20% to spread thundering herds
pub fn backoff_delay(base_delay_ms: u64, attempts_made: i32) -> chrono::Duration {
    let exponent = (attempts_made - 1).clamp(0, 20) as u32;
    let raw_ms = base_delay_ms.saturating_mul(1u64 << exponent);
    let jittered_ms = (raw_ms as f64 * jitter_factor()) as i64;
    chrono::Duration::milliseconds(jittered_ms)
}

/// Dependency-free jitter factor in [0.8, 1.2)
fn jitter_factor() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    0.8 + (nanos % 400_000_000) as f64 / 1_000_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt_within_jitter_bounds() {
        let base = 1000;

        let first = backoff_delay(base, 1).num_milliseconds();
        assert!((800..1200).contains(&first), "first delay {}", first);

        let second = backoff_delay(base, 2).num_milliseconds();
        assert!((1600..2400).contains(&second), "second delay {}", second);

        let third = backoff_delay(base, 3).num_milliseconds();
        assert!((3200..4800).contains(&third), "third delay {}", third);
    }

    #[test]
    fn backoff_exponent_is_capped() {
        // Absurd attempt counts must not overflow
        let delay = backoff_delay(1000, 1000);
        assert!(delay.num_milliseconds() > 0);
    }

    #[test]
    fn jitter_stays_in_bounds() {
        for _ in 0..100 {
            let factor = jitter_factor();
            assert!((0.8..1.2).contains(&factor), "factor {}", factor);
        }
    }
}
