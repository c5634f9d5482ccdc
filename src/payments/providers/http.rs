//! HTTP charge provider
//!
//! Generic adapter for providers exposing a JSON charge endpoint. The
//! transaction's `reference_id` is sent as the `Idempotency-Key` header, so
//! replays of the same charge resolve to the same provider-side attempt.

use crate::database::transaction_repository::Transaction;
use crate::payments::error::{ProviderError, ProviderResult};
use crate::payments::provider::ProviderAdapter;
use crate::payments::types::ChargeOutcome;
use crate::payments::utils::PaymentHttpClient;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    pub charge_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl From<&crate::config::ProviderConfig> for HttpProviderConfig {
    fn from(config: &crate::config::ProviderConfig) -> Self {
        Self {
            charge_url: config.charge_url.clone(),
            api_key: config.api_key.clone(),
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChargeApiResponse {
    status: String,
    provider_ref: Option<String>,
    client_secret: Option<String>,
    redirect_url: Option<String>,
    code: Option<String>,
    message: Option<String>,
}

pub struct HttpProvider {
    config: HttpProviderConfig,
    http: PaymentHttpClient,
}

impl HttpProvider {
    pub fn new(config: HttpProviderConfig) -> ProviderResult<Self> {
        let http =
            PaymentHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }
}

#[async_trait]
impl ProviderAdapter for HttpProvider {
    async fn charge(&self, tx: &Transaction) -> ProviderResult<ChargeOutcome> {
        let body = serde_json::json!({
            "reference": tx.reference_id,
            "amount": tx.amount.to_string(),
            "currency": tx.currency,
            "payment_method": tx.payment_method,
            "metadata": tx.metadata,
        });

        let response: ChargeApiResponse = self
            .http
            .post_json(
                &self.config.charge_url,
                self.config.api_key.as_deref(),
                &body,
                &[("Idempotency-Key", tx.reference_id.as_str())],
            )
            .await?;

        match response.status.to_lowercase().as_str() {
            "success" | "succeeded" | "approved" => {
                let provider_ref = response.provider_ref.ok_or_else(|| {
                    ProviderError::Provider {
                        message: "provider omitted charge reference".to_string(),
                        provider_code: None,
                        retryable: false,
                    }
                })?;

                info!(
                    reference_id = %tx.reference_id,
                    provider_ref = %provider_ref,
                    "Provider approved charge"
                );

                Ok(ChargeOutcome {
                    provider_ref,
                    client_secret: response.client_secret,
                    redirect_url: response.redirect_url,
                })
            }
            "declined" | "failed" => Err(ProviderError::Declined {
                message: response
                    .message
                    .unwrap_or_else(|| "charge declined".to_string()),
                provider_code: response.code,
            }),
            other => Err(ProviderError::Provider {
                message: format!(
                    "unexpected charge status '{}': {}",
                    other,
                    response.message.unwrap_or_default()
                ),
                provider_code: response.code,
                retryable: false,
            }),
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}
