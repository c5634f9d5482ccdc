use crate::database::transaction_repository::Transaction;
use crate::payments::error::ProviderResult;
use crate::payments::types::ChargeOutcome;
use async_trait::async_trait;

/// Seam between the orchestrator and the outside world
///
/// Implementations own all provider-side idempotency, keyed on
/// `tx.reference_id`, so a redelivered charge call must not double-charge.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Execute the charge for a transaction. May block for the duration of
    /// the provider round-trip; the orchestrator bounds it with a timeout.
    async fn charge(&self, tx: &Transaction) -> ProviderResult<ChargeOutcome>;

    fn name(&self) -> &str;
}
