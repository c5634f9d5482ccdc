//! Idempotency gate
//!
//! Maps client idempotency keys to transaction ids across two layers: a
//! Redis fast path and the `UNIQUE(idempotency_key)` column on the
//! transactions table. The store is authoritative; every cache failure
//! degrades to a store round-trip, and the unique constraint is the final
//! arbiter when the cache cannot arbitrate a race.

use crate::cache::keys::idempotency::ReservationKey;
use crate::cache::RedisPool;
use crate::database::error::DatabaseResult;
use crate::database::transaction_repository::{Transaction, TransactionRepository};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub struct IdempotencyService {
    cache: Option<RedisPool>,
    transactions: Arc<TransactionRepository>,
    ttl_seconds: u64,
}

impl IdempotencyService {
    pub fn new(
        cache: Option<RedisPool>,
        transactions: Arc<TransactionRepository>,
        ttl_seconds: u64,
    ) -> Self {
        Self {
            cache,
            transactions,
            ttl_seconds,
        }
    }

    /// Fresh random 128-bit key for callers that omit one
    pub fn generate(&self) -> String {
        Uuid::new_v4().to_string()
    }

    /// Resolve an idempotency key to its transaction, if any
    ///
    /// Consults the cache first; on a cache miss the store is checked and a
    /// hit repopulates the cache.
    pub async fn lookup(&self, idempotency_key: &str) -> DatabaseResult<Option<Transaction>> {
        if idempotency_key.trim().is_empty() {
            return Ok(None);
        }

        if let Some(cached_id) = self.cache_get(idempotency_key).await {
            if let Ok(id) = Uuid::parse_str(&cached_id) {
                if let Some(tx) = self.transactions.find_by_id(id).await? {
                    info!(
                        idempotency_key = %idempotency_key,
                        transaction_id = %tx.id,
                        "Idempotency cache hit"
                    );
                    return Ok(Some(tx));
                }
            }
        }

        let existing = self
            .transactions
            .find_by_idempotency_key(idempotency_key)
            .await?;
        if let Some(tx) = &existing {
            info!(
                idempotency_key = %idempotency_key,
                transaction_id = %tx.id,
                "Idempotency resolved from store"
            );
            self.cache_set(idempotency_key, &tx.id.to_string()).await;
        }

        Ok(existing)
    }

    /// Atomically reserve an idempotency key for a transaction
    ///
    /// Returns true iff this caller won the race. A cache failure also
    /// returns true: the insert's unique constraint settles it.
    pub async fn reserve(&self, idempotency_key: &str, transaction_id: Uuid) -> bool {
        let pool = match &self.cache {
            Some(pool) => pool,
            None => return true,
        };

        let cache_key = ReservationKey::new(idempotency_key).to_string();
        let mut conn = match pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "Idempotency reserve degraded: cache unavailable");
                return true;
            }
        };

        // SET NX EX: set-if-absent with TTL in one round-trip
        let result: Result<Option<String>, redis::RedisError> = redis::cmd("SET")
            .arg(&cache_key)
            .arg(transaction_id.to_string())
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_seconds)
            .query_async(&mut *conn)
            .await;

        match result {
            Ok(Some(_)) => {
                info!(
                    idempotency_key = %idempotency_key,
                    transaction_id = %transaction_id,
                    "Reserved idempotency key"
                );
                true
            }
            Ok(None) => {
                warn!(idempotency_key = %idempotency_key, "Idempotency key already reserved");
                false
            }
            Err(e) => {
                warn!(error = %e, "Idempotency reserve degraded: cache error");
                true
            }
        }
    }

    /// Drop a cache reservation
    ///
    /// Only called when admission aborts before the row insert; once a row
    /// exists the reservation expires with its TTL.
    pub async fn release(&self, idempotency_key: &str) {
        let pool = match &self.cache {
            Some(pool) => pool,
            None => return,
        };

        let cache_key = ReservationKey::new(idempotency_key).to_string();
        let mut conn = match pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "Idempotency release skipped: cache unavailable");
                return;
            }
        };

        let result: Result<(), redis::RedisError> = redis::cmd("DEL")
            .arg(&cache_key)
            .query_async(&mut *conn)
            .await;

        match result {
            Ok(()) => info!(idempotency_key = %idempotency_key, "Released idempotency key"),
            Err(e) => warn!(error = %e, "Idempotency release failed"),
        }
    }

    async fn cache_get(&self, idempotency_key: &str) -> Option<String> {
        let pool = self.cache.as_ref()?;
        let cache_key = ReservationKey::new(idempotency_key).to_string();

        let mut conn = match pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "Idempotency lookup degraded: cache unavailable");
                return None;
            }
        };

        let result: Result<Option<String>, redis::RedisError> = redis::cmd("GET")
            .arg(&cache_key)
            .query_async(&mut *conn)
            .await;

        match result {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Idempotency lookup degraded: cache error");
                None
            }
        }
    }

    async fn cache_set(&self, idempotency_key: &str, transaction_id: &str) {
        let pool = match &self.cache {
            Some(pool) => pool,
            None => return,
        };

        let cache_key = ReservationKey::new(idempotency_key).to_string();
        let mut conn = match pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "Idempotency cache repopulation skipped: cache unavailable");
                return;
            }
        };

        let result: Result<(), redis::RedisError> = redis::cmd("SET")
            .arg(&cache_key)
            .arg(transaction_id)
            .arg("EX")
            .arg(self.ttl_seconds)
            .query_async(&mut *conn)
            .await;

        if let Err(e) = result {
            warn!(error = %e, "Idempotency cache repopulation failed");
        }
    }
}
