//! Event bus adapter
//!
//! Thin abstraction over a partitioned, at-least-once message bus keyed by
//! transaction id. The in-process implementation hashes the message key onto
//! a fixed set of partitions, each backed by its own channel and drained by
//! exactly one consumer task, which preserves per-key ordering the same way
//! a keyed topic partition does. Consumers must still tolerate redelivery;
//! the orchestrator's pre-condition check plus CAS make processing
//! effectively once.

use crate::payments::types::PaymentEvent;
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Topic carrying every transition; key = transaction id string
pub const PAYMENT_EVENTS_TOPIC: &str = "payment-events";
/// Mirror of terminal events for downstream analytics; publish-only here
pub const PAYMENT_RESULTS_TOPIC: &str = "payment-results";

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Topic {topic} already has a consumer group")]
    AlreadySubscribed { topic: String },

    #[error("Bus channel closed for topic {topic} partition {partition}")]
    ChannelClosed { topic: String, partition: usize },

    #[error("Event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<BusError> for crate::error::AppError {
    fn from(err: BusError) -> Self {
        use crate::error::{AppError, AppErrorKind, InfrastructureError};

        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::EventBus {
            message: err.to_string(),
        }))
    }
}

/// Lock that survives a panicked holder; the maps stay structurally valid
fn lock_recovering<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Message as delivered to a partition consumer
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub key: String,
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn decode(&self) -> Result<PaymentEvent, BusError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Publisher seam between the orchestrator and the broker
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, event: &PaymentEvent) -> Result<(), BusError>;
}

struct TopicChannels {
    senders: Vec<mpsc::UnboundedSender<BusMessage>>,
    subscribed: bool,
}

/// In-process partitioned bus
pub struct PartitionedBus {
    partitions: usize,
    topics: Mutex<HashMap<String, TopicChannels>>,
    receivers: Mutex<HashMap<String, Vec<mpsc::UnboundedReceiver<BusMessage>>>>,
}

impl PartitionedBus {
    pub fn new(partitions: usize) -> Self {
        Self {
            partitions: partitions.max(1),
            topics: Mutex::new(HashMap::new()),
            receivers: Mutex::new(HashMap::new()),
        }
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }

    /// Partition index for a message key
    pub fn partition_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.partitions
    }

    fn ensure_topic(&self, topic: &str) {
        let mut topics = lock_recovering(&self.topics);
        if topics.contains_key(topic) {
            return;
        }

        let mut senders = Vec::with_capacity(self.partitions);
        let mut partition_receivers = Vec::with_capacity(self.partitions);
        for _ in 0..self.partitions {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            partition_receivers.push(rx);
        }

        topics.insert(
            topic.to_string(),
            TopicChannels {
                senders,
                subscribed: false,
            },
        );
        lock_recovering(&self.receivers).insert(topic.to_string(), partition_receivers);
    }

    /// Claim the topic's partition receivers, one per partition
    ///
    /// Only one consumer group may claim a topic: a single group advancing
    /// the state machine is what makes redelivery safe.
    pub fn subscribe(
        &self,
        topic: &str,
    ) -> Result<Vec<mpsc::UnboundedReceiver<BusMessage>>, BusError> {
        self.ensure_topic(topic);

        let mut topics = lock_recovering(&self.topics);
        let channels = topics
            .get_mut(topic)
            .ok_or_else(|| BusError::AlreadySubscribed {
                topic: topic.to_string(),
            })?;
        if channels.subscribed {
            return Err(BusError::AlreadySubscribed {
                topic: topic.to_string(),
            });
        }
        channels.subscribed = true;

        lock_recovering(&self.receivers)
            .remove(topic)
            .ok_or_else(|| BusError::AlreadySubscribed {
                topic: topic.to_string(),
            })
    }
}

#[async_trait]
impl EventBus for PartitionedBus {
    async fn publish(&self, topic: &str, key: &str, event: &PaymentEvent) -> Result<(), BusError> {
        self.ensure_topic(topic);

        let payload = serde_json::to_vec(event)?;
        let partition = self.partition_for(key);
        let message = BusMessage {
            key: key.to_string(),
            payload,
        };

        let topics = lock_recovering(&self.topics);
        let channels = match topics.get(topic) {
            Some(channels) => channels,
            None => return Ok(()),
        };

        if !channels.subscribed {
            // No consumer group yet (e.g. the analytics mirror); messages
            // stay buffered in the partition channel until one subscribes.
            debug!(topic = %topic, partition = partition, "Publishing to unclaimed topic");
        }

        channels.senders[partition]
            .send(message)
            .map_err(|_| BusError::ChannelClosed {
                topic: topic.to_string(),
                partition,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::transaction_repository::Transaction;
    use crate::payments::types::{PaymentEventType, TransactionStatus};
    use bigdecimal::BigDecimal;
    use uuid::Uuid;

    fn sample_transaction() -> Transaction {
        let now = chrono::Utc::now();
        Transaction {
            id: Uuid::new_v4(),
            reference_id: "TXN1700000000000abcd1234".to_string(),
            user_id: Uuid::new_v4(),
            merchant_id: Uuid::new_v4(),
            amount: BigDecimal::from(100),
            currency: "USD".to_string(),
            payment_method: "CARD".to_string(),
            payment_provider: None,
            status: TransactionStatus::Pending.as_str().to_string(),
            description: None,
            metadata: serde_json::json!({}),
            idempotency_key: Some("K1".to_string()),
            fraud_score: None,
            error_code: None,
            error_message: None,
            webhook_url: None,
            webhook_attempts: 0,
            webhook_last_attempt: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn same_key_maps_to_same_partition() {
        let bus = PartitionedBus::new(4);
        let key = Uuid::new_v4().to_string();
        let first = bus.partition_for(&key);
        for _ in 0..10 {
            assert_eq!(bus.partition_for(&key), first);
        }
    }

    #[tokio::test]
    async fn publish_preserves_per_key_order() {
        let bus = PartitionedBus::new(4);
        let mut receivers = bus.subscribe(PAYMENT_EVENTS_TOPIC).expect("subscribe");

        let tx = sample_transaction();
        let key = tx.id.to_string();
        let initiated = PaymentEvent::from_transaction(&tx, PaymentEventType::PaymentInitiated);
        let success = PaymentEvent::from_transaction(&tx, PaymentEventType::PaymentSuccess);

        bus.publish(PAYMENT_EVENTS_TOPIC, &key, &initiated)
            .await
            .expect("publish initiated");
        bus.publish(PAYMENT_EVENTS_TOPIC, &key, &success)
            .await
            .expect("publish success");

        let partition = bus.partition_for(&key);
        let rx = &mut receivers[partition];

        let first = rx.recv().await.expect("first message").decode().expect("decode");
        let second = rx.recv().await.expect("second message").decode().expect("decode");
        assert_eq!(first.event_type, PaymentEventType::PaymentInitiated);
        assert_eq!(second.event_type, PaymentEventType::PaymentSuccess);
    }

    #[tokio::test]
    async fn second_consumer_group_is_rejected() {
        let bus = PartitionedBus::new(2);
        let _receivers = bus.subscribe(PAYMENT_EVENTS_TOPIC).expect("first subscribe");
        assert!(bus.subscribe(PAYMENT_EVENTS_TOPIC).is_err());
    }

    #[tokio::test]
    async fn publish_without_consumer_buffers_messages() {
        let bus = PartitionedBus::new(2);
        let tx = sample_transaction();
        let event = PaymentEvent::from_transaction(&tx, PaymentEventType::PaymentSuccess);

        // The results mirror has no consumer in this service
        bus.publish(PAYMENT_RESULTS_TOPIC, &tx.id.to_string(), &event)
            .await
            .expect("publish should not fail without a consumer");
    }
}
