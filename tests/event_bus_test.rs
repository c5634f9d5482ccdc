use bigdecimal::BigDecimal;
use payrail::bus::{EventBus, PartitionedBus, PAYMENT_EVENTS_TOPIC, PAYMENT_RESULTS_TOPIC};
use payrail::database::transaction_repository::Transaction;
use payrail::payments::types::{PaymentEvent, PaymentEventType, TransactionStatus};
use uuid::Uuid;

fn transaction(id: Uuid) -> Transaction {
    let now = chrono::Utc::now();
    Transaction {
        id,
        reference_id: format!("TXN1700000000000{}", &id.simple().to_string()[..8]),
        user_id: Uuid::new_v4(),
        merchant_id: Uuid::new_v4(),
        amount: BigDecimal::from(100),
        currency: "USD".to_string(),
        payment_method: "CARD".to_string(),
        payment_provider: None,
        status: TransactionStatus::Pending.as_str().to_string(),
        description: None,
        metadata: serde_json::json!({}),
        idempotency_key: None,
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

#[tokio::test]
async fn per_transaction_ordering_survives_interleaving() {
    let bus = PartitionedBus::new(4);
    let mut receivers = bus.subscribe(PAYMENT_EVENTS_TOPIC).unwrap();

    // Interleave events from many transactions
    let transactions: Vec<Transaction> = (0..16).map(|_| transaction(Uuid::new_v4())).collect();
    for event_type in [
        PaymentEventType::PaymentInitiated,
        PaymentEventType::PaymentProcessed,
        PaymentEventType::PaymentSuccess,
    ] {
        for tx in &transactions {
            let event = PaymentEvent::from_transaction(tx, event_type);
            bus.publish(PAYMENT_EVENTS_TOPIC, &tx.id.to_string(), &event)
                .await
                .unwrap();
        }
    }

    // Drain every partition; per transaction id, events must arrive in the
    // order they were published.
    let mut seen: std::collections::HashMap<Uuid, Vec<PaymentEventType>> =
        std::collections::HashMap::new();
    for rx in receivers.iter_mut() {
        while let Ok(message) = rx.try_recv() {
            let event = message.decode().unwrap();
            seen.entry(event.transaction_id)
                .or_default()
                .push(event.event_type);
        }
    }

    assert_eq!(seen.len(), transactions.len());
    for order in seen.values() {
        assert_eq!(
            order,
            &vec![
                PaymentEventType::PaymentInitiated,
                PaymentEventType::PaymentProcessed,
                PaymentEventType::PaymentSuccess,
            ]
        );
    }
}

#[tokio::test]
async fn duplicate_publishes_are_both_delivered() {
    // At-least-once: the bus never deduplicates; consumers do
    let bus = PartitionedBus::new(2);
    let mut receivers = bus.subscribe(PAYMENT_EVENTS_TOPIC).unwrap();

    let tx = transaction(Uuid::new_v4());
    let event = PaymentEvent::from_transaction(&tx, PaymentEventType::PaymentInitiated);
    let key = tx.id.to_string();

    bus.publish(PAYMENT_EVENTS_TOPIC, &key, &event).await.unwrap();
    bus.publish(PAYMENT_EVENTS_TOPIC, &key, &event).await.unwrap();

    let partition = bus.partition_for(&key);
    let first = receivers[partition].try_recv().unwrap().decode().unwrap();
    let second = receivers[partition].try_recv().unwrap().decode().unwrap();
    assert_eq!(first.transaction_id, tx.id);
    assert_eq!(second.transaction_id, tx.id);
}

#[tokio::test]
async fn results_topic_accepts_publishes_without_a_consumer() {
    let bus = PartitionedBus::new(2);
    let tx = transaction(Uuid::new_v4());
    let event = PaymentEvent::from_transaction(&tx, PaymentEventType::PaymentSuccess);

    for _ in 0..10 {
        bus.publish(PAYMENT_RESULTS_TOPIC, &tx.id.to_string(), &event)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn events_round_trip_through_json() {
    let bus = PartitionedBus::new(1);
    let mut receivers = bus.subscribe(PAYMENT_EVENTS_TOPIC).unwrap();

    let mut tx = transaction(Uuid::new_v4());
    tx.fraud_score = Some("0.25".parse().unwrap());
    tx.idempotency_key = Some("K1".to_string());
    let event = PaymentEvent::from_transaction(&tx, PaymentEventType::PaymentInitiated);

    bus.publish(PAYMENT_EVENTS_TOPIC, &tx.id.to_string(), &event)
        .await
        .unwrap();

    let decoded = receivers[0].try_recv().unwrap().decode().unwrap();
    assert_eq!(decoded.transaction_id, tx.id);
    assert_eq!(decoded.reference_id, tx.reference_id);
    assert_eq!(decoded.amount, tx.amount);
    assert_eq!(decoded.idempotency_key.as_deref(), Some("K1"));
    assert_eq!(decoded.event_type, PaymentEventType::PaymentInitiated);
}
