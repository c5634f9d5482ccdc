//! Webhook dispatcher flows against a live Postgres and a local endpoint.
//!
//! Run with a schema-loaded database:
//!   DATABASE_URL=postgres://... cargo test -- --ignored

use axum::{extract::State, http::StatusCode, routing::post, Router};
use bigdecimal::BigDecimal;
use payrail::database::audit_log_repository::AuditLogRepository;
use payrail::database::transaction_repository::{NewTransaction, TransactionRepository};
use payrail::database::webhook_event_repository::{NewWebhookEvent, WebhookEventRepository};
use payrail::payments::types::TransactionStatus;
use payrail::services::webhook_dispatcher::{WebhookDispatcher, WebhookDispatcherConfig};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Clone)]
struct EndpointState {
    hits: Arc<AtomicUsize>,
    failures_before_success: usize,
}

async fn hook(State(state): State<EndpointState>) -> (StatusCode, &'static str) {
    let hit = state.hits.fetch_add(1, Ordering::SeqCst);
    if hit < state.failures_before_success {
        (StatusCode::INTERNAL_SERVER_ERROR, "try again")
    } else {
        (StatusCode::OK, "received")
    }
}

/// Local merchant endpoint that fails N times before accepting
async fn merchant_endpoint(failures_before_success: usize) -> (SocketAddr, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new().route("/hook", post(hook)).with_state(EndpointState {
        hits: hits.clone(),
        failures_before_success,
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (addr, hits)
}

struct Harness {
    transactions: Arc<TransactionRepository>,
    audit_logs: Arc<AuditLogRepository>,
    webhook_events: Arc<WebhookEventRepository>,
    dispatcher: WebhookDispatcher,
}

async fn harness() -> Harness {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = payrail::database::init_pool(&database_url, None)
        .await
        .expect("database pool");

    let transactions = Arc::new(TransactionRepository::new(pool.clone()));
    let audit_logs = Arc::new(AuditLogRepository::new(pool.clone()));
    let webhook_events = Arc::new(WebhookEventRepository::new(pool.clone()));

    let dispatcher = WebhookDispatcher::new(
        webhook_events.clone(),
        transactions.clone(),
        audit_logs.clone(),
        WebhookDispatcherConfig {
            // Tiny delays so retries become due within the test
            base_delay_ms: 10,
            batch_limit: 10,
            timeout: Duration::from_secs(2),
        },
    )
    .expect("dispatcher");

    Harness {
        transactions,
        audit_logs,
        webhook_events,
        dispatcher,
    }
}

async fn terminal_transaction(h: &Harness, webhook_url: &str) -> Uuid {
    let id = Uuid::new_v4();
    let tx = NewTransaction {
        id,
        reference_id: format!("TXN1700000000000{}", &id.simple().to_string()[..8]),
        user_id: Uuid::new_v4(),
        merchant_id: Uuid::new_v4(),
        amount: BigDecimal::from_str("49.99").expect("amount"),
        currency: "USD".to_string(),
        payment_method: "CARD".to_string(),
        payment_provider: None,
        status: TransactionStatus::Success,
        description: None,
        metadata: serde_json::json!({}),
        idempotency_key: Some(Uuid::new_v4().to_string()),
        fraud_score: None,
        error_code: None,
        error_message: None,
        webhook_url: Some(webhook_url.to_string()),
    };
    h.transactions.insert(&tx).await.expect("insert transaction");
    id
}

async fn enqueue(h: &Harness, transaction_id: Uuid, url: &str) -> Uuid {
    let event = NewWebhookEvent {
        transaction_id,
        webhook_url: url.to_string(),
        payload: serde_json::json!({
            "transaction_id": transaction_id.to_string(),
            "reference_id": "TXN-test",
            "status": "SUCCESS",
            "amount": "49.99",
            "currency": "USD",
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }),
        max_attempts: 3,
        next_retry_at: chrono::Utc::now(),
    };
    h.webhook_events.insert(&event).await.expect("insert webhook").id
}

/// Drive ticks until nothing is due or the deadline passes
async fn drain(h: &Harness, rounds: usize) {
    for _ in 0..rounds {
        let _ = h.dispatcher.run_once().await.expect("tick");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
#[ignore] // Requires database running
async fn delivery_stops_at_first_2xx_after_retries() {
    let h = harness().await;
    let (addr, hits) = merchant_endpoint(2).await;
    let url = format!("http://{}/hook", addr);

    let tx_id = terminal_transaction(&h, &url).await;
    let webhook_id = enqueue(&h, tx_id, &url).await;

    // 500, 500, then 200
    drain(&h, 6).await;

    let webhook = h
        .webhook_events
        .find_by_id(webhook_id)
        .await
        .expect("lookup")
        .expect("webhook exists");
    assert_eq!(hits.load(Ordering::SeqCst), 3, "endpoint hit exactly three times");
    assert_eq!(webhook.attempts, webhook.max_attempts, "terminal after success");
    assert_eq!(webhook.response_status, Some(200));
    assert!(webhook.next_retry_at.is_none());

    // No further deliveries
    let due = h
        .webhook_events
        .find_pending(chrono::Utc::now() + chrono::Duration::hours(1), 10)
        .await
        .expect("pending");
    assert!(due.iter().all(|w| w.id != webhook_id));

    let tx = h
        .transactions
        .find_by_id(tx_id)
        .await
        .expect("lookup")
        .expect("transaction");
    assert_eq!(tx.webhook_attempts, 3);
    assert!(tx.webhook_last_attempt.is_some());

    let sent = h
        .audit_logs
        .find_by_transaction(tx_id)
        .await
        .expect("audit")
        .into_iter()
        .any(|entry| entry.event_type == "WEBHOOK_SENT");
    assert!(sent, "WEBHOOK_SENT audited");
}

#[tokio::test]
#[ignore] // Requires database running
async fn delivery_exhausts_budget_and_goes_terminal() {
    let h = harness().await;
    // Never succeeds
    let (addr, hits) = merchant_endpoint(usize::MAX).await;
    let url = format!("http://{}/hook", addr);

    let tx_id = terminal_transaction(&h, &url).await;
    let webhook_id = enqueue(&h, tx_id, &url).await;

    drain(&h, 8).await;

    let webhook = h
        .webhook_events
        .find_by_id(webhook_id)
        .await
        .expect("lookup")
        .expect("webhook exists");
    assert_eq!(webhook.attempts, 3, "attempts never exceed max_attempts");
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert_eq!(webhook.response_status, Some(500));

    let failed = h
        .audit_logs
        .find_by_transaction(tx_id)
        .await
        .expect("audit")
        .into_iter()
        .any(|entry| entry.event_type == "WEBHOOK_FAILED");
    assert!(failed, "WEBHOOK_FAILED audited");
}
