use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, routing::get, Json, Router};
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info, warn};

use payrail::api::payments::{routes as payment_routes, PaymentApiState};
use payrail::bus::{EventBus, PartitionedBus, PAYMENT_EVENTS_TOPIC};
use payrail::cache::{init_cache_pool, CachePoolConfig};
use payrail::config::AppConfig;
use payrail::database::audit_log_repository::AuditLogRepository;
use payrail::database::init_pool_from_config;
use payrail::database::transaction_repository::TransactionRepository;
use payrail::database::webhook_event_repository::WebhookEventRepository;
use payrail::health::{HealthChecker, HealthStatus};
use payrail::logging::init_tracing;
use payrail::middleware::logging::{request_logging_middleware, UuidRequestId};
use payrail::payments::providers::http::{HttpProvider, HttpProviderConfig};
use payrail::services::fraud::FraudScorer;
use payrail::services::idempotency::IdempotencyService;
use payrail::services::payment_service::{PaymentService, PaymentServiceConfig};
use payrail::services::webhook_dispatcher::{WebhookDispatcher, WebhookDispatcherConfig};
use payrail::workers::payment_consumer::PaymentEventConsumer;
use payrail::workers::webhook_retry::WebhookRetryWorker;

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    config.validate()?;
    init_tracing(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        "Starting payment orchestration service"
    );

    // Database pool (required)
    let db_pool = init_pool_from_config(&config.database).await.map_err(|e| {
        error!("Failed to initialize database pool: {}", e);
        anyhow::anyhow!(e.to_string())
    })?;

    // Cache pool (best-effort; the store remains authoritative without it)
    let cache_pool = match init_cache_pool(CachePoolConfig {
        redis_url: config.cache.redis_url.clone(),
        max_connections: config.cache.max_connections,
        ..Default::default()
    })
    .await
    {
        Ok(pool) => Some(pool),
        Err(e) => {
            warn!(error = %e, "Cache unavailable; idempotency runs store-only");
            None
        }
    };

    // Repositories
    let transactions = Arc::new(TransactionRepository::new(db_pool.clone()));
    let audit_logs = Arc::new(AuditLogRepository::new(db_pool.clone()));
    let webhook_events = Arc::new(WebhookEventRepository::new(db_pool.clone()));

    // Event bus and the processing consumer group
    let bus = Arc::new(PartitionedBus::new(config.bus.partitions));
    let event_receivers = bus
        .subscribe(PAYMENT_EVENTS_TOPIC)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    info!(
        partitions = bus.partitions(),
        topic = PAYMENT_EVENTS_TOPIC,
        "Event bus initialized"
    );

    // Provider adapter
    let provider = Arc::new(
        HttpProvider::new(HttpProviderConfig::from(&config.provider))
            .map_err(|e| anyhow::anyhow!(e.to_string()))?,
    );

    // Core services
    let idempotency = Arc::new(IdempotencyService::new(
        cache_pool.clone(),
        transactions.clone(),
        config.idempotency.ttl_seconds,
    ));
    let fraud = Arc::new(FraudScorer::from_config(&config.fraud)?);
    let payment_service = Arc::new(PaymentService::new(
        transactions.clone(),
        audit_logs.clone(),
        webhook_events.clone(),
        idempotency,
        fraud,
        provider,
        bus.clone() as Arc<dyn EventBus>,
        PaymentServiceConfig {
            provider_timeout: Duration::from_secs(config.provider.timeout_secs),
            webhook_max_attempts: config.webhook.retry_attempts,
        },
    ));

    // Workers
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let consumer = PaymentEventConsumer::new(payment_service.clone());
    let consumer_handles = consumer.start(event_receivers, shutdown_rx.clone());
    info!(workers = consumer_handles.len(), "Payment consumers started");

    let dispatcher = Arc::new(
        WebhookDispatcher::new(
            webhook_events.clone(),
            transactions.clone(),
            audit_logs.clone(),
            WebhookDispatcherConfig {
                base_delay_ms: config.webhook.retry_base_delay_ms,
                batch_limit: config.webhook.batch_limit,
                timeout: Duration::from_secs(config.webhook.timeout_secs),
            },
        )
        .map_err(|e| anyhow::anyhow!(e.to_string()))?,
    );
    let retry_worker = WebhookRetryWorker::new(dispatcher, config.webhook.poll_interval_secs);
    let retry_shutdown = shutdown_rx.clone();
    let retry_handle = tokio::spawn(async move {
        retry_worker.run(retry_shutdown).await;
    });

    // HTTP surface
    let health_checker = HealthChecker::new(db_pool.clone(), cache_pool.clone());
    let app = Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/health/live", get(liveness))
        .with_state(AppState { health_checker })
        .merge(payment_routes(PaymentApiState {
            service: payment_service,
        }))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(shutdown_tx.clone()))
        .await?;

    // Drain the workers
    let _ = shutdown_tx.send(true);
    for handle in consumer_handles {
        if let Err(e) = tokio::time::timeout(Duration::from_secs(5), handle).await {
            error!(error = %e, "Timed out waiting for payment consumer shutdown");
        }
    }
    if let Err(e) = tokio::time::timeout(Duration::from_secs(5), retry_handle).await {
        error!(error = %e, "Timed out waiting for webhook retry worker shutdown");
    }

    info!("Server shutdown complete");

    Ok(())
}

// Application state for the health endpoints
#[derive(Clone)]
struct AppState {
    health_checker: HealthChecker,
}

async fn health(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, (axum::http::StatusCode, String)> {
    let health_status = state.health_checker.check_health().await;

    if health_status.is_healthy() {
        Ok(Json(health_status))
    } else {
        Err((
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "Service Unavailable".to_string(),
        ))
    }
}

/// Readiness probe - checks if the service is ready to accept traffic
async fn readiness(
    state: State<AppState>,
) -> Result<Json<HealthStatus>, (axum::http::StatusCode, String)> {
    health(state).await
}

/// Liveness probe - checks if the service is alive (basic check)
async fn liveness() -> &'static str {
    "OK"
}
