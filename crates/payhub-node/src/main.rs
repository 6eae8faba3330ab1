//! PayHub process entrypoint (spec.md section 6 / SPEC_FULL.md section 13):
//! loads configuration, wires every service crate into an [`AppState`],
//! installs tracing, and runs the HTTP server alongside the webhook
//! worker loop until a shutdown signal is observed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use payhub_breaker::{BreakerConfig, BreakerRegistry};
use payhub_cache::Cache;
use payhub_idempotency::IdempotencyEngine;
use payhub_payments::PaymentService;
use payhub_providers::paypal_like::PaypalLikeProvider;
use payhub_providers::stripe_like::StripeLikeProvider;
use payhub_providers::ProviderRegistry;
use payhub_queue::{AmqpQueue, DurableQueue};
use payhub_refunds::RefundService;
use payhub_storage::pool::{self, ConnectionMonitor, PoolConfig};
use payhub_storage::Storage;
use payhub_telemetry::AppConfig;
use payhub_webhooks::{WebhookConfig, WebhookSender};
use payhub_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    config.validate_for_production();
    payhub_telemetry::init_tracing(&config);

    tracing::info!(env = %config.env, port = config.port, "starting payhub-node");

    let (monitor, db_shutdown_rx) = ConnectionMonitor::new();
    let pool = pool::connect(&PoolConfig {
        database_url: config.database_url.clone(),
        max_connections: config.db_max_connections,
        ssl_mode: pool::parse_ssl_mode(&config.db_ssl_mode),
        acquire_timeout: Duration::from_secs(10),
    })
    .await?;
    let storage = Storage::new(pool, Arc::new(monitor));

    let cache = Cache::connect(&config.redis_url)?;

    let queue = Arc::new(AmqpQueue::connect(&config.amqp_url).await?);
    queue.declare_topology("webhooks").await?;
    let queue_handle: Arc<dyn DurableQueue> = queue.clone();

    let mut providers = ProviderRegistry::new();
    providers.register(Arc::new(StripeLikeProvider::new()));
    providers.register(Arc::new(PaypalLikeProvider::new()));

    let breaker_config = BreakerConfig {
        call_timeout: Duration::from_millis(config.breaker_call_timeout_ms),
        error_threshold_percent: config.breaker_error_threshold_percent,
        volume_threshold: config.breaker_volume_threshold,
        reset_timeout: Duration::from_millis(config.breaker_reset_timeout_ms),
    };
    let breakers = Arc::new(BreakerRegistry::new(breaker_config));

    let webhook_config = WebhookConfig {
        secret: config.webhook_secret.clone(),
        allow_http: config.allow_http_webhooks,
        queue_name: "webhooks".to_string(),
        request_timeout: Duration::from_secs(30),
    };
    let webhooks = WebhookSender::new(storage.clone(), queue_handle.clone(), webhook_config.clone());

    let idempotency = IdempotencyEngine::new(
        storage.clone(),
        cache.clone(),
        Duration::from_secs(config.idempotency_ttl_secs),
    );

    let payments = PaymentService::new(
        storage.clone(),
        providers.clone(),
        breakers.clone(),
        webhooks.clone(),
        queue_handle.clone(),
    );
    let refunds = RefundService::new(storage.clone(), providers.clone(), breakers.clone(), webhooks.clone());

    let state = payhub_api::AppState {
        storage: storage.clone(),
        cache: cache.clone(),
        payments,
        refunds,
        idempotency,
        breakers,
        providers,
        webhook_config,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    forward_shutdown_signals(shutdown_tx, db_shutdown_rx);

    let worker_config = WorkerConfig::default();
    let sweep_interval = worker_config.sweep_interval;
    let worker_sender = webhooks.clone();
    let worker_queue = queue;
    let consumer_shutdown = shutdown_rx.clone();
    let consumer_task = tokio::spawn(async move {
        if let Err(e) =
            payhub_worker::run_webhook_consumer(&worker_queue, worker_sender, &worker_config, consumer_shutdown).await
        {
            tracing::error!(error = %e, "webhook consumer exited with error");
        }
    });

    let sweep_task = tokio::spawn(payhub_worker::run_sweep_ticker(
        webhooks,
        sweep_interval,
        shutdown_rx.clone(),
    ));

    let app = payhub_api::router(state);
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    let mut server_shutdown = shutdown_rx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.changed().await;
        })
        .await?;

    consumer_task.await.ok();
    sweep_task.await.ok();
    Ok(())
}

/// Drives the process-wide shutdown channel from Ctrl-C and from the
/// storage pool's consecutive-error escalation (spec.md 4.3): either
/// source flips `shutdown_tx` to `true`, which the HTTP server, the
/// webhook consumer, and the sweep ticker all select on.
fn forward_shutdown_signals(shutdown_tx: watch::Sender<bool>, mut db_shutdown_rx: watch::Receiver<bool>) {
    let tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received ctrl-c, shutting down gracefully");
            let _ = tx.send(true);
        }
    });
    tokio::spawn(async move {
        if db_shutdown_rx.changed().await.is_ok() && *db_shutdown_rx.borrow() {
            tracing::error!("database connection escalation triggered shutdown");
            let _ = shutdown_tx.send(true);
        }
    });
}
