use std::sync::Arc;

use payhub_breaker::BreakerRegistry;
use payhub_cache::Cache;
use payhub_idempotency::IdempotencyEngine;
use payhub_payments::PaymentService;
use payhub_providers::ProviderRegistry;
use payhub_refunds::RefundService;
use payhub_storage::Storage;
use payhub_webhooks::WebhookConfig;

/// Everything an axum handler needs, cloned cheaply per request (every
/// field is an `Arc`-backed or pool-backed handle, mirroring
/// `PaymentService`'s own cloning story).
#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    pub cache: Cache,
    pub payments: PaymentService,
    pub refunds: RefundService,
    pub idempotency: IdempotencyEngine,
    pub breakers: Arc<BreakerRegistry>,
    pub providers: ProviderRegistry,
    pub webhook_config: WebhookConfig,
}
