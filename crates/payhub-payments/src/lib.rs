//! # PayHub Payments
//!
//! The payment service (spec.md section 4.7): validation ahead of the
//! saga, the three-step charge saga itself (persist, invoke provider,
//! enqueue webhook), status-transition enforcement, and reconciliation of
//! provider-originated webhooks against a payment under row lock.

mod saga;

use std::collections::HashMap;

use serde_json::Value as JsonValue;
use uuid::Uuid;

use payhub_breaker::BreakerRegistry;
use payhub_providers::ProviderRegistry;
use payhub_queue::DurableQueue;
use payhub_storage::Storage;
use payhub_types::{Money, Payment, PaymentStatus, PayhubError};
use payhub_webhooks::WebhookSender;

pub use saga::ChargeOutcome;

/// A validated request to open a new charge (spec.md section 6's POST
/// `/payments` body).
#[derive(Debug, Clone)]
pub struct NewCharge {
    pub merchant_id: String,
    pub amount: Money,
    pub provider: String,
    pub description: Option<String>,
    pub external_id: Option<String>,
    pub metadata: HashMap<String, JsonValue>,
    pub webhook_url: Option<String>,
}

#[derive(Clone)]
pub struct PaymentService {
    storage: Storage,
    providers: ProviderRegistry,
    breakers: std::sync::Arc<BreakerRegistry>,
    webhooks: WebhookSender,
    _queue: std::sync::Arc<dyn DurableQueue>,
}

impl PaymentService {
    pub fn new(
        storage: Storage,
        providers: ProviderRegistry,
        breakers: std::sync::Arc<BreakerRegistry>,
        webhooks: WebhookSender,
        queue: std::sync::Arc<dyn DurableQueue>,
    ) -> Self {
        Self { storage, providers, breakers, webhooks, _queue: queue }
    }

    /// Validation ahead of the saga (spec.md 4.7): provider registered,
    /// amount positive, currency on the active allow-list. The "at most
    /// four fractional digits" rule is enforced where the raw decimal
    /// string is first parsed (the API layer, ahead of `Money::parse`,
    /// which already rounds) — by the time a request reaches here the
    /// amount is already a valid, rounded `Money`.
    fn validate(&self, req: &NewCharge) -> Result<(), PayhubError> {
        if !self.providers.is_registered(&req.provider) {
            return Err(PayhubError::Validation(format!(
                "unknown provider {:?}",
                req.provider
            )));
        }
        req.amount.require_positive()?;
        let currency = req.amount.currency();
        if !payhub_types::ACTIVE_CURRENCIES.contains(&currency) {
            return Err(PayhubError::Validation(format!("currency {currency:?} is not active")));
        }
        Ok(())
    }

    /// Runs the charge saga to completion (spec.md 4.7). Provider
    /// declines and pending outcomes are normal terminal results, not
    /// errors; only an infrastructure failure (e.g. the database is
    /// unreachable) returns `Err` here, which also runs the persist
    /// step's compensation.
    pub async fn charge(&self, req: NewCharge) -> Result<ChargeOutcome, PayhubError> {
        self.validate(&req)?;
        saga::run_charge_saga(self.clone(), req).await
    }

    pub async fn get_payment(&self, merchant_id: &str, id: Uuid) -> Result<Payment, PayhubError> {
        self.storage.get_payment(id, merchant_id).await.map_err(PayhubError::from)
    }

    pub async fn list_payments(
        &self,
        merchant_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Payment>, payhub_storage::Pagination), PayhubError> {
        self.storage
            .list_payments(merchant_id, limit, offset)
            .await
            .map_err(PayhubError::from)
    }

    pub async fn list_transactions(
        &self,
        payment_id: Uuid,
    ) -> Result<Vec<payhub_types::Transaction>, PayhubError> {
        self.storage.list_transactions(payment_id).await.map_err(PayhubError::from)
    }

    /// Reconciles a provider-originated webhook against the matching
    /// payment (spec.md 4.7 "Reconciliation"). Looked up by
    /// `(provider, provider_transaction_id)` under row lock; an invalid
    /// transition is ignored but logged, never surfaced as an error to
    /// the caller (the webhook handler still returns `received: true`).
    pub async fn reconcile(
        &self,
        provider: &str,
        provider_transaction_id: &str,
        new_status: PaymentStatus,
        raw_response: JsonValue,
    ) -> Result<(), PayhubError> {
        saga::reconcile(self, provider, provider_transaction_id, new_status, raw_response).await
    }

    pub(crate) fn storage(&self) -> &Storage {
        &self.storage
    }

    pub(crate) fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub(crate) fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    pub(crate) fn webhooks(&self) -> &WebhookSender {
        &self.webhooks
    }
}
