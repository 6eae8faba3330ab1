//! # PayHub Refunds
//!
//! The refund service (spec.md section 4.8): row-locked creation under
//! the amount-conservation check against prior refunds, a provider refund
//! call through the named breaker, and payment status propagation
//! (`completed`/`partially_refunded` -> `refunded`/`partially_refunded`).

use std::sync::Arc;

use uuid::Uuid;

use payhub_audit::{action, entity, AuditEntry};
use payhub_breaker::{BreakerError, BreakerRegistry, Outcome};
use payhub_providers::{ProviderRegistry, RefundRequest};
use payhub_storage::advisory_lock::in_transaction;
use payhub_storage::Storage;
use payhub_types::{Money, Payment, PaymentStatus, PayhubError, Refund, RefundStatus};
use payhub_webhooks::WebhookSender;

/// The query backing `GET /payments/:id/refundable` (spec.md 4.8).
#[derive(Debug, Clone, Copy)]
pub struct Refundable {
    pub payment_amount: Money,
    pub total_refunded: Money,
    pub pending_refunds: Money,
    pub available_for_refund: Money,
}

/// The result of [`RefundService::create_refund`]: the latest refund and
/// payment rows (spec.md 4.8 step 6). A provider decline is not an `Err`
/// here — the refund row is simply `failed` and the payment is left
/// untouched; only an infrastructure error (row lock, storage) is `Err`.
#[derive(Debug, Clone)]
pub struct RefundOutcome {
    pub refund: Refund,
    pub payment: Payment,
}

/// What the row-locked creation transaction decided, kept out of the
/// transaction's error channel so a business rejection doesn't look like a
/// storage failure to the caller (mirrors `payhub_idempotency`'s
/// fingerprint-conflict handling: the decision is data, raised as an error
/// only once the transaction has already committed or rolled back).
enum CreateDecision {
    Created(Refund),
    NotRefundable(PaymentStatus),
    ExceedsAvailable { requested: Money, available: Money },
}

#[derive(Clone)]
pub struct RefundService {
    storage: Storage,
    providers: ProviderRegistry,
    breakers: Arc<BreakerRegistry>,
    webhooks: WebhookSender,
}

impl RefundService {
    pub fn new(
        storage: Storage,
        providers: ProviderRegistry,
        breakers: Arc<BreakerRegistry>,
        webhooks: WebhookSender,
    ) -> Self {
        Self { storage, providers, breakers, webhooks }
    }

    /// `refundable(paymentId)` (spec.md 4.8's query). Reads completed and
    /// pending refund totals inside a (read-only) transaction so the two
    /// sums are taken from the same snapshot.
    pub async fn refundable(&self, merchant_id: &str, payment_id: Uuid) -> Result<Refundable, PayhubError> {
        let payment = self.storage.get_payment(payment_id, merchant_id).await?;
        let currency = payment.amount.currency().to_string();

        let (completed, pending) = in_transaction(self.storage.pool(), move |mut tx| {
            let currency = currency.clone();
            async move {
                let completed =
                    Storage::sum_refunds(&mut tx, payment_id, RefundStatus::Completed, &currency).await?;
                let pending =
                    Storage::sum_refunds(&mut tx, payment_id, RefundStatus::Pending, &currency).await?;
                Ok(((completed, pending), tx))
            }
        })
        .await?;

        let spent = completed.add(&pending)?;
        let available = if payment.amount.partial_cmp(&spent) == Some(std::cmp::Ordering::Less) {
            Money::zero(payment.amount.currency())?
        } else {
            payment.amount.subtract(&spent)?
        };
        Ok(Refundable {
            payment_amount: payment.amount,
            total_refunded: completed,
            pending_refunds: pending,
            available_for_refund: available,
        })
    }

    /// `createRefund` (spec.md 4.8): loads the payment `FOR UPDATE`,
    /// enforces amount conservation against completed + pending refunds,
    /// inserts a `pending` row, then calls the provider's refund operation
    /// through its breaker and propagates the outcome to both the refund
    /// row and (on success) the payment's status.
    pub async fn create_refund(
        &self,
        merchant_id: &str,
        payment_id: Uuid,
        amount: Money,
        reason: Option<String>,
    ) -> Result<RefundOutcome, PayhubError> {
        amount.require_positive()?;
        // Ownership check (spec.md 7's "not found, or owned by another
        // merchant" rule); the row lock below re-reads by id alone.
        self.storage.get_payment(payment_id, merchant_id).await?;

        let decision = in_transaction(self.storage.pool(), move |mut tx| {
            let amount = amount;
            let reason = reason.clone();
            async move {
                let payment = Storage::get_payment_for_update(&mut tx, payment_id).await?;
                if !matches!(payment.status, PaymentStatus::Completed | PaymentStatus::PartiallyRefunded) {
                    return Ok((CreateDecision::NotRefundable(payment.status), tx));
                }

                let currency = payment.amount.currency();
                let completed =
                    Storage::sum_refunds(&mut tx, payment_id, RefundStatus::Completed, currency).await?;
                let pending =
                    Storage::sum_refunds(&mut tx, payment_id, RefundStatus::Pending, currency).await?;
                let spent = completed
                    .add(&pending)
                    .map_err(|e| payhub_storage::StorageError::NotFound(e.to_string()))?;
                let available = payment
                    .amount
                    .subtract(&spent)
                    .map_err(|e| payhub_storage::StorageError::NotFound(e.to_string()))?;
                if amount.partial_cmp(&available) == Some(std::cmp::Ordering::Greater) {
                    return Ok((
                        CreateDecision::ExceedsAvailable { requested: amount, available },
                        tx,
                    ));
                }

                let refund = Storage::insert_refund(&mut tx, payment_id, &amount, reason.as_deref()).await?;
                payhub_audit::record_tx(
                    &mut tx,
                    &AuditEntry::new(entity::REFUND, refund.id.to_string(), action::REFUND_CREATED)
                        .with_new_value(serde_json::json!({
                            "payment_id": payment_id,
                            "amount": amount.to_persisted_string(),
                        })),
                )
                .await?;
                Ok((CreateDecision::Created(refund), tx))
            }
        })
        .await?;

        let refund = match decision {
            CreateDecision::Created(refund) => refund,
            CreateDecision::NotRefundable(status) => {
                return Err(PayhubError::Validation(format!(
                    "payment {payment_id} is not refundable in status {status:?}"
                )));
            }
            CreateDecision::ExceedsAvailable { requested, available } => {
                return Err(PayhubError::Validation(format!(
                    "refund amount {} exceeds available {}",
                    requested.to_persisted_string(),
                    available.to_persisted_string()
                )));
            }
        };

        self.settle(payment_id, refund).await
    }

    /// Calls the provider's refund operation through its breaker and
    /// propagates the terminal outcome (spec.md 4.8 steps 4-5). A breaker
    /// rejection or timeout is treated as a failed delivery attempt, same
    /// as a provider-thrown error: the refund row becomes `failed` and the
    /// payment is left as-is, ready for a fresh refund attempt.
    async fn settle(&self, payment_id: Uuid, refund: Refund) -> Result<RefundOutcome, PayhubError> {
        let currency = refund.amount.currency().to_string();
        let payment = in_transaction(self.storage.pool(), move |mut tx| async move {
            let payment = Storage::get_payment_for_update(&mut tx, payment_id).await?;
            Ok((payment, tx))
        })
        .await?;

        let provider = self.providers.get(&payment.provider)?;
        let provider_transaction_id = payment.provider_transaction_id.clone().unwrap_or_default();
        let refund_request = RefundRequest {
            amount: refund.amount,
            provider_transaction_id,
            reason: refund.reason.clone(),
        };

        let provider_name = payment.provider.clone();
        let call_result = self
            .breakers
            .call(
                &provider_name,
                move || async move { Ok::<_, PayhubError>(provider.process_refund(refund_request).await) },
                |_: &Result<_, PayhubError>| Outcome::Success,
            )
            .await;

        let (success, provider_refund_id, failure_reason) = match call_result {
            Ok(response) if response.success => (true, response.refund_id, None),
            Ok(response) => (false, None, response.error_message),
            Err(e @ BreakerError::Open(_)) | Err(e @ BreakerError::Timeout(_)) => {
                tracing::warn!(provider = %provider_name, error = %e, "refund call rejected by breaker");
                (false, None, Some(e.to_string()))
            }
            Err(BreakerError::Inner(e)) => (false, None, Some(e.to_string())),
        };
        let new_refund_status = if success { RefundStatus::Completed } else { RefundStatus::Failed };
        let refund_id = refund.id;

        let updated_payment = in_transaction(self.storage.pool(), move |mut tx| {
            let provider_refund_id = provider_refund_id.clone();
            let failure_reason = failure_reason.clone();
            async move {
                Storage::update_refund_status(&mut tx, refund_id, new_refund_status, provider_refund_id.as_deref())
                    .await?;
                let mut new_value = serde_json::json!({
                    "status": if success { "completed" } else { "failed" }
                });
                if let (false, Some(reason)) = (success, &failure_reason) {
                    new_value["error"] = serde_json::Value::String(reason.clone());
                }
                payhub_audit::record_tx(
                    &mut tx,
                    &AuditEntry::new(entity::REFUND, refund_id.to_string(), action::REFUND_STATUS_CHANGED)
                        .with_old_value(serde_json::json!({"status": "pending"}))
                        .with_new_value(new_value),
                )
                .await?;

                if !success {
                    let payment = Storage::get_payment_for_update(&mut tx, payment_id).await?;
                    return Ok((payment, tx));
                }

                let currency = payment.amount.currency();
                let completed_total =
                    Storage::sum_refunds(&mut tx, payment_id, RefundStatus::Completed, currency).await?;
                let new_payment_status = if completed_total == payment.amount {
                    PaymentStatus::Refunded
                } else {
                    PaymentStatus::PartiallyRefunded
                };
                Storage::update_payment_status(&mut tx, payment_id, new_payment_status, None).await?;
                Storage::insert_transaction(&mut tx, payment_id, new_payment_status, None, None, None).await?;
                payhub_audit::record_tx(
                    &mut tx,
                    &AuditEntry::new(entity::PAYMENT, payment_id.to_string(), action::PAYMENT_STATUS_CHANGED)
                        .with_old_value(serde_json::json!({"status": payhub_storage::status_str(payment.status)}))
                        .with_new_value(serde_json::json!({
                            "status": payhub_storage::status_str(new_payment_status)
                        })),
                )
                .await?;

                let mut payment = payment;
                payment.status = new_payment_status;
                Ok((payment, tx))
            }
        })
        .await?;

        let final_refund = self.storage.get_refund(refund_id, &currency).await?;

        if success {
            if let Some(url) = updated_payment.webhook_url.clone() {
                let payload = serde_json::json!({
                    "payment_id": payment_id,
                    "refund_id": refund_id,
                    "amount": final_refund.amount.to_persisted_string(),
                    "payment_status": payhub_storage::status_str(updated_payment.status),
                });
                if let Err(e) = self.webhooks.enqueue(Some(payment_id), "refund.completed", payload, &url).await {
                    tracing::warn!(refund_id = %refund_id, error = %e, "failed to enqueue refund webhook");
                }
            }
        }

        Ok(RefundOutcome { refund: final_refund, payment: updated_payment })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_floors_at_zero_when_spent_exceeds_amount() {
        let amount = Money::parse("100.00", "USD").unwrap();
        let over = Money::parse("150.00", "USD").unwrap();
        assert_eq!(amount.partial_cmp(&over), Some(std::cmp::Ordering::Less));
    }

    #[test]
    fn exceeds_available_rejects_over_refund() {
        let available = Money::parse("25.00", "USD").unwrap();
        let requested = Money::parse("30.00", "USD").unwrap();
        assert_eq!(requested.partial_cmp(&available), Some(std::cmp::Ordering::Greater));
    }
}
