//! The charge saga and provider-webhook reconciliation (spec.md section
//! 4.7). Kept in its own module since both are built on the same small set
//! of storage/breaker/webhook primitives and neither is meant to be called
//! from outside [`crate::PaymentService`].

use chrono::Utc;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use payhub_audit::{action, entity, AuditEntry};
use payhub_breaker::{BreakerError, Outcome};
use payhub_providers::ChargeRequest;
use payhub_saga::SagaBuilder;
use payhub_storage::advisory_lock::in_transaction;
use payhub_storage::Storage;
use payhub_types::{Payment, PaymentStatus, PayhubError};

use crate::{NewCharge, PaymentService};

/// The saga's result, handed back to the caller once every step (or the
/// compensation sweep) has run.
#[derive(Debug, Clone)]
pub struct ChargeOutcome {
    pub payment: Payment,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

/// Threaded through the saga's three steps by ownership. `payment` is
/// `None` only before the persist step runs; every later step can assume
/// it is populated.
#[derive(Clone)]
struct ChargeCtx {
    svc: PaymentService,
    req: NewCharge,
    payment: Option<Payment>,
    provider_transaction_id: Option<String>,
    raw_response: Option<JsonValue>,
    webhook_url: Option<String>,
    error_code: Option<String>,
    error_message: Option<String>,
}

fn breaker_error_to_payhub(name: &str, err: BreakerError<PayhubError>) -> PayhubError {
    match err {
        BreakerError::Open(name) => PayhubError::CircuitOpen(name),
        BreakerError::Timeout(d) => PayhubError::Provider {
            code: "PROVIDER_TIMEOUT".to_string(),
            message: format!("{name} call exceeded {d:?}"),
        },
        BreakerError::Inner(e) => e,
    }
}

pub async fn run_charge_saga(svc: PaymentService, req: NewCharge) -> Result<ChargeOutcome, PayhubError> {
    let webhook_url = req.webhook_url.clone();
    let ctx = ChargeCtx {
        svc,
        req,
        payment: None,
        provider_transaction_id: None,
        raw_response: None,
        webhook_url,
        error_code: None,
        error_message: None,
    };

    let saga = SagaBuilder::<ChargeCtx, PayhubError>::new()
        .step("persist", persist_step)
        .compensate(fail_payment_compensation)
        .step("invoke_provider", invoke_provider_step)
        .step("enqueue_webhook", enqueue_webhook_step);

    let result = saga.execute(ctx).await;
    if !result.success {
        let error = result.error.expect("saga reports failure without an error");
        for (step, message) in &result.compensation_errors {
            tracing::error!(step = %step, error = %message, "charge saga compensation failed");
        }
        return Err(error);
    }

    let payment = result.context.payment.expect("persist step guarantees a payment");
    Ok(ChargeOutcome {
        payment,
        error_code: result.context.error_code,
        error_message: result.context.error_message,
    })
}

async fn persist_step(mut ctx: ChargeCtx) -> (ChargeCtx, Result<(), PayhubError>) {
    let now = Utc::now();
    let payment = Payment {
        id: Uuid::new_v4(),
        external_id: ctx.req.external_id.clone(),
        merchant_id: ctx.req.merchant_id.clone(),
        amount: ctx.req.amount,
        status: PaymentStatus::Pending,
        provider: ctx.req.provider.clone(),
        provider_transaction_id: None,
        description: ctx.req.description.clone(),
        metadata: ctx.req.metadata.clone(),
        webhook_url: ctx.req.webhook_url.clone(),
        created_at: now,
        updated_at: now,
    };

    let storage = ctx.svc.storage().clone();
    let payment_for_tx = payment.clone();
    let outcome = in_transaction(storage.pool(), move |mut tx| {
        let payment = payment_for_tx.clone();
        async move {
            Storage::insert_payment_tx(&mut tx, &payment).await?;
            Storage::insert_transaction(&mut tx, payment.id, PaymentStatus::Pending, None, None, None).await?;
            payhub_audit::record_tx(
                &mut tx,
                &AuditEntry::new(entity::PAYMENT, payment.id.to_string(), action::PAYMENT_CREATED)
                    .with_new_value(serde_json::json!({"status": "pending"})),
            )
            .await?;
            Ok(((), tx))
        }
    })
    .await;

    match outcome {
        Ok(()) => {
            ctx.payment = Some(payment);
            (ctx, Ok(()))
        }
        Err(e) => (ctx, Err(e.into())),
    }
}

/// Undoes `persist` when a later step fails for an infrastructure reason
/// (the provider call or the webhook enqueue never ran, or errored before
/// producing a terminal status) by marking the payment `failed`. A no-op
/// if `persist` itself never committed.
async fn fail_payment_compensation(mut ctx: ChargeCtx) -> (ChargeCtx, Result<(), String>) {
    let Some(payment) = ctx.payment.clone() else {
        return (ctx, Ok(()));
    };
    let storage = ctx.svc.storage().clone();
    let payment_id = payment.id;
    let result = in_transaction(storage.pool(), move |mut tx| async move {
        Storage::update_payment_status(&mut tx, payment_id, PaymentStatus::Failed, None).await?;
        Storage::insert_transaction(
            &mut tx,
            payment_id,
            PaymentStatus::Failed,
            None,
            None,
            Some("charge saga compensation"),
        )
        .await?;
        Ok(((), tx))
    })
    .await;

    match result {
        Ok(()) => {
            if let Some(p) = ctx.payment.as_mut() {
                p.status = PaymentStatus::Failed;
            }
            (ctx, Ok(()))
        }
        Err(e) => (ctx, Err(e.to_string())),
    }
}

/// Calls the named provider through its breaker, persists the resulting
/// transaction row and status, and stamps the provider's transaction id
/// onto the payment (spec.md 4.7 step 2). A provider decline or pending
/// response is a normal terminal outcome — only a breaker rejection,
/// timeout, or storage failure returns `Err` and triggers compensation.
async fn invoke_provider_step(mut ctx: ChargeCtx) -> (ChargeCtx, Result<(), PayhubError>) {
    let payment = ctx.payment.clone().expect("persist step ran first");
    let provider = match ctx.svc.providers().get(&payment.provider) {
        Ok(p) => p,
        Err(e) => return (ctx, Err(e)),
    };

    let charge_request = ChargeRequest {
        amount: payment.amount,
        description: payment.description.clone(),
        metadata: payment.metadata.clone().into_iter().collect(),
    };

    let breakers = ctx.svc.breakers();
    let provider_name = payment.provider.clone();
    // A decline is a well-formed response, not a breaker failure (only a
    // timeout, caught by the breaker itself, or rejection while open counts
    // against this circuit) — see payhub-breaker's `call` doc comment.
    let call_result = breakers
        .call(
            &provider_name,
            move || async move { Ok::<_, PayhubError>(provider.process_payment(charge_request).await) },
            |_: &Result<_, PayhubError>| Outcome::Success,
        )
        .await;

    let response = match call_result {
        Ok(response) => response,
        Err(e) => return (ctx, Err(breaker_error_to_payhub(&provider_name, e))),
    };

    let storage = ctx.svc.storage().clone();
    let payment_id = payment.id;
    // spec.md 4.7 step 2's status table: a decline is always `failed`
    // regardless of what `status` the provider attached to it, and a
    // success is `completed` only when the provider says so outright —
    // any other success status (e.g. still settling) is `pending`.
    let new_status = match (response.success, response.status) {
        (true, PaymentStatus::Completed) => PaymentStatus::Completed,
        (true, _) => PaymentStatus::Pending,
        (false, _) => PaymentStatus::Failed,
    };
    let provider_transaction_id = response.transaction_id.clone();
    let raw_response = response.raw_response.clone();
    let error_code = response.error_code.clone();
    let error_message = response.error_message.clone();

    let result = in_transaction(storage.pool(), move |mut tx| {
        let provider_transaction_id = provider_transaction_id.clone();
        let raw_response = raw_response.clone();
        let error_code = error_code.clone();
        let error_message = error_message.clone();
        async move {
            Storage::update_payment_status(
                &mut tx,
                payment_id,
                new_status,
                provider_transaction_id.as_deref(),
            )
            .await?;
            Storage::insert_transaction(
                &mut tx,
                payment_id,
                new_status,
                Some(raw_response),
                error_code.as_deref(),
                error_message.as_deref(),
            )
            .await?;
            payhub_audit::record_tx(
                &mut tx,
                &AuditEntry::new(entity::PAYMENT, payment_id.to_string(), action::PAYMENT_STATUS_CHANGED)
                    .with_old_value(serde_json::json!({"status": "pending"}))
                    .with_new_value(serde_json::json!({"status": payhub_storage::status_str(new_status)})),
            )
            .await?;
            Ok(((), tx))
        }
    })
    .await;

    if let Err(e) = result {
        return (ctx, Err(e.into()));
    }

    if let Some(p) = ctx.payment.as_mut() {
        p.status = new_status;
        p.provider_transaction_id = response.transaction_id.clone();
    }
    ctx.provider_transaction_id = response.transaction_id;
    ctx.raw_response = Some(response.raw_response);
    ctx.error_code = response.error_code;
    ctx.error_message = response.error_message;
    (ctx, Ok(()))
}

/// Best-effort merchant notification (spec.md 4.7 step 3, 4.9 `Enqueue`).
/// A missing `webhook_url` is not an error — the merchant simply never
/// asked to be notified. An enqueue failure is logged and swallowed rather
/// than reversing an already-settled payment: the money has already moved
/// (or definitively failed to), and there is nothing left to compensate.
async fn enqueue_webhook_step(ctx: ChargeCtx) -> (ChargeCtx, Result<(), PayhubError>) {
    let Some(url) = ctx.webhook_url.clone() else {
        return (ctx, Ok(()));
    };
    let payment = ctx.payment.clone().expect("persist step ran first");
    let event_type = format!("payment.{}", payhub_storage::status_str(payment.status));
    let payload = serde_json::json!({
        "payment_id": payment.id,
        "status": payhub_storage::status_str(payment.status),
        "amount": payment.amount.to_persisted_string(),
        "currency": payment.amount.currency(),
    });

    if let Err(e) = ctx.svc.webhooks().enqueue(Some(payment.id), &event_type, payload, &url).await {
        tracing::warn!(payment_id = %payment.id, error = %e, "failed to enqueue charge webhook");
    }
    (ctx, Ok(()))
}

/// Reconciles a provider-originated webhook against the matching payment,
/// looked up by `(provider, provider_transaction_id)` under row lock
/// (spec.md 4.7 "Reconciliation"). An invalid transition (e.g. a stale
/// retry of an event already applied) is logged and ignored rather than
/// surfaced — the webhook endpoint still reports `received: true` so the
/// sender does not retry forever.
pub async fn reconcile(
    svc: &PaymentService,
    provider: &str,
    provider_transaction_id: &str,
    new_status: PaymentStatus,
    raw_response: JsonValue,
) -> Result<(), PayhubError> {
    let storage = svc.storage().clone();
    let Some(found) = storage
        .find_payment_by_provider_tx(provider, provider_transaction_id)
        .await
        .map_err(PayhubError::from)?
    else {
        tracing::warn!(provider, provider_transaction_id, "reconciliation: no matching payment");
        return Ok(());
    };
    let payment_id = found.id;
    let webhook_url = found.webhook_url.clone();

    let applied = in_transaction(storage.pool(), move |mut tx| async move {
        let payment = Storage::get_payment_for_update(&mut tx, payment_id).await?;
        if !payment.status.can_transition_to(new_status) {
            return Ok((false, tx));
        }
        Storage::update_payment_status(&mut tx, payment_id, new_status, Some(provider_transaction_id)).await?;
        Storage::insert_transaction(&mut tx, payment_id, new_status, Some(raw_response), None, None).await?;
        payhub_audit::record_tx(
            &mut tx,
            &AuditEntry::new(entity::PAYMENT, payment_id.to_string(), action::PAYMENT_STATUS_CHANGED)
                .with_old_value(serde_json::json!({"status": payhub_storage::status_str(payment.status)}))
                .with_new_value(serde_json::json!({"status": payhub_storage::status_str(new_status)})),
        )
        .await?;
        Ok((true, tx))
    })
    .await
    .map_err(PayhubError::from)?;

    if !applied {
        tracing::info!(
            payment_id = %payment_id,
            ?new_status,
            "reconciliation: ignoring invalid transition"
        );
        return Ok(());
    }

    if let Some(url) = webhook_url {
        let event_type = format!("payment.{}", payhub_storage::status_str(new_status));
        let payload = serde_json::json!({
            "payment_id": payment_id,
            "status": payhub_storage::status_str(new_status),
        });
        if let Err(e) = svc.webhooks().enqueue(Some(payment_id), &event_type, payload, &url).await {
            tracing::warn!(payment_id = %payment_id, error = %e, "failed to enqueue reconciliation webhook");
        }
    }
    Ok(())
}
