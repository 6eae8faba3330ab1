//! Models spec.md section 4.7's three-step charge saga (persist, invoke
//! provider, enqueue webhook) with the real `payhub-saga` orchestrator and
//! real `Money`/`PaymentStatus` types, against an in-memory ledger instead
//! of `payhub-storage`. This exercises the saga/types composition the
//! payment service builds on without requiring a live Postgres instance.

use std::sync::{Arc, Mutex};

use payhub_saga::SagaBuilder;
use payhub_types::{Money, PaymentStatus};

#[derive(Clone)]
struct ChargeCtx {
    amount: Money,
    status: PaymentStatus,
    ledger: Arc<Mutex<Vec<String>>>,
    provider_should_fail: bool,
}

fn log(ctx: &ChargeCtx, entry: &str) {
    ctx.ledger.lock().unwrap().push(entry.to_string());
}

fn build_saga() -> SagaBuilder<ChargeCtx, String> {
    SagaBuilder::new()
        .step("persist", |mut ctx: ChargeCtx| async move {
            ctx.status = PaymentStatus::Pending;
            log(&ctx, "persisted:pending");
            (ctx, Ok(()))
        })
        .compensate(|ctx: ChargeCtx| async move {
            log(&ctx, "compensate:persist->failed");
            (ctx, Ok(()))
        })
        .step("invoke_provider", |mut ctx: ChargeCtx| async move {
            if ctx.provider_should_fail {
                log(&ctx, "provider:error");
                return (ctx, Err("provider unreachable".to_string()));
            }
            ctx.status = PaymentStatus::Completed;
            log(&ctx, "provider:completed");
            (ctx, Ok(()))
        })
        .compensate(|ctx: ChargeCtx| async move {
            log(&ctx, "compensate:provider");
            (ctx, Ok(()))
        })
        .step("enqueue_webhook", |ctx: ChargeCtx| async move {
            log(&ctx, "webhook:enqueued");
            (ctx, Ok(()))
        })
}

#[tokio::test]
async fn happy_path_runs_all_three_steps_in_order() {
    let ctx = ChargeCtx {
        amount: Money::parse("100.00", "USD").unwrap(),
        status: PaymentStatus::Pending,
        ledger: Arc::new(Mutex::new(Vec::new())),
        provider_should_fail: false,
    };
    let ledger = ctx.ledger.clone();

    let result = build_saga().execute(ctx).await;

    assert!(result.success);
    assert_eq!(result.context.status, PaymentStatus::Completed);
    assert_eq!(
        *ledger.lock().unwrap(),
        vec!["persisted:pending", "provider:completed", "webhook:enqueued"]
    );
}

#[tokio::test]
async fn provider_failure_compensates_persist_but_never_runs_enqueue() {
    let ctx = ChargeCtx {
        amount: Money::parse("100.00", "USD").unwrap(),
        status: PaymentStatus::Pending,
        ledger: Arc::new(Mutex::new(Vec::new())),
        provider_should_fail: true,
    };
    let ledger = ctx.ledger.clone();

    let result = build_saga().execute(ctx).await;

    assert!(!result.success);
    assert_eq!(result.failed_step.as_deref(), Some("invoke_provider"));
    assert_eq!(result.completed_steps, vec!["persist"]);
    assert!(result.compensation_errors.is_empty());
    assert_eq!(
        *ledger.lock().unwrap(),
        vec!["persisted:pending", "provider:error", "compensate:persist->failed"]
    );
    // The enqueue step never ran: a provider decline/error stops the
    // forward sequence before any webhook is scheduled.
    assert!(!ledger.lock().unwrap().contains(&"webhook:enqueued".to_string()));
}

#[tokio::test]
async fn amount_is_carried_through_unchanged_regardless_of_outcome() {
    let amount = Money::parse("250.1234", "EUR").unwrap();
    let ctx = ChargeCtx {
        amount,
        status: PaymentStatus::Pending,
        ledger: Arc::new(Mutex::new(Vec::new())),
        provider_should_fail: true,
    };
    let result = build_saga().execute(ctx).await;
    assert_eq!(result.context.amount, amount);
}
