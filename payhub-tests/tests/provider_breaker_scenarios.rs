//! End-to-end scenarios 1-3 from spec.md section 8, exercised through the
//! real [`ProviderRegistry`] and [`BreakerRegistry`] together rather than
//! each crate's own unit tests in isolation.

use std::sync::Arc;
use std::time::Duration;

use payhub_breaker::{BreakerConfig, BreakerRegistry, Outcome};
use payhub_providers::paypal_like::PaypalLikeProvider;
use payhub_providers::stripe_like::StripeLikeProvider;
use payhub_providers::{ChargeRequest, ProviderRegistry};
use payhub_types::{Money, PaymentStatus};

fn registry() -> ProviderRegistry {
    let mut reg = ProviderRegistry::new();
    reg.register(Arc::new(StripeLikeProvider::new()));
    reg.register(Arc::new(PaypalLikeProvider::new()));
    reg
}

fn charge(amount: &str) -> ChargeRequest {
    ChargeRequest {
        amount: Money::parse(amount, "USD").unwrap(),
        description: None,
        metadata: Default::default(),
    }
}

fn breakers() -> BreakerRegistry {
    BreakerRegistry::new(BreakerConfig {
        call_timeout: Duration::from_secs(10),
        error_threshold_percent: 50,
        volume_threshold: 5,
        reset_timeout: Duration::from_secs(30),
    })
}

#[tokio::test]
async fn scenario_1_happy_path_completes_through_breaker() {
    let providers = registry();
    let breakers = breakers();
    let provider = providers.get("stripe").unwrap();

    let response = breakers
        .call(
            "stripe",
            || async { Ok::<_, std::convert::Infallible>(provider.process_payment(charge("100.00")).await) },
            |r: &Result<_, std::convert::Infallible>| if r.as_ref().unwrap().success { Outcome::Success } else { Outcome::Failure },
        )
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.status, PaymentStatus::Completed);
    assert!(response.transaction_id.unwrap().starts_with("ch_"));
}

#[tokio::test]
async fn scenario_2_decline_is_a_normal_outcome_not_a_breaker_failure() {
    let providers = registry();
    let breakers = breakers();
    let provider = providers.get("stripe").unwrap();

    // A provider-level decline (`success: false`) must not be classified
    // as a breaker failure (spec.md section 9): it is a successful call
    // that happened to carry a declined result.
    for _ in 0..5 {
        let response = breakers
            .call(
                "stripe",
                || async { Ok::<_, std::convert::Infallible>(provider.process_payment(charge("100.99")).await) },
                |_: &Result<_, std::convert::Infallible>| Outcome::Success,
            )
            .await
            .unwrap();
        assert!(!response.success);
        assert_eq!(response.error_code.as_deref(), Some("card_declined"));
    }

    assert_eq!(breakers.state_of("stripe"), payhub_breaker::CircuitState::Closed);
}

#[tokio::test]
async fn scenario_3_pending_amount_awaits_reconciliation() {
    let providers = registry();
    let provider = providers.get("stripe").unwrap();
    let response = provider.process_payment(charge("100.50")).await;
    assert!(response.success);
    assert_eq!(response.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn unknown_provider_is_a_provider_error_before_any_breaker_call() {
    let providers = registry();
    let err = providers.get("acme-pay").unwrap_err();
    assert_eq!(err.code(), "PROVIDER_ERROR");
}

#[tokio::test]
async fn repeated_provider_errors_open_the_breaker_and_reject_subsequent_calls() {
    let providers = registry();
    let breakers = breakers();
    // Confirms the provider is actually registered before relying on the
    // breaker alone to reject `paypal` calls below.
    assert!(providers.is_registered("paypal"));

    for _ in 0..5 {
        let _: Result<i32, payhub_breaker::BreakerError<String>> = breakers
            .call(
                "paypal",
                || async { Err::<i32, String>("simulated transport failure".to_string()) },
                |r| if r.is_ok() { Outcome::Success } else { Outcome::Failure },
            )
            .await;
    }

    assert_eq!(breakers.state_of("paypal"), payhub_breaker::CircuitState::Open);

    let rejected: Result<i32, payhub_breaker::BreakerError<String>> =
        breakers.call("paypal", || async { Ok(1) }, |_| Outcome::Success).await;
    assert!(matches!(rejected, Err(payhub_breaker::BreakerError::Open(_))));
}
