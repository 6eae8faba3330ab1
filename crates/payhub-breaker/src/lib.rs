//! # PayHub Circuit Breaker
//!
//! Per-named-operation closed/open/half-open state machine guarding calls
//! to external payment providers (spec.md section 4.4). Grounded on the
//! gateway's subsystem circuit breaker, generalized from a raw failure
//! count to an error-rate-over-a-volume-window trigger and given a
//! per-call timeout and an optional fallback.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Per-call timeout; a call exceeding this counts as a failure.
    pub call_timeout: Duration,
    /// Failure-rate percentage (0-100) that trips the breaker once the
    /// volume threshold is met.
    pub error_threshold_percent: u8,
    /// Minimum number of requests in the current window before the
    /// error rate is evaluated at all.
    pub volume_threshold: u32,
    /// How long `Open` is held before allowing a single half-open probe.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
            error_threshold_percent: 50,
            volume_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error("circuit open for {0}")]
    Open(String),
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Inner(E),
}

/// What kind of outcome a completed call produced, for classification
/// purposes (spec.md 4.4: a timeout is a failure AND is classified as
/// `timeout` distinctly from other failures).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    Timeout,
}

struct Window {
    requests: u32,
    failures: u32,
}

struct CircuitInner {
    state: CircuitState,
    window: Window,
    opened_at: Option<Instant>,
    half_open_probe_in_flight: bool,
}

/// A single named circuit (e.g. one per provider).
pub struct Circuit {
    name: String,
    config: BreakerConfig,
    inner: Mutex<CircuitInner>,
}

impl Circuit {
    fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                window: Window { requests: 0, failures: 0 },
                opened_at: None,
                half_open_probe_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Returns `Ok(())` if the call may proceed, `Err(())` if it must be
    /// rejected (circuit open, or an half-open probe already in flight).
    fn admit(&self) -> Result<(), ()> {
        let mut guard = self.inner.lock();
        match guard.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = guard.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.config.reset_timeout {
                    info!(circuit = %self.name, "transitioning to half-open");
                    guard.state = CircuitState::HalfOpen;
                    guard.half_open_probe_in_flight = true;
                    Ok(())
                } else {
                    Err(())
                }
            }
            CircuitState::HalfOpen => {
                if guard.half_open_probe_in_flight {
                    Err(())
                } else {
                    guard.half_open_probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    fn record(&self, outcome: Outcome) {
        let mut guard = self.inner.lock();
        match guard.state {
            CircuitState::Closed => {
                guard.window.requests += 1;
                if outcome != Outcome::Success {
                    guard.window.failures += 1;
                }
                if guard.window.requests >= self.config.volume_threshold {
                    let rate = (guard.window.failures as u64 * 100) / guard.window.requests as u64;
                    if rate >= self.config.error_threshold_percent as u64 {
                        warn!(
                            circuit = %self.name,
                            failures = guard.window.failures,
                            requests = guard.window.requests,
                            rate_percent = rate,
                            "circuit opening"
                        );
                        guard.state = CircuitState::Open;
                        guard.opened_at = Some(Instant::now());
                        guard.window = Window { requests: 0, failures: 0 };
                    }
                }
            }
            CircuitState::HalfOpen => {
                guard.half_open_probe_in_flight = false;
                if outcome == Outcome::Success {
                    info!(circuit = %self.name, "probe succeeded, closing circuit");
                    guard.state = CircuitState::Closed;
                    guard.opened_at = None;
                    guard.window = Window { requests: 0, failures: 0 };
                } else {
                    warn!(circuit = %self.name, "probe failed, reopening circuit");
                    guard.state = CircuitState::Open;
                    guard.opened_at = Some(Instant::now());
                }
            }
            CircuitState::Open => {
                // A stray completion racing a state change; nothing to do.
            }
        }
    }
}

/// A registry of named circuits, one per provider/operation.
pub struct BreakerRegistry {
    config: BreakerConfig,
    circuits: Mutex<HashMap<String, Arc<Circuit>>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    fn circuit_for(&self, name: &str) -> Arc<Circuit> {
        let mut circuits = self.circuits.lock();
        circuits
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Circuit::new(name, self.config)))
            .clone()
    }

    pub fn state_of(&self, name: &str) -> CircuitState {
        self.circuits
            .lock()
            .get(name)
            .map(|c| c.state())
            .unwrap_or(CircuitState::Closed)
    }

    /// Names (and states) of every circuit that is currently `Open`, for
    /// `/ready` reporting.
    pub fn open_circuits(&self) -> Vec<String> {
        self.circuits
            .lock()
            .iter()
            .filter(|(_, c)| c.state() == CircuitState::Open)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Run `f` through the named circuit. `classify` maps an `Ok`/`Err`
    /// from `f` into an [`Outcome`] (most calls: `Ok` -> success, `Err` ->
    /// failure; provider calls additionally treat a well-formed
    /// `{success:false}` response as a normal outcome rather than a
    /// breaker failure, so `classify` is left to the caller).
    pub async fn call<F, Fut, T, E>(
        &self,
        name: &str,
        f: F,
        classify: impl FnOnce(&Result<T, E>) -> Outcome,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let circuit = self.circuit_for(name);
        if circuit.admit().is_err() {
            debug!(circuit = name, "rejecting call, circuit not admitting");
            return Err(BreakerError::Open(name.to_string()));
        }

        match tokio::time::timeout(self.config.call_timeout, f()).await {
            Ok(result) => {
                let outcome = classify(&result);
                circuit.record(outcome);
                result.map_err(BreakerError::Inner)
            }
            Err(_) => {
                circuit.record(Outcome::Timeout);
                Err(BreakerError::Timeout(self.config.call_timeout))
            }
        }
    }

    /// Convenience wrapper for the common case: `Ok` is success, `Err` is
    /// failure. On rejection or failure, `fallback` (if given) supplies a
    /// substitute value without affecting the breaker's own state.
    pub async fn call_or_fallback<F, Fut, T, E>(
        &self,
        name: &str,
        f: F,
        fallback: Option<impl FnOnce() -> T>,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.call(name, f, |r| if r.is_ok() { Outcome::Success } else { Outcome::Failure }).await {
            Ok(v) => Ok(v),
            Err(e) => match fallback {
                Some(make) => Ok(make()),
                None => Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            call_timeout: Duration::from_millis(50),
            error_threshold_percent: 50,
            volume_threshold: 3,
            reset_timeout: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn starts_closed_and_allows_calls() {
        let reg = BreakerRegistry::new(fast_config());
        assert_eq!(reg.state_of("stripe"), CircuitState::Closed);
        let r: Result<_, BreakerError<&str>> = reg
            .call("stripe", || async { Ok::<_, &str>(42) }, |r| {
                if r.is_ok() { Outcome::Success } else { Outcome::Failure }
            })
            .await;
        assert_eq!(r.unwrap(), 42);
    }

    #[tokio::test]
    async fn opens_after_error_rate_over_volume_threshold() {
        let reg = BreakerRegistry::new(fast_config());
        for _ in 0..3 {
            let _: Result<i32, BreakerError<&str>> = reg
                .call("stripe", || async { Err::<i32, _>("boom") }, |r| {
                    if r.is_ok() { Outcome::Success } else { Outcome::Failure }
                })
                .await;
        }
        assert_eq!(reg.state_of("stripe"), CircuitState::Open);

        let rejected: Result<i32, BreakerError<&str>> = reg
            .call("stripe", || async { Ok(1) }, |_| Outcome::Success)
            .await;
        assert!(matches!(rejected, Err(BreakerError::Open(_))));
    }

    #[tokio::test]
    async fn half_open_probe_success_closes_circuit() {
        let reg = BreakerRegistry::new(fast_config());
        for _ in 0..3 {
            let _: Result<i32, BreakerError<&str>> = reg
                .call("stripe", || async { Err::<i32, _>("boom") }, |r| {
                    if r.is_ok() { Outcome::Success } else { Outcome::Failure }
                })
                .await;
        }
        assert_eq!(reg.state_of("stripe"), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(120)).await;

        let probe: Result<i32, BreakerError<&str>> = reg
            .call("stripe", || async { Ok(7) }, |_| Outcome::Success)
            .await;
        assert_eq!(probe.unwrap(), 7);
        assert_eq!(reg.state_of("stripe"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn timeout_counts_as_failure() {
        let reg = BreakerRegistry::new(fast_config());
        for _ in 0..3 {
            let _: Result<i32, BreakerError<&str>> = reg
                .call(
                    "paypal",
                    || async {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok::<i32, &str>(1)
                    },
                    |_| Outcome::Success,
                )
                .await;
        }
        assert_eq!(reg.state_of("paypal"), CircuitState::Open);
    }

    #[tokio::test]
    async fn fallback_substitutes_without_closing_circuit() {
        let reg = BreakerRegistry::new(fast_config());
        for _ in 0..3 {
            let _: Result<i32, BreakerError<&str>> = reg
                .call("stripe", || async { Err::<i32, _>("boom") }, |r| {
                    if r.is_ok() { Outcome::Success } else { Outcome::Failure }
                })
                .await;
        }
        assert_eq!(reg.state_of("stripe"), CircuitState::Open);

        let result = reg
            .call_or_fallback(
                "stripe",
                || async { Ok::<i32, &str>(1) },
                Some(|| 99),
            )
            .await;
        assert_eq!(result.unwrap(), 99);
        // Still open: fallback never marks the breaker closed.
        assert_eq!(reg.state_of("stripe"), CircuitState::Open);
    }
}
