//! # PayHub Saga
//!
//! The generic forward/compensation saga orchestrator (spec.md section
//! 4.6): a fluent step-appending builder ending in `execute(context)`
//! (spec.md section 9). Steps apply in order over an opaque context type,
//! threaded through by ownership rather than `&mut` — each step consumes
//! the context, awaits whatever it needs to, and hands an updated context
//! back, which sidesteps holding a borrow across an `.await` point. On
//! failure, every step that completed successfully before the failure is
//! compensated in reverse order. Compensation errors are recorded but
//! never abort the compensation sweep, and never mask the primary error
//! (spec.md section 7's propagation policy).
//!
//! Dynamic dispatch is confined to the step vector itself — no trait
//! object hierarchy beyond `Box<dyn Fn(...) -> BoxFuture<...>>` closures,
//! matching spec.md section 9's "never required beyond the step vector."

use std::fmt;
use std::future::Future;
use std::pin::Pin;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type ForwardFn<C, E> = Box<dyn Fn(C) -> BoxFuture<(C, Result<(), E>)> + Send + Sync>;
type CompensationFn<C> = Box<dyn Fn(C) -> BoxFuture<(C, Result<(), String>)> + Send + Sync>;

struct Step<C, E> {
    name: String,
    forward: ForwardFn<C, E>,
    compensation: Option<CompensationFn<C>>,
}

/// A fluent builder accumulating ordered steps. Call [`SagaBuilder::step`]
/// to append a forward action, optionally followed by
/// [`SagaBuilder::compensate`] to attach that step's compensation, then
/// [`SagaBuilder::execute`] to run the whole sequence.
pub struct SagaBuilder<C, E> {
    steps: Vec<Step<C, E>>,
}

impl<C, E> Default for SagaBuilder<C, E> {
    fn default() -> Self {
        Self { steps: Vec::new() }
    }
}

impl<C, E> SagaBuilder<C, E>
where
    E: fmt::Display + Send + 'static,
    C: Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step with no compensation. Call [`SagaBuilder::compensate`]
    /// immediately after to attach one to this same step.
    pub fn step<F, Fut>(mut self, name: impl Into<String>, forward: F) -> Self
    where
        F: Fn(C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = (C, Result<(), E>)> + Send + 'static,
    {
        self.steps.push(Step {
            name: name.into(),
            forward: Box::new(move |ctx| Box::pin(forward(ctx))),
            compensation: None,
        });
        self
    }

    /// Attaches a compensation to the most recently appended step. Panics
    /// if called before any `step` — that is a builder-misuse bug, not a
    /// runtime condition callers need to recover from.
    pub fn compensate<F, Fut>(mut self, compensation: F) -> Self
    where
        F: Fn(C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = (C, Result<(), String>)> + Send + 'static,
    {
        let last = self.steps.last_mut().expect("compensate() called before any step()");
        last.compensation = Some(Box::new(move |ctx| Box::pin(compensation(ctx))));
        self
    }

    /// Runs every step in order. On the first failure, halts forward
    /// progress and compensates every previously-completed step in
    /// reverse order, swallowing (but recording) compensation errors.
    pub async fn execute(self, context: C) -> SagaResult<C, E> {
        let mut context = context;
        let mut completed: Vec<usize> = Vec::new();
        let mut failure: Option<(String, E)> = None;

        for (index, step) in self.steps.iter().enumerate() {
            let (next_context, result) = (step.forward)(context).await;
            context = next_context;
            match result {
                Ok(()) => {
                    tracing::debug!(step = %step.name, "saga step completed");
                    completed.push(index);
                }
                Err(e) => {
                    tracing::warn!(step = %step.name, error = %e, "saga step failed, compensating");
                    failure = Some((step.name.clone(), e));
                    break;
                }
            }
        }

        let Some((failed_step, error)) = failure else {
            return SagaResult {
                success: true,
                context,
                error: None,
                failed_step: None,
                completed_steps: self.steps.iter().map(|s| s.name.clone()).collect(),
                compensation_errors: Vec::new(),
            };
        };

        let mut compensation_errors = Vec::new();
        for &index in completed.iter().rev() {
            let step = &self.steps[index];
            if let Some(compensation) = &step.compensation {
                let (next_context, result) = compensation(context).await;
                context = next_context;
                if let Err(e) = result {
                    tracing::error!(step = %step.name, error = %e, "compensation failed");
                    compensation_errors.push((step.name.clone(), e));
                }
            }
        }

        SagaResult {
            success: false,
            context,
            error: Some(error),
            failed_step: Some(failed_step),
            completed_steps: completed.into_iter().map(|i| self.steps[i].name.clone()).collect(),
            compensation_errors,
        }
    }
}

/// The outcome of running a saga to completion (spec.md 4.6, step 3).
pub struct SagaResult<C, E> {
    pub success: bool,
    pub context: C,
    pub error: Option<E>,
    pub failed_step: Option<String>,
    /// Names of every step that completed successfully before the
    /// saga returned, in execution order.
    pub completed_steps: Vec<String>,
    /// `(step name, error message)` for every compensation that itself
    /// failed; these never mask `error`, the primary failure.
    pub compensation_errors: Vec<(String, String)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default, Clone)]
    struct Ctx {
        log: Vec<&'static str>,
    }

    #[tokio::test]
    async fn all_steps_succeed() {
        let saga = SagaBuilder::<Ctx, String>::new()
            .step("a", |mut c: Ctx| async move {
                c.log.push("a");
                (c, Ok(()))
            })
            .step("b", |mut c: Ctx| async move {
                c.log.push("b");
                (c, Ok(()))
            });

        let result = saga.execute(Ctx::default()).await;
        assert!(result.success);
        assert_eq!(result.context.log, vec!["a", "b"]);
        assert_eq!(result.completed_steps, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn failure_compensates_completed_steps_in_reverse_order() {
        let compensation_order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let order_a = compensation_order.clone();
        let order_b = compensation_order.clone();

        let saga = SagaBuilder::<Ctx, String>::new()
            .step("persist", |c: Ctx| async move { (c, Ok(())) })
            .compensate(move |c: Ctx| {
                let order_a = order_a.clone();
                async move {
                    order_a.lock().unwrap().push("persist");
                    (c, Ok(()))
                }
            })
            .step("provider", |c: Ctx| async move { (c, Ok(())) })
            .compensate(move |c: Ctx| {
                let order_b = order_b.clone();
                async move {
                    order_b.lock().unwrap().push("provider");
                    (c, Ok(()))
                }
            })
            .step("webhook", |c: Ctx| async move { (c, Err("provider down".to_string())) });

        let result = saga.execute(Ctx::default()).await;
        assert!(!result.success);
        assert_eq!(result.failed_step.as_deref(), Some("webhook"));
        assert_eq!(result.completed_steps, vec!["persist", "provider"]);
        assert_eq!(*compensation_order.lock().unwrap(), vec!["provider", "persist"]);
    }

    #[tokio::test]
    async fn compensation_error_is_recorded_not_propagated() {
        let saga = SagaBuilder::<Ctx, String>::new()
            .step("a", |c: Ctx| async move { (c, Ok(())) })
            .compensate(|c: Ctx| async move { (c, Err("compensation boom".to_string())) })
            .step("b", |c: Ctx| async move { (c, Err("primary failure".to_string())) });

        let result = saga.execute(Ctx::default()).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("primary failure"));
        assert_eq!(result.compensation_errors, vec![("a".to_string(), "compensation boom".to_string())]);
    }

    #[tokio::test]
    async fn step_with_no_compensation_is_skipped_during_sweep() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let saga = SagaBuilder::<Ctx, String>::new()
            .step("uncompensated", |c: Ctx| async move { (c, Ok(())) })
            .step("compensated", move |c: Ctx| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    (c, Ok(()))
                }
            })
            .compensate(|c: Ctx| async move { (c, Ok(())) })
            .step("failing", |c: Ctx| async move { (c, Err("boom".to_string())) });

        let result = saga.execute(Ctx::default()).await;
        assert!(!result.success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
