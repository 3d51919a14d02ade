//! Workflow engine for executing steps.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tasuki_core::{
    CancellationSignal, Context, RetryPolicy, Step, StepConfig, StepName, WorkflowError,
};
use tokio::time::timeout;
use tracing::{info, warn};

/// A workflow engine that executes a chain of steps.
///
/// Each step names its successor; a step's output is stored in the
/// [`Context`] for the next one. The chain stops at the first failure or
/// absent result, or when the context's cancellation signal fires.
///
/// On cancellation or timeout a running step sees its context's signal fire
/// and gets a grace period to stop before it is dropped.
pub struct Workflow {
    steps: HashMap<StepName, StepEntry>,
    start_step: StepName,
    grace_period: Duration,
}

const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

struct StepEntry {
    step: Box<dyn Step>,
    config: StepConfig,
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("steps", &self.steps.keys().collect::<Vec<_>>())
            .field("start_step", &self.start_step)
            .field("grace_period", &self.grace_period)
            .finish()
    }
}

impl Workflow {
    /// Creates a new workflow builder.
    pub fn builder() -> WorkflowBuilder {
        WorkflowBuilder::new()
    }

    /// Returns the name of the start step.
    pub fn start_step(&self) -> &StepName {
        &self.start_step
    }

    /// Returns `true` if a step with the given name exists.
    pub fn has_step(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    /// Returns the number of registered steps.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Executes the workflow starting from the configured start step.
    pub async fn execute(&self, ctx: &mut Context) -> Result<(), Vec<WorkflowError>> {
        let mut current_step = Some(self.start_step.clone());
        let mut errors = Vec::new();

        while let Some(step_name) = current_step {
            if ctx.cancellation().is_cancelled() {
                warn!("Workflow cancelled before step '{}'", step_name);
                errors.push(WorkflowError::Cancelled { step_name });
                break;
            }

            let Some(entry) = self.steps.get(&step_name) else {
                errors.push(WorkflowError::StepNotFound(step_name));
                break;
            };

            match self.execute_step_with_retry(entry, ctx).await {
                StepResult::Success(next) => {
                    current_step = next;
                }
                StepResult::Failed(error) => {
                    errors.push(error);
                    current_step = None;
                }
            }
        }

        if errors.is_empty() {
            info!("Workflow completed in {:?}", ctx.elapsed());
            Ok(())
        } else {
            Err(errors)
        }
    }

    async fn execute_step_with_retry(&self, entry: &StepEntry, ctx: &mut Context) -> StepResult {
        let name = entry.step.name();
        let policy = &entry.config.retry_policy;
        let max_retries = policy.max_retries();
        let cancel = ctx.cancellation().clone();
        let mut attempt = 0;

        loop {
            let error = match attempt_once(entry, &name, ctx, self.grace_period).await {
                Ok(next) => {
                    info!("Step '{}' completed successfully", name);
                    return StepResult::Success(next);
                }
                Err(error) => error,
            };

            if attempt >= max_retries || !error.is_retryable() {
                if attempt > 0 {
                    warn!("Step '{}' failed after {} retries: {}", name, attempt, error);
                } else {
                    warn!("Step '{}' failed: {}", name, error);
                }
                return StepResult::Failed(error);
            }

            info!(
                "Step '{}' failed ({}), retrying ({}/{})",
                name,
                error,
                attempt + 1,
                max_retries
            );
            if !wait_for_retry(policy, attempt, &cancel).await {
                return StepResult::Failed(WorkflowError::Cancelled { step_name: name });
            }
            attempt += 1;
        }
    }
}

enum Interruption {
    Cancelled,
    TimedOut,
}

/// Runs one attempt of a step under its own cancellation signal.
async fn attempt_once(
    entry: &StepEntry,
    name: &StepName,
    ctx: &mut Context,
    grace_period: Duration,
) -> Result<Option<StepName>, WorkflowError> {
    let workflow_cancel = ctx.cancellation().clone();
    let attempt_cancel = CancellationSignal::new();
    let previous = ctx.replace_cancellation(attempt_cancel.clone());
    let outcome = supervise(
        entry,
        name,
        ctx,
        &workflow_cancel,
        &attempt_cancel,
        grace_period,
    )
    .await;
    ctx.replace_cancellation(previous);
    outcome
}

/// Cancellation of the workflow or expiry of the step timeout fires the
/// attempt's signal; the step then gets `grace_period` to stop its agents
/// before it is dropped.
async fn supervise(
    entry: &StepEntry,
    name: &StepName,
    ctx: &mut Context,
    workflow_cancel: &CancellationSignal,
    attempt_cancel: &CancellationSignal,
    grace_period: Duration,
) -> Result<Option<StepName>, WorkflowError> {
    let step = entry.step.execute(ctx);
    tokio::pin!(step);
    let expired = async {
        match entry.config.timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };

    let interruption = tokio::select! {
        biased;
        _ = workflow_cancel.cancelled() => Interruption::Cancelled,
        _ = expired => Interruption::TimedOut,
        outcome = &mut step => return outcome,
    };

    attempt_cancel.cancel();
    if timeout(grace_period, &mut step).await.is_err() {
        warn!(
            "Step '{}' did not stop within {:?} of being interrupted",
            name, grace_period
        );
    }
    match interruption {
        Interruption::Cancelled => Err(WorkflowError::Cancelled {
            step_name: name.clone(),
        }),
        Interruption::TimedOut => Err(WorkflowError::Timeout {
            step_name: name.clone(),
        }),
    }
}

/// Sleeps out the back-off delay. Returns `false` if cancelled meanwhile.
async fn wait_for_retry(
    policy: &RetryPolicy,
    attempt: u32,
    cancel: &CancellationSignal,
) -> bool {
    let Some(delay) = policy.delay_for_attempt(attempt) else {
        return !cancel.is_cancelled();
    };
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

enum StepResult {
    Success(Option<StepName>),
    Failed(WorkflowError),
}

/// Builder for constructing [`Workflow`] instances.
pub struct WorkflowBuilder {
    steps: HashMap<StepName, StepEntry>,
    start_step: Option<StepName>,
    grace_period: Duration,
}

impl Default for WorkflowBuilder {
    fn default() -> Self {
        Self {
            steps: HashMap::new(),
            start_step: None,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

impl WorkflowBuilder {
    /// Creates a new empty workflow builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long an interrupted step may take to stop before it is
    /// dropped. Defaults to ten seconds.
    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Adds a step with the default [`StepConfig`].
    pub fn add_step<S: Step + 'static>(self, name: impl Into<StepName>, step: S) -> Self {
        self.add_configured(name, step, StepConfig::default())
    }

    /// Adds a step with a retry policy and the default timeout.
    pub fn add_retryable<S: Step + 'static>(
        self,
        name: impl Into<StepName>,
        step: S,
        retry_policy: RetryPolicy,
    ) -> Self {
        let config = StepConfig {
            retry_policy,
            ..StepConfig::default()
        };
        self.add_configured(name, step, config)
    }

    /// Adds a fully configured step.
    pub fn add_configured<S: Step + 'static>(
        mut self,
        name: impl Into<StepName>,
        step: S,
        config: StepConfig,
    ) -> Self {
        self.steps.insert(
            name.into(),
            StepEntry {
                step: Box::new(step),
                config,
            },
        );
        self
    }

    /// Sets the start step by name.
    pub fn start_with(mut self, step_name: impl Into<StepName>) -> Self {
        self.start_step = Some(step_name.into());
        self
    }

    /// Builds the workflow.
    pub fn build(self) -> Result<Workflow, WorkflowError> {
        let start_step = self.start_step.ok_or_else(|| {
            WorkflowError::Configuration("Start step must be specified".to_string())
        })?;

        if !self.steps.contains_key(&start_step) {
            return Err(WorkflowError::StepNotFound(start_step));
        }

        Ok(Workflow {
            steps: self.steps,
            start_step,
            grace_period: self.grace_period,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug)]
    struct SuccessStep;

    #[async_trait]
    impl Step for SuccessStep {
        async fn execute(&self, ctx: &mut Context) -> Result<Option<StepName>, WorkflowError> {
            ctx.insert("success", true);
            Ok(None)
        }

        fn name(&self) -> StepName {
            StepName::new("SuccessStep")
        }
    }

    #[derive(Debug)]
    struct FailureStep;

    #[async_trait]
    impl Step for FailureStep {
        async fn execute(&self, _ctx: &mut Context) -> Result<Option<StepName>, WorkflowError> {
            Err(WorkflowError::StepError {
                step_name: self.name(),
                details: "Intentional failure".to_string(),
            })
        }

        fn name(&self) -> StepName {
            StepName::new("FailureStep")
        }
    }

    /// Waits for its context's signal, then records that it wound down.
    struct WindDownStep {
        stopped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Step for WindDownStep {
        async fn execute(&self, ctx: &mut Context) -> Result<Option<StepName>, WorkflowError> {
            ctx.cancellation().cancelled().await;
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.stopped.store(true, Ordering::SeqCst);
            Err(WorkflowError::Cancelled {
                step_name: self.name(),
            })
        }
    }

    struct StubbornStep;

    #[async_trait]
    impl Step for StubbornStep {
        async fn execute(&self, _ctx: &mut Context) -> Result<Option<StepName>, WorkflowError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(None)
        }
    }

    struct FlakyStep {
        calls: Arc<AtomicU32>,
        failures: u32,
    }

    #[async_trait]
    impl Step for FlakyStep {
        async fn execute(&self, _ctx: &mut Context) -> Result<Option<StepName>, WorkflowError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(WorkflowError::StepError {
                    step_name: self.name(),
                    details: format!("attempt {call}"),
                });
            }
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_workflow_success() {
        let workflow = Workflow::builder()
            .add_step("success", SuccessStep)
            .start_with("success")
            .build()
            .expect("valid workflow");

        let mut ctx = Context::new();
        let result = workflow.execute(&mut ctx).await;
        assert!(result.is_ok());
        assert_eq!(ctx.get::<bool>("success"), Some(&true));
    }

    #[tokio::test]
    async fn test_workflow_failure() {
        let workflow = Workflow::builder()
            .add_step("failure", FailureStep)
            .start_with("failure")
            .build()
            .expect("valid workflow");

        let mut ctx = Context::new();
        let errors = workflow.execute(&mut ctx).await.expect_err("failure");
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn test_workflow_builder_validation() {
        let result = Workflow::builder().add_step("step", SuccessStep).build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let workflow = Workflow::builder()
            .add_retryable(
                "flaky",
                FlakyStep {
                    calls: calls.clone(),
                    failures: 2,
                },
                RetryPolicy::fixed(3, Duration::from_millis(1)),
            )
            .start_with("flaky")
            .build()
            .expect("valid workflow");

        workflow.execute(&mut Context::new()).await.expect("succeeds");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let workflow = Workflow::builder()
            .add_step("success", SuccessStep)
            .start_with("success")
            .build()
            .expect("valid workflow");

        let mut ctx = Context::new();
        ctx.cancellation().cancel();
        let errors = workflow.execute(&mut ctx).await.expect_err("cancelled");
        assert!(matches!(errors[0], WorkflowError::Cancelled { .. }));
        assert!(!ctx.contains_key("success"));
    }

    #[tokio::test]
    async fn test_cancelled_step_winds_down_before_returning() {
        let stopped = Arc::new(AtomicBool::new(false));
        let workflow = Workflow::builder()
            .add_step(
                "wind_down",
                WindDownStep {
                    stopped: stopped.clone(),
                },
            )
            .start_with("wind_down")
            .build()
            .expect("valid workflow");

        let cancel = CancellationSignal::new();
        let mut ctx = Context::with_cancellation(cancel.clone());
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let errors = workflow.execute(&mut ctx).await.expect_err("cancelled");
        assert!(matches!(errors[0], WorkflowError::Cancelled { .. }));
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_timeout_signals_step_without_cancelling_workflow() {
        let stopped = Arc::new(AtomicBool::new(false));
        let config = StepConfig {
            timeout: Some(Duration::from_millis(20)),
            ..StepConfig::default()
        };
        let workflow = Workflow::builder()
            .add_configured(
                "wind_down",
                WindDownStep {
                    stopped: stopped.clone(),
                },
                config,
            )
            .start_with("wind_down")
            .build()
            .expect("valid workflow");

        let cancel = CancellationSignal::new();
        let mut ctx = Context::with_cancellation(cancel.clone());
        let errors = workflow.execute(&mut ctx).await.expect_err("timeout");

        assert!(matches!(errors[0], WorkflowError::Timeout { .. }));
        assert!(stopped.load(Ordering::SeqCst));
        assert!(!cancel.is_cancelled());
        assert!(!ctx.cancellation().is_cancelled());

        cancel.cancel();
        assert!(ctx.cancellation().is_cancelled());
    }

    #[tokio::test]
    async fn test_step_ignoring_signal_dropped_after_grace_period() {
        let config = StepConfig {
            timeout: Some(Duration::from_millis(10)),
            ..StepConfig::default()
        };
        let workflow = Workflow::builder()
            .add_configured("stubborn", StubbornStep, config)
            .grace_period(Duration::from_millis(20))
            .start_with("stubborn")
            .build()
            .expect("valid workflow");

        let started = std::time::Instant::now();
        let errors = workflow
            .execute(&mut Context::new())
            .await
            .expect_err("timeout");
        assert!(matches!(errors[0], WorkflowError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
