//! Step trait, step naming, and orchestrator retry policy.

use crate::context::Context;
use crate::error::WorkflowError;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Type-safe step name wrapper.
///
/// # Examples
///
/// ```
/// use tasuki_core::StepName;
///
/// let name: StepName = "ReadLinkedInPage".into();
/// assert_eq!(name.as_str(), "ReadLinkedInPage");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StepName(String);

impl StepName {
    /// Creates a new StepName.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Creates a StepName from the last path segment of a type name.
    pub fn from_type_name<T: ?Sized>() -> Self {
        let full_name = std::any::type_name::<T>();
        let base = full_name.split('<').next().unwrap_or(full_name);
        Self::new(base.rsplit("::").next().unwrap_or(base))
    }

    /// Returns the step name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StepName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StepName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl PartialEq<&str> for StepName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl std::borrow::Borrow<str> for StepName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// How the orchestrator re-runs a failed step.
///
/// Only failures reported as retryable by
/// [`WorkflowError::is_retryable`] are retried. Activities themselves never
/// retry.
///
/// # Examples
///
/// ```
/// use tasuki_core::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential(3, Duration::from_millis(100));
/// assert_eq!(policy.max_retries(), 3);
/// assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(400)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Fail on the first error.
    #[default]
    None,
    /// Constant delay between attempts.
    Fixed {
        /// Retries after the first attempt
        max_retries: u32,
        /// Delay before each retry
        delay: Duration,
    },
    /// Delay grows by `multiplier` each attempt, capped at `max_delay`.
    ExponentialBackoff {
        /// Retries after the first attempt
        max_retries: u32,
        /// Delay before the first retry
        initial_delay: Duration,
        /// Upper bound for any delay
        max_delay: Duration,
        /// Growth factor, 1 to 10
        multiplier: u32,
    },
}

/// Returned when a [`RetryPolicy`] is constructed with invalid parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicyError(pub &'static str);

impl fmt::Display for RetryPolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for RetryPolicyError {}

impl RetryPolicy {
    /// Retries `max_retries` times with a constant `delay`.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        RetryPolicy::Fixed { max_retries, delay }
    }

    /// Doubles the delay on each attempt, capped at 60 seconds.
    pub fn exponential(max_retries: u32, initial_delay: Duration) -> Self {
        RetryPolicy::ExponentialBackoff {
            max_retries,
            initial_delay,
            max_delay: Duration::from_secs(60),
            multiplier: 2,
        }
    }

    /// Exponential backoff with explicit bounds.
    ///
    /// # Errors
    ///
    /// Fails if `multiplier` is outside `1..=10` or `max_delay < initial_delay`.
    pub fn exponential_backoff(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: u32,
    ) -> Result<Self, RetryPolicyError> {
        if multiplier == 0 {
            return Err(RetryPolicyError("multiplier must be greater than 0"));
        }
        if multiplier > 10 {
            return Err(RetryPolicyError("multiplier must be 10 or less"));
        }
        if max_delay < initial_delay {
            return Err(RetryPolicyError("max_delay must be >= initial_delay"));
        }
        Ok(RetryPolicy::ExponentialBackoff {
            max_retries,
            initial_delay,
            max_delay,
            multiplier,
        })
    }

    /// Number of retries after the first attempt.
    pub fn max_retries(&self) -> u32 {
        match self {
            RetryPolicy::None => 0,
            RetryPolicy::Fixed { max_retries, .. }
            | RetryPolicy::ExponentialBackoff { max_retries, .. } => *max_retries,
        }
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            RetryPolicy::None => None,
            RetryPolicy::Fixed { delay, .. } => Some(*delay),
            RetryPolicy::ExponentialBackoff {
                initial_delay,
                max_delay,
                multiplier,
                ..
            } => {
                let factor = u64::from(*multiplier).saturating_pow(attempt);
                let millis = (initial_delay.as_millis() as u64).saturating_mul(factor);
                Some(Duration::from_millis(millis).min(*max_delay))
            }
        }
    }
}

/// Per-step orchestration settings.
#[derive(Debug, Clone)]
pub struct StepConfig {
    /// Upper bound for one attempt. `None` disables the orchestrator timeout.
    pub timeout: Option<Duration>,
    /// Retry policy for retryable failures.
    pub retry_policy: RetryPolicy,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(300)),
            retry_policy: RetryPolicy::None,
        }
    }
}

/// A unit the orchestrator can run.
///
/// Returning `Ok(Some(name))` continues with the named step, `Ok(None)`
/// completes the workflow. Steps must observe
/// [`Context::cancellation`] at their suspension points.
#[async_trait]
pub trait Step: Send + Sync {
    /// Runs the step.
    async fn execute(&self, ctx: &mut Context) -> Result<Option<StepName>, WorkflowError>;

    /// The step name used in logs and errors. Defaults to the type name.
    fn name(&self) -> StepName {
        StepName::from_type_name::<Self>()
    }
}
