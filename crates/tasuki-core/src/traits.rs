//! Seams to external collaborators and the activity contract.

use crate::cancel::CancellationSignal;
use crate::error::ActivityError;
use crate::invocation::{AgentInvocationResult, AgentInvocationSpec};
use crate::result::ActivityResult;
use async_trait::async_trait;

/// A remote store of named instructions.
///
/// Implementations must be safe to call concurrently from independent
/// workflow executions.
#[async_trait]
pub trait InstructionStore: Send + Sync {
    /// Fetches the instruction text for `name`.
    ///
    /// Returns `Ok(None)` when the store has no entry.
    async fn fetch(&self, name: &str) -> Result<Option<String>, ActivityError>;
}

/// An agent callable without crossing a process boundary.
///
/// Cancellation is cooperative: the executor drops the returned future, so a
/// handler stops at its next await point.
#[async_trait]
pub trait AgentHandler: Send + Sync {
    /// Handles one invocation.
    async fn handle(&self, spec: &AgentInvocationSpec) -> AgentInvocationResult;
}

/// Resolves packaged agents by identifier and starts them.
#[async_trait]
pub trait AgentRegistry: Send + Sync {
    /// Starts `agent` with the given spec.
    async fn start(
        &self,
        agent: &str,
        spec: &AgentInvocationSpec,
    ) -> Result<Box<dyn AgentInstance>, ActivityError>;
}

/// A running packaged agent.
#[async_trait]
pub trait AgentInstance: Send {
    /// Waits for the agent to finish.
    async fn wait(&mut self) -> Result<AgentInvocationResult, ActivityError>;

    /// Asks the agent to stop.
    async fn cancel(&mut self) -> Result<(), ActivityError>;
}

/// A typed unit of work consumed by the orchestrator.
///
/// # Examples
///
/// ```
/// use tasuki_core::{Activity, ActivityError, ActivityResult, CancellationSignal};
/// use async_trait::async_trait;
///
/// struct Shout;
///
/// #[async_trait]
/// impl Activity for Shout {
///     type Input = String;
///     type Output = String;
///
///     fn name(&self) -> &str {
///         "Shout"
///     }
///
///     async fn run(
///         &self,
///         input: String,
///         _cancel: &CancellationSignal,
///     ) -> Result<ActivityResult<String>, ActivityError> {
///         Ok(ActivityResult::Completed(input.to_uppercase()))
///     }
/// }
/// ```
#[async_trait]
pub trait Activity: Send + Sync {
    /// The value the activity consumes.
    type Input: Send + 'static;
    /// The value the activity produces.
    type Output: Send + 'static;

    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Runs the activity, honoring `cancel` at every suspension point.
    async fn run(
        &self,
        input: Self::Input,
        cancel: &CancellationSignal,
    ) -> Result<ActivityResult<Self::Output>, ActivityError>;
}
