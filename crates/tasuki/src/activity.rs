//! The activity step: resolve, marshal, invoke, deserialize.

use crate::deserialize;
use crate::executor::AgentExecutor;
use crate::instruction::InstructionResolver;
use crate::marshal::MarshalPlan;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tasuki_core::{
    Activity, ActivityError, ActivityResult, CancellationSignal, ExecutionMode, FailureKind,
    InvocationStatus,
};
use tracing::{debug, info, warn};

/// Phase of one activity invocation.
///
/// Transitions only move forward. `Completed`, `Absent` and `Failed` are
/// terminal, and cancellation from any phase ends in
/// `Failed(FailureKind::Cancelled)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    /// Not started.
    Idle,
    /// Fetching and staging the instruction.
    ResolvingInstruction,
    /// Building the invocation spec.
    Marshaling,
    /// Waiting for the agent.
    Invoking,
    /// Parsing the agent's output.
    Deserializing,
    /// Produced a value.
    Completed,
    /// Ran, but produced no usable value.
    Absent,
    /// Ended with an error of the given kind.
    Failed(FailureKind),
}

impl StepState {
    fn rank(self) -> u8 {
        match self {
            StepState::Idle => 0,
            StepState::ResolvingInstruction => 1,
            StepState::Marshaling => 2,
            StepState::Invoking => 3,
            StepState::Deserializing => 4,
            StepState::Completed | StepState::Absent | StepState::Failed(_) => 5,
        }
    }

    /// Returns `true` for `Completed`, `Absent` and `Failed`.
    pub fn is_terminal(self) -> bool {
        self.rank() == 5
    }

    /// The terminal state an outcome maps to.
    pub fn from_outcome<T>(outcome: &Result<ActivityResult<T>, ActivityError>) -> Self {
        match outcome {
            Ok(ActivityResult::Completed(_)) => StepState::Completed,
            Ok(ActivityResult::Absent(_)) => StepState::Absent,
            Err(err) => StepState::Failed(err.kind()),
        }
    }
}

struct Transitions<'a> {
    activity: &'a str,
    state: StepState,
}

impl<'a> Transitions<'a> {
    fn new(activity: &'a str) -> Self {
        Self {
            activity,
            state: StepState::Idle,
        }
    }

    fn advance(&mut self, next: StepState) {
        debug_assert!(next.rank() > self.state.rank(), "{:?} -> {next:?}", self.state);
        debug!(activity = self.activity, from = ?self.state, to = ?next, "activity transition");
        self.state = next;
    }

    fn finish<T>(mut self, outcome: &Result<ActivityResult<T>, ActivityError>) {
        let terminal = StepState::from_outcome(outcome);
        self.advance(terminal);
        match outcome {
            Ok(ActivityResult::Completed(_)) => info!(activity = self.activity, "activity completed"),
            Ok(ActivityResult::Absent(reason)) => {
                warn!(activity = self.activity, %reason, "activity produced no result")
            }
            Err(err) => warn!(activity = self.activity, kind = %err.kind(), "activity failed: {err}"),
        }
    }
}

/// How one activity reaches its agent.
#[derive(Debug, Clone)]
pub struct AgentRegistration {
    /// Activity name, used in logs, step names and errors.
    pub activity: String,
    /// Handler name, registry identifier, or image reference.
    pub agent: String,
    /// How the agent is launched.
    pub mode: ExecutionMode,
    /// Instruction to resolve before each invocation, if any.
    pub instruction: Option<String>,
    /// The agent's input contract.
    pub plan: MarshalPlan,
    /// Deadline for a single invocation.
    pub timeout: Option<Duration>,
}

impl AgentRegistration {
    /// Registers `activity` as backed by `agent` in the given mode, with no
    /// instruction, an empty plan and no timeout.
    pub fn new(activity: impl Into<String>, agent: impl Into<String>, mode: ExecutionMode) -> Self {
        Self {
            activity: activity.into(),
            agent: agent.into(),
            mode,
            instruction: None,
            plan: MarshalPlan::default(),
            timeout: None,
        }
    }

    /// Names the instruction resolved before each invocation.
    pub fn instruction(mut self, name: impl Into<String>) -> Self {
        self.instruction = Some(name.into());
        self
    }

    /// Sets the agent's input contract.
    pub fn plan(mut self, plan: MarshalPlan) -> Self {
        self.plan = plan;
        self
    }

    /// Bounds each invocation; expiry counts as cancellation.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// An activity backed by an external agent whose output parses into `T`.
///
/// Each call to [`invoke`](AgentActivity::invoke) resolves the instruction
/// afresh, so edits in the store take effect on the next invocation. The
/// staged instruction file lives exactly as long as the call.
pub struct AgentActivity<T> {
    registration: AgentRegistration,
    resolver: InstructionResolver,
    executor: Arc<AgentExecutor>,
    _output: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for AgentActivity<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentActivity")
            .field("registration", &self.registration)
            .finish_non_exhaustive()
    }
}

impl<T: DeserializeOwned> AgentActivity<T> {
    /// Binds a registration to its collaborators. See also
    /// [`AgentRuntime::activity`](crate::runtime::AgentRuntime::activity).
    pub fn new(
        registration: AgentRegistration,
        resolver: InstructionResolver,
        executor: Arc<AgentExecutor>,
    ) -> Self {
        Self {
            registration,
            resolver,
            executor,
            _output: PhantomData,
        }
    }

    /// How this activity reaches its agent.
    pub fn registration(&self) -> &AgentRegistration {
        &self.registration
    }

    /// Runs one invocation with `domain_args` as the agent's arguments.
    ///
    /// # Errors
    ///
    /// Anything other than a parsed value or a typed absence: a missing
    /// instruction, an invalid parameter, a launch or execution failure, or
    /// cancellation.
    pub async fn invoke(
        &self,
        domain_args: &BTreeMap<String, String>,
        cancel: &CancellationSignal,
    ) -> Result<ActivityResult<T>, ActivityError> {
        let mut transitions = Transitions::new(&self.registration.activity);
        let outcome = self.drive(&mut transitions, domain_args, cancel).await;
        transitions.finish(&outcome);
        outcome
    }

    async fn drive(
        &self,
        transitions: &mut Transitions<'_>,
        domain_args: &BTreeMap<String, String>,
        cancel: &CancellationSignal,
    ) -> Result<ActivityResult<T>, ActivityError> {
        if cancel.is_cancelled() {
            return Err(ActivityError::Cancelled);
        }
        let registration = &self.registration;

        let instruction = match &registration.instruction {
            Some(name) => {
                transitions.advance(StepState::ResolvingInstruction);
                Some(self.resolver.resolve(name, cancel).await?)
            }
            None => None,
        };

        transitions.advance(StepState::Marshaling);
        let spec = registration.plan.build(instruction.as_ref(), domain_args)?;

        transitions.advance(StepState::Invoking);
        let result = self
            .executor
            .invoke(
                &registration.agent,
                &spec,
                registration.mode,
                cancel,
                registration.timeout,
            )
            .await;
        drop(instruction);

        match result.status {
            InvocationStatus::Cancelled => Err(ActivityError::Cancelled),
            InvocationStatus::Failed if !result.launched => Err(ActivityError::AgentLaunchFailure {
                agent: registration.agent.clone(),
                details: result.stderr,
            }),
            InvocationStatus::Failed => Err(ActivityError::AgentExecutionFailure {
                agent: registration.agent.clone(),
                exit_code: result.exit_code,
                stderr: result.stderr,
            }),
            InvocationStatus::Succeeded => {
                transitions.advance(StepState::Deserializing);
                Ok(deserialize::parse(Some(&result.stdout)))
            }
        }
    }
}

#[async_trait]
impl<T> Activity for AgentActivity<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Input = BTreeMap<String, String>;
    type Output = T;

    fn name(&self) -> &str {
        &self.registration.activity
    }

    async fn run(
        &self,
        input: Self::Input,
        cancel: &CancellationSignal,
    ) -> Result<ActivityResult<T>, ActivityError> {
        self.invoke(&input, cancel).await
    }
}
