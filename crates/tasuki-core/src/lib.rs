//! Core traits and types for the tasuki activity execution core.
//!
//! This crate has no process, network, or filesystem code. Library authors
//! depend on it to implement stores, registries, handlers, and steps.
//!
//! # Core Types
//!
//! - [`Activity`] - A typed unit of work run by the orchestrator
//! - [`ActivityResult`] - Completed value or typed absence
//! - [`ActivityError`] - Failure taxonomy for one invocation
//! - [`AgentInvocationSpec`] / [`AgentInvocationResult`] - What crosses the agent boundary
//! - [`Step`] / [`Context`] - Orchestrator-facing step contract
//! - [`CancellationSignal`] - Cancellation threaded through every suspension point

mod cancel;
mod context;
mod error;
mod invocation;
mod result;
mod step;
mod traits;

pub use cancel::CancellationSignal;
pub use context::{Context, ContextKey};
pub use error::{ActivityError, FailureKind, WorkflowError};
pub use invocation::{AgentInvocationResult, AgentInvocationSpec, ExecutionMode, InvocationStatus};
pub use result::{Absence, ActivityResult};
pub use step::{RetryPolicy, RetryPolicyError, Step, StepConfig, StepName};
pub use traits::{Activity, AgentHandler, AgentInstance, AgentRegistry, InstructionStore};
