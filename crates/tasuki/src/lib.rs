//! Run workflow activities backed by external agents.
//!
//! An activity resolves a named instruction, marshals its arguments into the
//! agent's env, mount and argument channels, runs the agent in-process,
//! through a registry, or in a container, and parses the agent's output into
//! a typed result. Activities chain into a [`Workflow`] through
//! [`ActivityStage`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tasuki::flows::poet::{poet_workflow, ComposerActivity, GeminiComposer, KEYWORDS_KEY};
//! use tasuki::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let runtime = AgentRuntime::from_config(&config)
//!         .with_handler("gemini", Arc::new(GeminiComposer::from_env()?));
//!
//!     let composer = ComposerActivity::new(&runtime, "gemini", ExecutionMode::InProcess);
//!     let workflow = poet_workflow(composer)?;
//!
//!     let mut ctx = Context::new();
//!     ctx.insert(KEYWORDS_KEY, "autumn, rain".to_string());
//!     if let Err(errors) = workflow.execute(&mut ctx).await {
//!         for error in errors {
//!             eprintln!("{error}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod activity;
pub mod config;
pub mod deserialize;
pub mod executor;
pub mod flows;
pub mod instruction;
pub mod marshal;
pub mod registry;
pub mod runtime;
mod stage;
mod workflow;

// Re-export core types
pub use tasuki_core::*;

pub use activity::{AgentActivity, AgentRegistration, StepState};
pub use config::Config;
pub use executor::{AgentExecutor, ContainerRuntime};
pub use instruction::{
    HttpInstructionStore, InstructionHandle, InstructionResolver, MemoryInstructionStore,
};
pub use marshal::{CollisionPolicy, MarshalPlan};
pub use registry::{HttpAgentRegistry, LocalAgentRegistry};
pub use runtime::AgentRuntime;
pub use stage::ActivityStage;
pub use workflow::{Workflow, WorkflowBuilder};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        Absence, Activity, ActivityError, ActivityResult, ActivityStage, AgentActivity,
        AgentExecutor, AgentRegistration, AgentRuntime, CancellationSignal, Config, Context,
        ContextKey, ExecutionMode, FailureKind, MarshalPlan, RetryPolicy, Step, StepConfig,
        StepName, Workflow, WorkflowBuilder, WorkflowError,
    };
}
