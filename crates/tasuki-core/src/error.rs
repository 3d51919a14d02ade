//! Activity and workflow error types.

use crate::result::Absence;
use crate::step::StepName;
use thiserror::Error;

/// Coarse classification of an [`ActivityError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// A required setting was missing or invalid.
    Configuration,
    /// The instruction store had no usable entry.
    InstructionNotFound,
    /// The marshaler rejected an argument.
    InvalidParameter,
    /// The agent could not be started.
    AgentLaunch,
    /// The agent ran and failed.
    AgentExecution,
    /// The invocation was cancelled or hit its deadline.
    Cancelled,
    /// A collaborator failed at the transport or filesystem level.
    Transport,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            FailureKind::Configuration => "configuration",
            FailureKind::InstructionNotFound => "instruction_not_found",
            FailureKind::InvalidParameter => "invalid_parameter",
            FailureKind::AgentLaunch => "agent_launch",
            FailureKind::AgentExecution => "agent_execution",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Transport => "transport",
        };
        write!(f, "{label}")
    }
}

/// Errors raised while running a single activity invocation.
///
/// Malformed agent output is deliberately absent from this enum: it surfaces
/// as [`ActivityResult::Absent`](crate::ActivityResult::Absent) instead.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ActivityError {
    /// A required setting was missing or invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The instruction store had no entry, or only empty content, for `name`.
    #[error("Instruction not found: {name}")]
    InstructionNotFound {
        /// The instruction name that was requested.
        name: String,
    },

    /// A parameter could not be marshaled.
    #[error("Invalid parameter '{key}': {details}")]
    InvalidParameter {
        /// The offending key.
        key: String,
        /// Why the key was rejected.
        details: String,
    },

    /// The agent process, container, or remote instance could not start.
    #[error("Agent '{agent}' failed to launch: {details}")]
    AgentLaunchFailure {
        /// The agent identifier.
        agent: String,
        /// Launch diagnostics.
        details: String,
    },

    /// The agent started but did not succeed.
    #[error("Agent '{agent}' failed with exit code {}: {stderr}", display_code(.exit_code))]
    AgentExecutionFailure {
        /// The agent identifier.
        agent: String,
        /// Exit code, if the agent exited normally.
        exit_code: Option<i32>,
        /// Captured standard error, for diagnostics only.
        stderr: String,
    },

    /// The invocation was cancelled or exceeded its deadline.
    #[error("Activity was cancelled")]
    Cancelled,

    /// A remote collaborator failed at the transport level.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A local filesystem operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path involved.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

fn display_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "none".to_string(), |c| c.to_string())
}

impl ActivityError {
    /// Returns the failure class of this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            ActivityError::Configuration(_) => FailureKind::Configuration,
            ActivityError::InstructionNotFound { .. } => FailureKind::InstructionNotFound,
            ActivityError::InvalidParameter { .. } => FailureKind::InvalidParameter,
            ActivityError::AgentLaunchFailure { .. } => FailureKind::AgentLaunch,
            ActivityError::AgentExecutionFailure { .. } => FailureKind::AgentExecution,
            ActivityError::Cancelled => FailureKind::Cancelled,
            ActivityError::Transport(_) | ActivityError::Io { .. } => FailureKind::Transport,
        }
    }

    /// Builds an [`ActivityError::Io`] for `path`.
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        ActivityError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

/// Errors that can occur during workflow execution.
///
/// # Non-Exhaustive
///
/// Always include a wildcard arm when matching:
///
/// ```
/// use tasuki_core::WorkflowError;
///
/// fn describe(error: &WorkflowError) -> String {
///     match error {
///         WorkflowError::Absent { step_name, reason } => {
///             format!("{step_name} produced nothing ({reason})")
///         }
///         WorkflowError::Timeout { step_name } => format!("{step_name} timed out"),
///         other => other.to_string(),
///     }
/// }
/// ```
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum WorkflowError {
    /// A custom step failed.
    #[error("Step failed: {step_name}, details: {details}")]
    StepError {
        /// The name of the step that failed
        step_name: StepName,
        /// Details about the failure
        details: String,
    },

    /// An activity-backed step failed.
    #[error("Activity failed in step: {step_name}: {source}")]
    Activity {
        /// The name of the step that failed
        step_name: StepName,
        /// The activity failure
        #[source]
        source: ActivityError,
    },

    /// A step finished without a usable result; the chain stops here.
    #[error("Step produced no result: {step_name} ({reason})")]
    Absent {
        /// The name of the step
        step_name: StepName,
        /// Why there was no result
        reason: Absence,
    },

    /// A step exceeded its timeout duration.
    #[error("Timeout occurred in step: {step_name}")]
    Timeout {
        /// The name of the step that timed out
        step_name: StepName,
    },

    /// The execution was cancelled while running or before starting a step.
    #[error("Workflow cancelled at step: {step_name}")]
    Cancelled {
        /// The step that was running or about to run
        step_name: StepName,
    },

    /// A step's input was not present in the context.
    #[error("Missing input '{key}' for step: {step_name}")]
    MissingInput {
        /// The step that needed the input
        step_name: StepName,
        /// The context key that was empty
        key: String,
    },

    /// A referenced step was not found in the workflow.
    #[error("Step not found: {0}")]
    StepNotFound(StepName),

    /// The workflow configuration is invalid.
    #[error("Invalid workflow configuration: {0}")]
    Configuration(String),
}

impl WorkflowError {
    /// Returns `true` if the orchestrator may run the step again.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkflowError::StepError { .. } | WorkflowError::Timeout { .. } => true,
            WorkflowError::Activity { source, .. } => !matches!(
                source.kind(),
                FailureKind::Cancelled | FailureKind::Configuration | FailureKind::InvalidParameter
            ),
            _ => false,
        }
    }
}
