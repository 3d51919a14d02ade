//! What crosses the boundary into an agent, and what comes back.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// How an agent is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// A handler registered in this process.
    InProcess,
    /// A packaged handler resolved through an agent registry.
    PackagedRemote,
    /// An isolated process image launched through a container runtime.
    Containerized,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::InProcess => write!(f, "in_process"),
            ExecutionMode::PackagedRemote => write!(f, "packaged_remote"),
            ExecutionMode::Containerized => write!(f, "containerized"),
        }
    }
}

/// The three input channels of one agent invocation.
///
/// All mappings are ordered, so two specs built from the same inputs are
/// equal and render identical command lines.
///
/// # Examples
///
/// ```
/// use tasuki_core::AgentInvocationSpec;
///
/// let mut spec = AgentInvocationSpec::new();
/// spec.args.insert("source".to_string(), "https://example.com".to_string());
/// spec.args.insert("prompt-file".to_string(), "/prompt.txt".to_string());
///
/// assert_eq!(
///     spec.command_line(),
///     vec!["--prompt-file", "/prompt.txt", "--source", "https://example.com"]
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInvocationSpec {
    /// Environment variable name to value.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Host path to agent-visible path.
    #[serde(default)]
    pub mounts: BTreeMap<PathBuf, String>,
    /// Argument name to value, rendered as `--name value`.
    #[serde(default)]
    pub args: BTreeMap<String, String>,
}

impl AgentInvocationSpec {
    /// Creates an empty spec.
    pub fn new() -> Self {
        Self::default()
    }

    /// Renders `args` as command-line flags in key order.
    pub fn command_line(&self) -> Vec<String> {
        self.args
            .iter()
            .flat_map(|(name, value)| [format!("--{name}"), value.clone()])
            .collect()
    }
}

/// Terminal status of an agent invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    /// The agent finished successfully.
    Succeeded,
    /// The agent could not start, or finished unsuccessfully.
    Failed,
    /// The invocation was cancelled or exceeded its deadline.
    Cancelled,
}

/// Captured outcome of an agent invocation.
///
/// Output is delivered whole once the agent has terminated. `stderr` is for
/// diagnostics only and never drives control flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInvocationResult {
    /// Terminal status.
    pub status: InvocationStatus,
    /// Process exit code, when there was one.
    #[serde(default)]
    pub exit_code: Option<i32>,
    /// Captured standard output.
    #[serde(default)]
    pub stdout: String,
    /// Captured standard error.
    #[serde(default)]
    pub stderr: String,
    /// Whether the agent was started at all.
    #[serde(default = "launched_default")]
    pub launched: bool,
}

fn launched_default() -> bool {
    true
}

impl AgentInvocationResult {
    /// A successful invocation with the given output.
    pub fn succeeded(stdout: impl Into<String>) -> Self {
        Self {
            status: InvocationStatus::Succeeded,
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
            launched: true,
        }
    }

    /// An agent that ran and failed.
    pub fn failed(exit_code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self {
            status: InvocationStatus::Failed,
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
            launched: true,
        }
    }

    /// An agent that never started.
    pub fn launch_failed(details: impl Into<String>) -> Self {
        Self {
            status: InvocationStatus::Failed,
            exit_code: None,
            stdout: String::new(),
            stderr: details.into(),
            launched: false,
        }
    }

    /// A cancelled invocation.
    pub fn cancelled() -> Self {
        Self {
            status: InvocationStatus::Cancelled,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            launched: true,
        }
    }

    /// Returns `true` if the status is [`InvocationStatus::Succeeded`].
    pub fn is_success(&self) -> bool {
        self.status == InvocationStatus::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_equality_ignores_insertion_order() {
        let mut first = AgentInvocationSpec::new();
        first.args.insert("b".to_string(), "2".to_string());
        first.args.insert("a".to_string(), "1".to_string());

        let mut second = AgentInvocationSpec::new();
        second.args.insert("a".to_string(), "1".to_string());
        second.args.insert("b".to_string(), "2".to_string());

        assert_eq!(first, second);
        assert_eq!(first.command_line(), vec!["--a", "1", "--b", "2"]);
    }

    #[test]
    fn test_spec_serializes_across_boundary() {
        let mut spec = AgentInvocationSpec::new();
        spec.env.insert("OPENAI_MODEL".to_string(), "gpt-4o".to_string());
        spec.mounts
            .insert(PathBuf::from("/tmp/instruction-1.txt"), "/prompt.txt".to_string());

        let json = serde_json::to_value(&spec).expect("serialize");
        assert_eq!(json["mounts"]["/tmp/instruction-1.txt"], "/prompt.txt");

        let back: AgentInvocationSpec = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, spec);
    }

    #[test]
    fn test_result_defaults_when_deserialized() {
        let result: AgentInvocationResult =
            serde_json::from_str(r#"{"status":"succeeded","stdout":"{}"}"#).expect("parse");
        assert!(result.is_success());
        assert!(result.launched);
        assert_eq!(result.exit_code, None);
    }
}
