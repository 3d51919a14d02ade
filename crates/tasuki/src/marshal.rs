//! Parameter marshaling into the env, mount, and argument channels.

use crate::instruction::InstructionHandle;
use std::collections::BTreeMap;
use tasuki_core::{ActivityError, AgentInvocationSpec};
use tracing::warn;

/// What happens when a domain argument reuses a key reserved by the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollisionPolicy {
    /// The domain value replaces the reserved value and a warning is logged.
    #[default]
    LastWriteWins,
    /// The build fails with [`ActivityError::InvalidParameter`].
    Reject,
}

/// The input contract of one agent.
///
/// Declares fixed environment variables and how the staged instruction is
/// exposed to the agent. Every key the plan names is reserved.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeMap;
/// use tasuki::marshal::MarshalPlan;
///
/// let plan = MarshalPlan::new()
///     .env("OPENAI_MODEL", "gpt-4o-mini")
///     .mount_instruction_at("/prompt.txt")
///     .instruction_arg("prompt-file");
///
/// let args = BTreeMap::from([("source".to_string(), "https://example.com".to_string())]);
/// let spec = plan.build(None, &args).expect("valid parameters");
///
/// assert_eq!(spec.env["OPENAI_MODEL"], "gpt-4o-mini");
/// assert_eq!(spec.args["source"], "https://example.com");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarshalPlan {
    env: BTreeMap<String, String>,
    instruction_mount: Option<String>,
    instruction_arg: Option<String>,
    instruction_env: Option<String>,
    collision: CollisionPolicy,
}

impl MarshalPlan {
    /// An empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a fixed environment variable.
    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    /// Mounts the staged instruction at `path` inside the agent.
    pub fn mount_instruction_at(mut self, path: impl Into<String>) -> Self {
        self.instruction_mount = Some(path.into());
        self
    }

    /// Passes the agent-visible instruction path as argument `name`.
    pub fn instruction_arg(mut self, name: impl Into<String>) -> Self {
        self.instruction_arg = Some(name.into());
        self
    }

    /// Passes the agent-visible instruction path in environment variable `name`.
    pub fn instruction_env(mut self, name: impl Into<String>) -> Self {
        self.instruction_env = Some(name.into());
        self
    }

    /// Sets the collision policy.
    pub fn collision(mut self, policy: CollisionPolicy) -> Self {
        self.collision = policy;
        self
    }

    /// Assembles the invocation spec.
    ///
    /// Domain arguments become command-line arguments. The instruction path
    /// is the mount path when one is configured, otherwise the host path.
    ///
    /// # Errors
    ///
    /// [`ActivityError::InvalidParameter`] for an empty key, or for a
    /// reserved key under [`CollisionPolicy::Reject`].
    pub fn build(
        &self,
        instruction: Option<&InstructionHandle>,
        domain_args: &BTreeMap<String, String>,
    ) -> Result<AgentInvocationSpec, ActivityError> {
        let mut spec = AgentInvocationSpec {
            env: self.env.clone(),
            ..AgentInvocationSpec::default()
        };

        if let Some(instruction) = instruction {
            let host_path = instruction.path().to_path_buf();
            let agent_path = match &self.instruction_mount {
                Some(mount) => {
                    spec.mounts.insert(host_path, mount.clone());
                    mount.clone()
                }
                None => host_path.display().to_string(),
            };
            if let Some(arg) = &self.instruction_arg {
                spec.args.insert(arg.clone(), agent_path.clone());
            }
            if let Some(env) = &self.instruction_env {
                spec.env.insert(env.clone(), agent_path);
            }
        }

        for key in spec.env.keys().chain(spec.args.keys()) {
            if key.is_empty() {
                return Err(invalid("", "keys must not be empty"));
            }
        }

        for (key, value) in domain_args {
            if key.is_empty() {
                return Err(invalid(key, "keys must not be empty"));
            }
            let in_args = spec.args.contains_key(key);
            let in_env = spec.env.contains_key(key);
            if !in_args && !in_env {
                spec.args.insert(key.clone(), value.clone());
                continue;
            }

            match self.collision {
                CollisionPolicy::Reject => {
                    return Err(invalid(key, "collides with a key reserved by the agent contract"));
                }
                CollisionPolicy::LastWriteWins => {
                    warn!(key = %key, "domain argument overrides a reserved key");
                    if in_args {
                        spec.args.insert(key.clone(), value.clone());
                    }
                    if in_env {
                        spec.env.insert(key.clone(), value.clone());
                    }
                }
            }
        }

        Ok(spec)
    }
}

fn invalid(key: &str, details: &str) -> ActivityError {
    ActivityError::InvalidParameter {
        key: key.to_string(),
        details: details.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{InstructionResolver, MemoryInstructionStore};
    use std::sync::Arc;
    use tasuki_core::CancellationSignal;
    use tempfile::tempdir;

    async fn staged(dir: &std::path::Path) -> InstructionHandle {
        let store = Arc::new(MemoryInstructionStore::new().with("Reader", "read the page"));
        InstructionResolver::new(store, dir)
            .resolve("Reader", &CancellationSignal::new())
            .await
            .expect("resolve")
    }

    fn reader_plan() -> MarshalPlan {
        MarshalPlan::new()
            .env("OPENAI_MODEL", "gpt-4o-mini")
            .env("OPENAI_API_KEY", "sk-test")
            .mount_instruction_at("/prompt.txt")
            .instruction_arg("prompt-file")
    }

    #[tokio::test]
    async fn test_build_populates_all_channels() {
        let dir = tempdir().expect("tempdir");
        let handle = staged(dir.path()).await;
        let args = BTreeMap::from([("source".to_string(), "https://example.com".to_string())]);

        let spec = reader_plan().build(Some(&handle), &args).expect("build");

        assert_eq!(spec.env.len(), 2);
        assert_eq!(spec.mounts.get(handle.path()).map(String::as_str), Some("/prompt.txt"));
        assert_eq!(spec.args["prompt-file"], "/prompt.txt");
        assert_eq!(spec.args["source"], "https://example.com");
    }

    #[tokio::test]
    async fn test_build_is_deterministic() {
        let dir = tempdir().expect("tempdir");
        let handle = staged(dir.path()).await;

        let mut forward = BTreeMap::new();
        forward.insert("a".to_string(), "1".to_string());
        forward.insert("b".to_string(), "2".to_string());
        let mut backward = BTreeMap::new();
        backward.insert("b".to_string(), "2".to_string());
        backward.insert("a".to_string(), "1".to_string());

        let plan = reader_plan();
        let first = plan.build(Some(&handle), &forward).expect("build");
        let second = plan.build(Some(&handle), &backward).expect("build");
        let third = plan.build(Some(&handle), &forward).expect("build");
        assert_eq!(first, second);
        assert_eq!(first, third);
    }

    #[tokio::test]
    async fn test_host_path_used_without_mount() {
        let dir = tempdir().expect("tempdir");
        let handle = staged(dir.path()).await;
        let plan = MarshalPlan::new().instruction_env("INSTRUCTION_FILE");

        let spec = plan.build(Some(&handle), &BTreeMap::new()).expect("build");
        assert!(spec.mounts.is_empty());
        assert_eq!(
            spec.env["INSTRUCTION_FILE"],
            handle.path().display().to_string()
        );
    }

    #[test]
    fn test_collision_last_write_wins() {
        let plan = MarshalPlan::new().env("OPENAI_MODEL", "gpt-4o-mini");
        let args = BTreeMap::from([("OPENAI_MODEL".to_string(), "gpt-4o".to_string())]);

        let spec = plan.build(None, &args).expect("build");
        assert_eq!(spec.env["OPENAI_MODEL"], "gpt-4o");
        assert!(!spec.args.contains_key("OPENAI_MODEL"));
    }

    #[test]
    fn test_collision_reject() {
        let plan = MarshalPlan::new()
            .env("OPENAI_MODEL", "gpt-4o-mini")
            .collision(CollisionPolicy::Reject);
        let args = BTreeMap::from([("OPENAI_MODEL".to_string(), "gpt-4o".to_string())]);

        let err = plan.build(None, &args).expect_err("collision");
        assert!(matches!(err, ActivityError::InvalidParameter { ref key, .. } if key == "OPENAI_MODEL"));
    }

    #[test]
    fn test_empty_key_rejected() {
        let args = BTreeMap::from([(String::new(), "value".to_string())]);
        let err = MarshalPlan::new().build(None, &args).expect_err("empty key");
        assert!(matches!(err, ActivityError::InvalidParameter { .. }));
    }
}
